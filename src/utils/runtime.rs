use anyhow::Result;

/// The host runs every task on one thread, matching the cooperative model of the tracker.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
