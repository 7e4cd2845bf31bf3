use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use host::serve_host;
use processing::TrackerModule;
use storage::record_storage::{JsonFileStore, RecordStorage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    tracking::config::TrackerConfig,
    utils::clock::{Clock, DefaultClock},
};

pub mod args;
pub mod host;
pub mod processing;
pub mod shutdown;
pub mod storage;

/// Directory inside the application directory holding the store.
pub const RECORDS_DIR: &str = "records";

pub fn open_store(dir: &std::path::Path) -> Result<JsonFileStore> {
    Ok(JsonFileStore::new(dir.join(RECORDS_DIR))?)
}

/// Represents the starting point for the daemon. Talks to the browser over stdin and stdout.
pub async fn start_daemon(dir: PathBuf, config: TrackerConfig) -> Result<()> {
    let storage = Arc::new(open_store(&dir)?);
    info!("Starting host in {dir:?} with {config:?}");
    run_host(
        storage,
        &config,
        Arc::new(DefaultClock),
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await
}

async fn run_host<S: RecordStorage>(
    storage: Arc<S>,
    config: &TrackerConfig,
    clock: Arc<dyn Clock>,
    reader: impl AsyncRead + Unpin,
    writer: impl AsyncWrite + Unpin,
) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let (tracker, tracker_module) =
        TrackerModule::new(storage, config, clock, shutdown_token.clone());

    let (_, tracker_result, host_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        tracker_module.run(),
        serve_host(reader, writer, tracker, shutdown_token.clone()),
    );

    if let Err(tracker_result) = tracker_result {
        error!("Tracker module got an error {:?}", tracker_result);
    }

    if let Err(host_result) = host_result {
        error!("Connection to the browser got an error {:?}", host_result);
    }

    Ok(())
}

#[cfg(test)]
mod daemon_tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
    use tempfile::tempdir;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use crate::{
        daemon::{
            open_store, run_host,
            storage::{
                entities::{DailyUsage, DayKey},
                record_storage::{take_record, RecordKey, RecordStorage},
            },
        },
        tracking::config::TrackerConfig,
        utils::{clock::test_clock::ManualClock, logging::TEST_LOGGING},
    };

    fn frame(body: &str) -> Vec<u8> {
        let mut frame = (body.len() as u32).to_ne_bytes().to_vec();
        frame.extend_from_slice(body.as_bytes());
        frame
    }

    /// Very simple smoke test of the whole host on top of a real store. Time leaves the host
    /// through the final flush when the browser disconnects.
    #[tokio::test]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = ManualClock::at_local(NaiveDateTime::new(
            NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(),
            NaiveTime::from_hms_opt(13, 30, 0).unwrap(),
        ));

        let (mut browser_out, host_in) = duplex(1024);
        let (host_out, mut browser_in) = duplex(1024);

        let browser = {
            let clock = clock.clone();
            async move {
                browser_out
                    .write_all(&frame(r#"{"type":"focusChanged","url":"https://a.com"}"#))
                    .await?;
                let mut length = [0u8; 4];
                browser_in.read_exact(&mut length).await?;
                let mut reply = vec![0u8; u32::from_ne_bytes(length) as usize];
                browser_in.read_exact(&mut reply).await?;

                clock.advance(chrono::Duration::minutes(45));
                drop(browser_out);
                anyhow::Ok(())
            }
        };

        let storage = Arc::new(open_store(dir.path())?);
        let config = TrackerConfig::default();
        let (host_result, browser_result) = tokio::join!(
            run_host(storage, &config, Arc::new(clock), host_in, host_out),
            browser,
        );
        host_result?;
        browser_result?;

        let storage = open_store(dir.path())?;
        let mut values = storage.get(&[RecordKey::SiteUsage]).await?;
        let daily: DailyUsage = take_record(&mut values, RecordKey::SiteUsage)?;
        let day = DayKey::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap());
        assert_eq!(daily[&day]["a.com"], 45 * 60 * 1000);
        Ok(())
    }
}
