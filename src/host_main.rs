// The browser starts this process and talks to it over stdin and stdout. Disable during
// development to see stderr.
#![windows_subsystem = "windows"]

use std::env::args;

use anyhow::Result;
use clap::Parser;
use sitewatch::{
    daemon::{args::HostArgs, start_daemon},
    utils::{
        dir::resolve_application_path,
        logging::{enable_logging, HOST_PREFIX},
        runtime::single_thread_runtime,
    },
};

fn main() -> Result<()> {
    let args = HostArgs::parse_from(args().collect::<Vec<_>>());
    let app_dir = resolve_application_path(args.dir)?;
    enable_logging(HOST_PREFIX, &app_dir.join("logs"), args.log, args.log_console)?;
    single_thread_runtime()?.block_on(async move { start_daemon(app_dir, args.tracker).await })?;
    Ok(())
}
