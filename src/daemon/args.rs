use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::tracking::config::TrackerConfig;

/// Arguments of the native messaging host. The browser launches it on its own, so everything has
/// a default.
#[derive(Parser, Debug)]
#[command(name = "sitewatch-host", version)]
pub struct HostArgs {
    #[arg(
        long,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only. Mirrors logs to stderr.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    #[command(flatten)]
    pub tracker: TrackerConfig,
    /// Caller origin and window handle the browser appends to the command line.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, hide = true)]
    pub browser_args: Vec<String>,
}
