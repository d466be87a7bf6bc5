use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
pub struct HostArgs {
    /// Directory holding the store and logs.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Externally synchronised directory settings are mirrored into. Without it sync reads and
    /// writes a store next to the local one.
    #[arg(long = "sync-dir")]
    pub sync_dir: Option<PathBuf>,
    #[arg(long = "tick-seconds", default_value_t = 6)]
    pub tick_seconds: u64,
    /// This option is for debugging purposes only. Logs go to stderr, stdout belongs to the
    /// browser.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Browsers pass the caller origin (and a window handle on Windows).
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub caller: Vec<String>,
}
