use anyhow::Result;
use clap::Parser;
use timespent::{
    host::{args::HostArgs, start_host},
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, HOST_PREFIX},
        runtime::single_thread_runtime,
    },
};
use tracing::error;

/// Started by the browser, one process per connecting extension. Exits when the browser closes
/// stdin.
fn main() -> Result<()> {
    let args = HostArgs::parse();
    let app_dir = args.dir.map_or_else(create_application_default_path, ensure_dir)?;
    enable_logging(HOST_PREFIX, &app_dir.join("logs"), args.log, args.log_console)?;
    single_thread_runtime()?
        .block_on(start_host(app_dir, args.sync_dir, args.tick_seconds))
        .inspect_err(|e| error!("Host stopped with an error {e:?}"))
}
