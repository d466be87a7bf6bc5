pub mod manifest;
pub mod report;

use std::{env, path::PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use manifest::{to_host_path, HostManifest};
use report::{analytics_report, blacklist_report, sites_report};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    domain::extract_identity,
    error::TrackerError,
    host::{
        analytics::{summarize, Period},
        storage::{
            entities::StorageKey,
            settings::SettingsStore,
            store::{JsonFileStore, KeyValueStore},
        },
        STORE_FILE,
    },
    utils::{
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, CLI_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "timespent", version, long_about = None)]
#[command(about = "Inspect and manage the data of the timespent browser extension", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default uses $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "List sites with a running timer and how long they have been open")]
    Sites {},
    #[command(about = "Remove every site timer. Sites start from zero the next time they are opened")]
    Clear {},
    #[command(about = "Summarize recorded usage")]
    Analytics {
        #[arg(
            long,
            short,
            value_enum,
            default_value = "weekly",
            help = "Period ending today to summarize"
        )]
        period: Period,
    },
    #[command(about = "Manage sites that are never tracked")]
    Blacklist {
        #[command(subcommand)]
        command: BlacklistCommand,
    },
    #[command(about = "Print current settings as JSON")]
    Settings {},
    #[command(
        about = "Print the native messaging manifest. Save it into the browser's NativeMessagingHosts directory"
    )]
    Manifest {
        #[arg(
            long = "extension-id",
            required = true,
            help = "Id of the extension allowed to start the host. Can be repeated"
        )]
        extension_ids: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
enum BlacklistCommand {
    #[command(about = "Exempt a domain and its subdomains from tracking")]
    Add {
        #[arg(help = "Domain like example.com, or a url of a page on it")]
        domain: String,
    },
    #[command(about = "Track a domain again")]
    Remove { domain: String },
    #[command(about = "List exempt domains")]
    List {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = args
        .dir
        .map_or_else(create_application_default_path, ensure_dir)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(CLI_PREFIX, &dir.join("logs"), logging_level, args.log)?;

    let store = SettingsStore::new(JsonFileStore::open(dir.join(STORE_FILE))?);
    let output = execute(args.commands, &store, Utc::now()).await?;
    println!("{output}");
    Ok(())
}

async fn execute<S: KeyValueStore>(
    command: Commands,
    store: &SettingsStore<S>,
    now: DateTime<Utc>,
) -> Result<String> {
    match command {
        Commands::Sites {} => {
            let show_seconds = store.timer_settings().await.show_seconds;
            Ok(sites_report(
                &store.site_timers().await,
                &store.blacklist().await,
                now,
                show_seconds,
            ))
        }
        Commands::Clear {} => {
            let count = store.site_timers().await.len();
            store.remove(StorageKey::SiteTimers).await?;
            info!("Cleared {count} site timers from the cli");
            Ok(format!("Cleared {count} site timers"))
        }
        Commands::Analytics { period } => {
            let today = now.with_timezone(&Local).date_naive();
            let summary = summarize(&store.analytics().await, period, today);
            Ok(analytics_report(&summary, period))
        }
        Commands::Blacklist { command } => blacklist(command, store).await,
        Commands::Settings {} => Ok(serde_json::to_string_pretty(&store.snapshot().await)?),
        Commands::Manifest { extension_ids } => {
            let manifest = HostManifest::new(to_host_path(env::current_exe()?), &extension_ids);
            Ok(serde_json::to_string_pretty(&manifest)?)
        }
    }
}

async fn blacklist<S: KeyValueStore>(
    command: BlacklistCommand,
    store: &SettingsStore<S>,
) -> Result<String> {
    let mut blacklist = store.blacklist().await;
    match command {
        BlacklistCommand::Add { domain } => {
            // People tend to paste whole urls.
            let domain = extract_identity(&domain)
                .map(|v| v.to_string())
                .unwrap_or(domain);
            if !blacklist.insert(&domain) {
                return Err(TrackerError::Validation(format!(
                    "{domain:?} is empty or already blacklisted"
                ))
                .into());
            }
            store.save(StorageKey::SiteBlacklist, &blacklist).await?;
            Ok(format!("Added {domain}"))
        }
        BlacklistCommand::Remove { domain } => {
            if !blacklist.remove(&domain) {
                return Err(
                    TrackerError::Validation(format!("{domain:?} is not blacklisted")).into(),
                );
            }
            store.save(StorageKey::SiteBlacklist, &blacklist).await?;
            Ok(format!("Removed {domain}"))
        }
        BlacklistCommand::List {} => Ok(blacklist_report(&blacklist)),
    }
}
