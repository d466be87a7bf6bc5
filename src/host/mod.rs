use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use background::Background;
use chrono::{DateTime, Utc};
use event::{HostEvent, TickKind};
use storage::{
    settings::SettingsStore,
    store::{JsonFileStore, KeyValueStore},
};
use sync::SettingsSync;
use ticker::Ticker;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    browser::{
        messages::Outbound,
        native::{InboundReader, NativeMessagingBrowser, OutboundWriter},
    },
    utils::clock::{Clock, DefaultClock},
};

pub mod analytics;
pub mod args;
pub mod background;
pub mod event;
pub mod pomodoro;
pub mod shutdown;
pub mod storage;
pub mod sync;
#[cfg(test)]
pub(crate) mod testing;
pub mod ticker;
pub mod tracker;

pub const STORE_FILE: &str = "storage.json";
pub const SYNC_FILE: &str = "sync.json";

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(6);
const SYNC_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const EVENT_QUEUE_SIZE: usize = 64;
const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Everything an event handler needs from the outside world.
pub struct HostContext<S, B> {
    pub store: SettingsStore<S>,
    pub browser: B,
    clock: Box<dyn Clock>,
}

impl<S, B> HostContext<S, B> {
    pub fn new(store: SettingsStore<S>, browser: B, clock: Box<dyn Clock>) -> Self {
        Self {
            store,
            browser,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.time()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    pub timer_interval: Duration,
    pub pomodoro_interval: Duration,
    pub sync_interval: Duration,
}

impl HostConfig {
    pub fn with_tick_seconds(seconds: u64) -> Self {
        let tick = Duration::from_secs(seconds.max(1));
        Self {
            timer_interval: tick,
            pomodoro_interval: tick,
            sync_interval: SYNC_CHECK_INTERVAL,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::with_tick_seconds(DEFAULT_TICK_INTERVAL.as_secs())
    }
}

/// Represents the starting point for the host. Talks to the browser over stdin and stdout.
pub async fn start_host(dir: PathBuf, sync_dir: Option<PathBuf>, tick_seconds: u64) -> Result<()> {
    let local = JsonFileStore::open(dir.join(STORE_FILE))?;
    let remote = JsonFileStore::open(sync_dir.unwrap_or_else(|| dir.join("sync")).join(SYNC_FILE))?;
    info!(
        "Starting host with store {:?} and sync store {:?}",
        local.path(),
        remote.path()
    );

    run_host(
        tokio::io::stdin(),
        tokio::io::stdout(),
        local,
        remote,
        DefaultClock,
        HostConfig::with_tick_seconds(tick_seconds),
        CancellationToken::new(),
    )
    .await
}

/// Wires the reader, the writer, the tickers and the background together and runs them until
/// the browser goes away or `shutdown` is cancelled.
pub async fn run_host<R, W, S, Q, C>(
    reader: R,
    writer: W,
    local: S,
    remote: Q,
    clock: C,
    config: HostConfig,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: KeyValueStore,
    Q: KeyValueStore,
    C: Clock + Clone,
{
    let (events, receiver) = mpsc::channel::<HostEvent>(EVENT_QUEUE_SIZE);
    let (outbound, outbound_receiver) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_SIZE);

    let reader = InboundReader::new(reader, events.clone(), shutdown.clone());
    let writer = OutboundWriter::new(writer, outbound_receiver);
    let ticker = |kind, interval| {
        Ticker::new(
            kind,
            events.clone(),
            shutdown.clone(),
            interval,
            Box::new(clock.clone()),
        )
    };
    let timer_ticker = ticker(TickKind::Timer, config.timer_interval);
    let pomodoro_ticker = ticker(TickKind::Pomodoro, config.pomodoro_interval);
    let sync_ticker = ticker(TickKind::Sync, config.sync_interval);
    // The background stops once every sender is gone.
    drop(events);

    let ctx = HostContext::new(
        SettingsStore::new(local),
        NativeMessagingBrowser::new(outbound),
        Box::new(clock),
    );
    let mut background = Background::new(ctx, SettingsSync::new(remote));
    if let Err(e) = background.initialize().await {
        error!("Initialization failed, continuing with defaults {e}");
    }

    let (_, reader_result, writer_result, timer_result, pomodoro_result, sync_result, background_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown.clone()),
        reader.run(),
        writer.run(),
        timer_ticker.run(),
        pomodoro_ticker.run(),
        sync_ticker.run(),
        background.run(receiver),
    );

    for (name, result) in [
        ("Inbound reader", reader_result),
        ("Outbound writer", writer_result),
        ("Timer ticker", timer_result),
        ("Pomodoro ticker", pomodoro_result),
        ("Sync ticker", sync_result),
        ("Background", background_result),
    ] {
        if let Err(e) = result {
            error!("{name} got an error {e:?}");
        }
    }
    info!("Host stopped");
    Ok(())
}
