use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::utils::clock::Clock;

use super::event::{HostEvent, TickKind};

/// Posts [HostEvent::Tick] into the event queue on a fixed cadence. Each kind of tick gets its
/// own ticker so pausing one state machine never holds back another.
pub struct Ticker {
    kind: TickKind,
    next: mpsc::Sender<HostEvent>,
    shutdown: CancellationToken,
    interval: Duration,
    clock: Box<dyn Clock>,
}

impl Ticker {
    pub fn new(
        kind: TickKind,
        next: mpsc::Sender<HostEvent>,
        shutdown: CancellationToken,
        interval: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            kind,
            next,
            shutdown,
            interval,
            clock,
        }
    }

    /// Executes the ticker loop until shutdown. The first tick comes one interval after start.
    pub async fn run(self) -> Result<()> {
        let mut tick_point = self.clock.instant();
        loop {
            tick_point += self.interval;
            let now = self.clock.instant();
            if tick_point < now {
                // The loop was held up for longer than an interval. Missed ticks are not
                // replayed, the next one is scheduled from now.
                debug!("{:?} ticker is late by {:?}", self.kind, now - tick_point);
                tick_point = now + self.interval;
            }

            tokio::select! {
                // Cancelation drops the sender, which lets the background drain and stop.
                _ = self.shutdown.cancelled() => {
                    return Ok(())
                }
                _ = self.clock.sleep_until(tick_point) => ()
            }

            trace!("{:?} tick", self.kind);
            self.next
                .send(HostEvent::Tick(self.kind))
                .await
                .inspect_err(|e| error!("Unexpected error during sending {e:?}"))?;
        }
    }
}
