use crate::browser::messages::InboundEnvelope;

/// Which of the independent tickers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Timer,
    Pomodoro,
    Sync,
}

/// Everything the background reacts to. All of them go through one queue, so handlers never
/// interleave.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Tick(TickKind),
    Inbound(InboundEnvelope),
}
