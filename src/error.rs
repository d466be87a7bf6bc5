use crate::browser::messages::TabId;

/// Errors that can surface inside the background event handlers. None of them are fatal: the
/// event loop logs them and moves on to the next event.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Url can't be turned into a site identity. Such pages are simply not tracked.
    #[error("Url {0:?} has no trackable site")]
    InvalidUrl(String),

    #[error("Tab {0} is not known to the host")]
    TabNotFound(TabId),

    #[error("Storage failure on {key}: {reason}")]
    StorageFailure { key: String, reason: String },

    #[error("Couldn't deliver message: {0}")]
    DeliveryFailure(String),

    #[error("{0}")]
    Validation(String),
}

impl TrackerError {
    pub fn storage(key: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::StorageFailure {
            key: key.into(),
            reason: error.to_string(),
        }
    }
}
