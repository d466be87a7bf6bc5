//! Everything that crosses the boundary between the host and the browser.
//! [BrowserApi] is the contract the background talks through, [native::NativeMessagingBrowser]
//! is its realization on top of native messaging.

pub mod messages;
pub mod native;

use messages::{BrowserMessage, Notification, RequestId, Response, TabId};
use tracing::debug;

use crate::error::TrackerError;

/// Outbound side of the browser. Every send is fire-and-forget from the browser's point of
/// view, failures only mean the message couldn't be handed over.
#[cfg_attr(test, mockall::automock)]
pub trait BrowserApi {
    fn send_to_tab(&self, tab_id: TabId, message: BrowserMessage) -> Result<(), TrackerError>;

    /// Sends to every extension page, like `chrome.runtime.sendMessage`.
    fn broadcast(&self, message: BrowserMessage) -> Result<(), TrackerError>;

    fn notify(&self, notification: Notification) -> Result<(), TrackerError>;

    fn reply(&self, request_id: RequestId, payload: Response) -> Result<(), TrackerError>;
}

/// Sends to a tab and drops the failure after logging it. Tabs disappear all the time, the next
/// tick or tab event will carry a fresher update anyway.
pub fn deliver_to_tab(browser: &impl BrowserApi, tab_id: TabId, message: BrowserMessage) {
    if let Err(e) = browser.send_to_tab(tab_id, message) {
        debug!("Could not deliver to tab {tab_id}: {e}");
    }
}
