//! Storage is a flat JSON key-value store, the same shape the extension keeps in
//! `chrome.storage`:
//!  - [store::KeyValueStore] abstracts the raw store, [store::JsonFileStore] keeps it in a
//!    single locked file so the cli can read it while the host is running.
//!  - [settings::SettingsStore] gives typed access and falls back to defaults, so a missing
//!    key or a failing read never stops an event handler.

pub mod entities;
pub mod settings;
pub mod store;
