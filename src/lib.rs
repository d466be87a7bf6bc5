//! Background authority for a per-site time tracker. The browser extension talks to the host
//! over native messaging, the host owns every timer, the Pomodoro cycle and the persisted
//! settings, and tells the pages what to display.
//!
//! A small cli works over the same store for inspecting timers, analytics and the blacklist.

pub mod browser;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fs;
pub mod host;
pub mod utils;
