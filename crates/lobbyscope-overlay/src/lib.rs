//! Runtime pieces of lobbyscope
//!
//! This crate wires the log parser, stats resolver and ranking together,
//! loads user settings and prints the lobby table.

pub mod app;
pub mod config;
pub mod ui;

pub use app::{Action, Coordinator, CoordinatorConfig, NickChangeHook};
pub use config::{ConfigError, NickEntry, PLACEHOLDER_API_KEY, Settings, SettingsStore};
pub use ui::{TableRenderer, Theme, run_console};
