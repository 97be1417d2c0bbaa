//! Log processing for lobbyscope
//!
//! This crate turns client log lines into typed events, folds them into the
//! lobby state, and follows the live log file.

mod lobby;
mod parser;
mod tail;

pub use lobby::LobbyState;
pub use parser::{LogParser, is_valid_username};
pub use tail::{LogTail, read_existing};

// Re-export types used in our public API
pub use lobbyscope_types::{LobbyPhase, LobbyRoster, LogEvent, RosterDelta};
