mod table;
mod theme;

pub use table::{TableRenderer, run_console};
pub use theme::Theme;
