mod settings;

pub use settings::{ConfigError, NickEntry, PLACEHOLDER_API_KEY, Settings, SettingsStore};
