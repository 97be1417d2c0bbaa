use parking_lot::RwLock;
use std::collections::HashMap;

/// Manual nickname -> account mappings. Lookups ignore case.
#[derive(Debug, Default)]
pub struct NickDatabase {
    /// Lowercase nick -> username
    entries: RwLock<HashMap<String, String>>,
}

impl NickDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, N, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, U)>,
        N: AsRef<str>,
        U: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(nick, username)| (nick.as_ref().to_lowercase(), username.into()))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub fn get(&self, nick: &str) -> Option<String> {
        self.entries.read().get(&nick.to_lowercase()).cloned()
    }

    /// Map a nick to a username. Returns the previous mapping.
    pub fn set(&self, nick: &str, username: impl Into<String>) -> Option<String> {
        self.entries
            .write()
            .insert(nick.to_lowercase(), username.into())
    }

    pub fn remove(&self, nick: &str) -> Option<String> {
        self.entries.write().remove(&nick.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
