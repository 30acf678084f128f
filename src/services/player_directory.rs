//! Player flag lookup used when names change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Flag known for a player.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerFlag {
    pub flag_url: Option<String>,
    pub flag_code: Option<String>,
}

impl PlayerFlag {
    pub fn is_empty(&self) -> bool {
        self.flag_url.is_none() && self.flag_code.is_none()
    }
}

/// External player directory keyed by normalized surname.
pub trait PlayerDirectory: Send + Sync {
    fn lookup(&self, surname: &str) -> Option<PlayerFlag>;
}

/// Lower-cased surname with everything but letters and digits removed.
pub fn normalize_surname(surname: &str) -> String {
    surname
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Player entry as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryEntry {
    pub surname: String,
    #[serde(default)]
    pub flag_url: Option<String>,
    #[serde(default)]
    pub flag_code: Option<String>,
}

/// In-memory directory loaded from configuration.
#[derive(Debug, Default)]
pub struct StaticPlayerDirectory {
    players: HashMap<String, PlayerFlag>,
}

impl StaticPlayerDirectory {
    pub fn new(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
        let players = entries
            .into_iter()
            .filter_map(|entry| {
                let flag = PlayerFlag {
                    flag_url: entry.flag_url.filter(|url| !url.trim().is_empty()),
                    flag_code: entry.flag_code.filter(|code| !code.trim().is_empty()),
                };
                let key = normalize_surname(&entry.surname);
                (!key.is_empty() && !flag.is_empty()).then_some((key, flag))
            })
            .collect();
        Self { players }
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl PlayerDirectory for StaticPlayerDirectory {
    fn lookup(&self, surname: &str) -> Option<PlayerFlag> {
        self.players.get(&normalize_surname(surname)).cloned()
    }
}
