//! Application-level configuration loading: JSON file first, then environment overrides.

use std::{collections::BTreeMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{services::player_directory::DirectoryEntry, state::CourtConfig, uno::UnoConfig};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/courtside.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COURTSIDE_CONFIG_PATH";
const DEFAULT_PORT: u16 = 8080;

/// Connection settings of the CouchDB backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CouchSettings {
    pub base_url: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub port: u16,
    pub uno: UnoConfig,
    /// Courts registered at startup.
    pub courts: BTreeMap<String, CourtConfig>,
    /// Entries of the player directory used for flag lookups.
    pub players: Vec<DirectoryEntry>,
    /// Persistence backend; the in-memory store is used when absent.
    pub couch: Option<CouchSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            uno: UnoConfig::default(),
            courts: BTreeMap::new(),
            players: Vec::new(),
            couch: None,
        }
    }
}

impl AppConfig {
    /// Load the configuration file, falling back to defaults, then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::from_file();
        config.apply_env(|key| env::var(key).ok());
        config
    }

    fn from_file() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        courts = config.courts.len(),
                        players = config.players.len(),
                        "loaded configuration file"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Override individual knobs from `lookup` (the process environment outside tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty());

        if let Some(port) = get("PORT").or_else(|| get("SERVER_PORT")) {
            override_parsed(&mut self.port, "PORT", &port);
        }

        let uno = &mut self.uno;
        if let Some(base_url) = get("UNO_BASE_URL") {
            uno.base_url = base_url;
        }
        if let Some(bearer) = get("UNO_AUTH_BEARER") {
            uno.bearer = Some(bearer);
        }
        if let Some(raw) = get("UNO_REQUESTS_ENABLED") {
            match parse_flag(&raw) {
                Some(enabled) => uno.requests_enabled = enabled,
                None => warn!(key = "UNO_REQUESTS_ENABLED", value = %raw, "ignoring invalid boolean"),
            }
        }
        if let Some(raw) = get("UNO_RPM") {
            override_parsed(&mut uno.rpm, "UNO_RPM", &raw);
        }
        if let Some(raw) = get("UNO_BURST") {
            override_parsed(&mut uno.burst, "UNO_BURST", &raw);
        }
        if let Some(raw) = get("UNO_HOURLY_LIMIT") {
            override_parsed(&mut uno.hourly_limit, "UNO_HOURLY_LIMIT", &raw);
        }
        if let Some(raw) = get("UNO_HOURLY_THRESHOLD") {
            override_parsed(&mut uno.hourly_threshold, "UNO_HOURLY_THRESHOLD", &raw);
        }
        if let Some(raw) = get("UNO_SLOWDOWN_FACTOR") {
            override_parsed(&mut uno.slowdown_factor, "UNO_SLOWDOWN_FACTOR", &raw);
        }
        if let Some(raw) = get("UNO_SLOWDOWN_SLEEP_SECONDS") {
            let mut seconds = uno.slowdown_sleep.as_secs();
            override_parsed(&mut seconds, "UNO_SLOWDOWN_SLEEP_SECONDS", &raw);
            uno.slowdown_sleep = Duration::from_secs(seconds);
        }
        if let Some(raw) = get("UNO_REQUEST_TIMEOUT_SECONDS") {
            let mut seconds = uno.request_timeout.as_secs();
            override_parsed(&mut seconds, "UNO_REQUEST_TIMEOUT_SECONDS", &raw);
            uno.request_timeout = Duration::from_secs(seconds);
        }
        if let Some(raw) = get("UNO_ACTIVITY_THRESHOLDS_MINUTES") {
            match parse_list::<u64, 3>(&raw) {
                Some(thresholds) => uno.activity_thresholds_minutes = thresholds,
                None => warn!(key = "UNO_ACTIVITY_THRESHOLDS_MINUTES", value = %raw, "expected three minutes values"),
            }
        }
        if let Some(raw) = get("UNO_ACTIVITY_MULTIPLIERS") {
            match parse_list::<f64, 4>(&raw) {
                Some(multipliers) => uno.activity_multipliers = multipliers,
                None => warn!(key = "UNO_ACTIVITY_MULTIPLIERS", value = %raw, "expected four multipliers"),
            }
        }

        if let Some(raw) = get("COURTS") {
            self.courts.extend(parse_courts(&raw));
        }

        if let (Some(base_url), Some(database)) = (get("COUCH_BASE_URL"), get("COUCH_DB")) {
            self.couch = Some(CouchSettings {
                base_url,
                database,
                username: get("COUCH_USERNAME"),
                password: get("COUCH_PASSWORD"),
            });
        }
    }
}

fn override_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list<T: std::str::FromStr, const N: usize>(raw: &str) -> Option<[T; N]> {
    let values = raw
        .split(',')
        .map(|part| part.trim().parse::<T>().ok())
        .collect::<Option<Vec<T>>>()?;
    values.try_into().ok()
}

/// Parse `kort=overlay[:pin]` entries separated by commas.
fn parse_courts(raw: &str) -> Vec<(String, CourtConfig)> {
    raw.split(',')
        .filter_map(|entry| {
            let (kort_id, rest) = entry.split_once('=').unwrap_or((entry, ""));
            let kort_id = kort_id.trim();
            if kort_id.is_empty() {
                warn!(entry, "ignoring court entry without id");
                return None;
            }
            let (overlay, pin) = match rest.split_once(':') {
                Some((overlay, pin)) => (overlay, Some(pin)),
                None => (rest, None),
            };
            let non_empty = |value: &str| Some(value.trim().to_string()).filter(|value| !value.is_empty());
            Some((
                kort_id.to_string(),
                CourtConfig {
                    overlay_id: non_empty(overlay),
                    pin: pin.and_then(non_empty),
                },
            ))
        })
        .collect()
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
