//! Connection settings for the CouchDB court store.

use std::fmt;

use crate::config::CouchSettings;

/// Database used for court snapshots and match history when none is configured.
pub const DEFAULT_DATABASE: &str = "courtside";

/// Where the court store lives and how to authenticate against it.
#[derive(Clone, PartialEq, Eq)]
pub struct CouchConfig {
    /// Server root without a trailing slash.
    pub base_url: String,
    /// Database holding snapshot and history documents.
    pub database: String,
    /// Basic-auth pair; only set when both halves are present.
    pub credentials: Option<(String, String)>,
}

impl CouchConfig {
    /// Anonymous access to `database` on the server at `base_url`.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let database = database.into();
        let database = match database.trim() {
            "" => DEFAULT_DATABASE.to_string(),
            name => name.to_string(),
        };
        Self {
            base_url,
            database,
            credentials: None,
        }
    }

    /// Authenticate with basic auth.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// URL of the court database itself.
    pub fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }
}

impl From<CouchSettings> for CouchConfig {
    fn from(settings: CouchSettings) -> Self {
        let config = Self::new(settings.base_url, settings.database);
        match (settings.username, settings.password) {
            (Some(username), Some(password)) if !username.is_empty() => config.with_credentials(username, password),
            _ => config,
        }
    }
}

impl fmt::Debug for CouchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouchConfig")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("username", &self.credentials.as_ref().map(|(username, _)| username))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(username: Option<&str>, password: Option<&str>) -> CouchSettings {
        CouchSettings {
            base_url: "http://couch:5984/".into(),
            database: "courts".into(),
            username: username.map(Into::into),
            password: password.map(Into::into),
        }
    }

    #[test]
    fn settings_need_both_credentials() {
        let config = CouchConfig::from(settings(Some("admin"), Some("secret")));
        assert_eq!(config.credentials, Some(("admin".into(), "secret".into())));
        assert_eq!(config.database_url(), "http://couch:5984/courts");

        assert!(CouchConfig::from(settings(Some("admin"), None)).credentials.is_none());
        assert!(CouchConfig::from(settings(Some(""), Some("secret"))).credentials.is_none());
    }

    #[test]
    fn blank_database_falls_back_to_default() {
        let config = CouchConfig::new("http://couch:5984", "  ");
        assert_eq!(config.database, DEFAULT_DATABASE);
    }

    #[test]
    fn debug_output_hides_password() {
        let config = CouchConfig::new("http://couch:5984", "courts").with_credentials("admin", "hunter2");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
