//! Public data models and the JSON shapes exchanged with the API.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which side of the API a credential pair belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Subscriber,
}

impl Role {
    /// Path of the web page where keys for this role are managed.
    pub fn manage_page(self) -> &'static str {
        match self {
            Role::Publisher => PUBLISHERS_PAGE,
            Role::Subscriber => SUBSCRIBERS_PAGE,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => f.write_str("publisher"),
            Role::Subscriber => f.write_str("subscriber"),
        }
    }
}

/// Client ID and secret sent as HTTP basic auth on every request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Connection settings shared by publishers and subscribers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the JSON API.
    pub api_base: String,
    /// Base URL of the web interface, used in error hints.
    pub url_base: String,
    /// Request timeout. `None` keeps the HTTP client's default.
    pub timeout: Option<Duration>,
    /// Proxy URL for all requests.
    pub proxy_url: Option<String>,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            url_base: DEFAULT_URL_BASE.to_string(),
            timeout: None,
            proxy_url: None,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl Config {
    /// Build a config from `NOTIFI_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        if let Some(api_base) = lookup(ENV_API_BASE) {
            cfg.api_base = api_base;
        }
        if let Some(url_base) = lookup(ENV_URL_BASE) {
            cfg.url_base = url_base;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::Config(format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"))
            })?;
            cfg.timeout = Some(Duration::from_secs(secs));
        }
        cfg.proxy_url = lookup(ENV_PROXY).filter(|p| !p.trim().is_empty());
        Ok(cfg.normalized())
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.api_base = self.api_base.trim().trim_end_matches('/').to_string();
        self.url_base = self.url_base.trim().trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    pub(crate) fn manage_url(&self, role: Role) -> String {
        format!("{}{}", self.url_base, role.manage_page())
    }
}

/// Categories a message is published to: one name or a list of names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Categories {
    One(String),
    Many(Vec<String>),
}

impl Default for Categories {
    fn default() -> Self {
        Categories::One(DEFAULT_CATEGORY.to_string())
    }
}

impl fmt::Display for Categories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Categories::One(name) => f.write_str(name),
            Categories::Many(names) => f.write_str(&names.join(", ")),
        }
    }
}

impl From<&str> for Categories {
    fn from(name: &str) -> Self {
        Categories::One(name.to_string())
    }
}

impl From<String> for Categories {
    fn from(name: String) -> Self {
        Categories::One(name)
    }
}

impl From<Vec<String>> for Categories {
    fn from(names: Vec<String>) -> Self {
        Categories::Many(names)
    }
}

impl From<Vec<&str>> for Categories {
    fn from(names: Vec<&str>) -> Self {
        Categories::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Categories {
    fn from(names: &[&str]) -> Self {
        Categories::Many(names.iter().map(|n| n.to_string()).collect())
    }
}

/// Delivery counts reported by the API for one publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublicationResponse {
    /// Subscribers that were notified.
    pub passed: u64,
    /// Subscribers that could not be notified.
    pub failed: u64,
    /// Subscribers the API attempted.
    pub total: u64,
}

impl PublicationResponse {
    pub fn new(passed: u64, failed: u64, total: u64) -> Self {
        Self {
            passed,
            failed,
            total,
        }
    }

    /// Share of attempted subscribers that were notified, `0.0` when none were attempted.
    pub fn passed_percent(&self) -> f64 {
        ratio(self.passed, self.total)
    }

    /// Share of attempted subscribers that were not notified, `0.0` when none were attempted.
    pub fn failed_percent(&self) -> f64 {
        ratio(self.failed, self.total)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64
}

impl fmt::Display for PublicationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<PublicationResponse passed={} failed={} total={}>",
            self.passed, self.failed, self.total
        )
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct PublishRequest<'a> {
    pub message: &'a str,
    pub category: &'a Categories,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishReply {
    pub success: u64,
    pub fail: u64,
    pub total: u64,
}

impl From<PublishReply> for PublicationResponse {
    fn from(reply: PublishReply) -> Self {
        PublicationResponse::new(reply.success, reply.fail, reply.total)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawMessage {
    pub id: i64,
    pub body: String,
    pub created: String,
}
