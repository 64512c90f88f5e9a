use std::time::Duration;

pub const DEFAULT_URL_BASE: &str = "http://localhost:5000";
pub const DEFAULT_API_BASE: &str = "http://localhost:5000/api";
pub const NOTIFICATION_PATH: &str = "/notification";

pub const PUBLISHERS_PAGE: &str = "/notifi/publishers";
pub const SUBSCRIBERS_PAGE: &str = "/notifi/subscribers/device";

pub const DEFAULT_CATEGORY: &str = "*";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_TASK_NAME: &str = "Notifi Poll Thread";

/// Layout of the `created` field on polled messages.
pub const CREATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub const USER_AGENT: &str = concat!("notifi-client/", env!("CARGO_PKG_VERSION"));

// Environment keys read by `Config::from_env`
pub const ENV_API_BASE: &str = "NOTIFI_API_BASE";
pub const ENV_URL_BASE: &str = "NOTIFI_URL_BASE";
pub const ENV_TIMEOUT_SECS: &str = "NOTIFI_TIMEOUT_SECS";
pub const ENV_PROXY: &str = "NOTIFI_PROXY";

pub fn default_poll_interval() -> Duration {
    Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
}
