use crate::constants::NOTIFICATION_PATH;
use crate::error::{Error, Result};
use crate::models::{Config, Credentials, Role};
use reqwest::{header::HeaderValue, Client, ClientBuilder, RequestBuilder, StatusCode};
use serde::Serialize;
use tracing::debug;

/// Authenticated transport shared by publishers and subscribers.
///
/// Every call is a single request with no retry; the caller decides what a
/// status code means.
#[derive(Debug)]
pub(crate) struct ApiClient {
    role: Role,
    credentials: Credentials,
    config: Config,
    client: Client,
}

/// Status and raw body of one API response.
pub(crate) struct Reply {
    pub status: StatusCode,
    pub body: String,
}

impl ApiClient {
    pub fn new(role: Role, credentials: Credentials, config: Config) -> Result<Self> {
        let config = config.normalized();
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|_| Error::Config(format!("invalid user agent '{}'", config.user_agent)))?;

        let mut builder = ClientBuilder::new().user_agent(user_agent);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy).map_err(Error::Http)?);
        }

        let client = builder.build().map_err(Error::Http)?;

        Ok(Self {
            role,
            credentials,
            config,
            client,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn get_notifications(&self) -> Result<Reply> {
        let url = self.config.endpoint(NOTIFICATION_PATH);
        self.send("GET", self.client.get(&url)).await
    }

    pub async fn post_notification<T: Serialize + ?Sized>(&self, body: &T) -> Result<Reply> {
        let url = self.config.endpoint(NOTIFICATION_PATH);
        self.send("POST", self.client.post(&url).json(body)).await
    }

    /// The error every operation returns for a 404.
    pub fn invalid_credentials(&self) -> Error {
        Error::InvalidCredentials {
            role: self.role,
            manage_url: self.config.manage_url(self.role),
        }
    }

    async fn send(&self, method: &'static str, request: RequestBuilder) -> Result<Reply> {
        let resp = request
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .send()
            .await?;
        let status = resp.status();
        // Only a 200 needs its body; a failed read elsewhere must not hide the status.
        let body = match resp.text().await {
            Ok(body) => body,
            Err(err) if status != StatusCode::OK => {
                debug!(status = status.as_u16(), error = %err, "discarding unreadable error body");
                String::new()
            }
            Err(err) => return Err(err.into()),
        };
        debug!(
            role = %self.role,
            method,
            path = NOTIFICATION_PATH,
            status = status.as_u16(),
            "notifi api call"
        );
        Ok(Reply { status, body })
    }
}
