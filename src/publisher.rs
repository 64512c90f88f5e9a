//! Sending notifications.

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::models::{Categories, Config, Credentials, PublicationResponse, PublishReply, PublishRequest, Role};
use reqwest::StatusCode;

/// Publishes messages to subscriber categories.
#[derive(Debug)]
pub struct Publisher {
    api: ApiClient,
}

impl Publisher {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        Self::with_config(Credentials::new(client_id, client_secret), Config::default())
    }

    pub fn with_config(credentials: Credentials, config: Config) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(Role::Publisher, credentials, config)?,
        })
    }

    /// Publish `message` to every subscriber of `categories`.
    ///
    /// Makes exactly one request. A 404 means the keys are unknown and is
    /// reported as [`Error::InvalidCredentials`].
    pub async fn publish(
        &self,
        message: &str,
        categories: impl Into<Categories>,
    ) -> Result<PublicationResponse> {
        let categories = categories.into();
        let request = PublishRequest {
            message,
            category: &categories,
        };
        let reply = self.api.post_notification(&request).await?;

        match reply.status {
            StatusCode::OK => {
                let parsed: PublishReply = serde_json::from_str(&reply.body)
                    .map_err(|e| Error::Parse(format!("publish response: {e}")))?;
                Ok(parsed.into())
            }
            StatusCode::NOT_FOUND => Err(self.api.invalid_credentials()),
            status => Err(Error::FailedToSendMessage { categories, status }),
        }
    }

    /// Publish `message` to the wildcard category.
    pub async fn publish_to_all(&self, message: &str) -> Result<PublicationResponse> {
        self.publish(message, Categories::default()).await
    }
}
