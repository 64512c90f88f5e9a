//! Messages delivered to a subscriber.

use crate::constants::CREATED_FORMAT;
use crate::error::{Error, Result};
use crate::models::RawMessage;
use crate::subscriber::Subscriber;
use chrono::NaiveDateTime;
use reqwest::StatusCode;
use std::fmt;
use tracing::debug;

/// One pending notification returned by [`Subscriber::poll`].
///
/// Keeps a handle to the subscriber that received it so it can be confirmed
/// with the same credentials.
pub struct Message {
    id: i64,
    body: String,
    created: NaiveDateTime,
    confirmed: bool,
    subscriber: Subscriber,
}

impl Message {
    pub(crate) fn from_raw(raw: RawMessage, subscriber: Subscriber) -> Result<Self> {
        let created = NaiveDateTime::parse_from_str(&raw.created, CREATED_FORMAT).map_err(|e| {
            Error::Parse(format!(
                "message {} has invalid created timestamp '{}': {e}",
                raw.id, raw.created
            ))
        })?;
        Ok(Self {
            id: raw.id,
            body: raw.body,
            created,
            confirmed: false,
            subscriber,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn created(&self) -> NaiveDateTime {
        self.created
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Acknowledge the message.
    ///
    /// A message that is already confirmed returns immediately without
    /// contacting the API.
    pub async fn confirm(&mut self) -> Result<()> {
        if self.confirmed {
            return Ok(());
        }

        // The API takes confirmations as a GET on the notification endpoint.
        let api = self.subscriber.api();
        let reply = api.get_notifications().await?;
        match reply.status {
            StatusCode::OK => {
                self.confirmed = true;
                debug!(message_id = self.id, "message confirmed");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(api.invalid_credentials()),
            status => Err(Error::FailedToConfirmMessage { id: self.id, status }),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview: String = self.body.chars().take(20).collect();
        write!(
            f,
            "<Message id={} body={}... created={}>",
            self.id, preview, self.created
        )
    }
}
