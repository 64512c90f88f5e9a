//! Client for the Notifi publish/subscribe notification API.
//!
//! A [`Publisher`] sends messages to categories of subscribers. A
//! [`Subscriber`] polls for pending [`Message`]s, either once, in a loop on
//! the current task, or on a background task that can be stopped through its
//! [`PollHandle`].

mod client;
pub mod constants;
pub mod error;
pub mod message;
pub mod models;
pub mod publisher;
pub mod subscriber;

pub use constants::{
    default_poll_interval, DEFAULT_API_BASE, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_URL_BASE,
};
pub use error::{Error, Result};
pub use message::Message;
pub use models::{Categories, Config, Credentials, PublicationResponse, Role};
pub use publisher::Publisher;
pub use subscriber::{PollHandle, PollOptions, Subscriber};
pub use tokio_util::sync::CancellationToken;
