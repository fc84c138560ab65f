//! Channel senders.
//!
//! One sender per delivery transport:
//! - Email (SMTP)
//! - SMS (HTTP gateway)
//! - Push (HTTP gateway)
//! - In-app inbox (SQLite)

mod email;
mod in_app;
mod push;
mod sms;

pub use email::{EmailConfig, EmailSender};
pub use in_app::InAppSender;
pub use push::{PushConfig, PushSender};
pub use sms::{SmsConfig, SmsSender};

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Alert, ContactInfo};
use crate::error::DeliveryError;

/// A transport able to deliver an alert to a recipient.
///
/// Implementations must bound their own I/O with a timeout and must be safe
/// to call again for the same alert, since jobs can be redelivered.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel identifier this sender is registered under (e.g. `email`).
    fn channel(&self) -> &str;

    /// Make one delivery attempt.
    async fn send(&self, alert: &Alert, recipient: &ContactInfo) -> Result<(), DeliveryError>;
}

/// Run a delivery future, failing with [`DeliveryError::Timeout`] after `after`.
pub(crate) async fn deliver_within<F>(
    channel: &'static str,
    after: Duration,
    fut: F,
) -> Result<(), DeliveryError>
where
    F: Future<Output = Result<(), DeliveryError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout { channel, after }),
    }
}

/// Map a reqwest failure onto a delivery error.
pub(crate) fn request_error(
    channel: &'static str,
    after: Duration,
    error: reqwest::Error,
) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Timeout { channel, after }
    } else {
        DeliveryError::transport(channel, error.to_string())
    }
}

/// Map a non-success gateway response onto a delivery error.
///
/// Client errors are rejections, except timeouts and rate limiting which are
/// worth retrying like server errors.
pub(crate) fn status_error(
    channel: &'static str,
    status: reqwest::StatusCode,
    body: &str,
) -> DeliveryError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{} - {}", status, truncate(body, 200))
    };

    let retryable = status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
    if status.is_client_error() && !retryable {
        DeliveryError::rejected(channel, detail)
    } else {
        DeliveryError::transport(channel, detail)
    }
}

/// Cut `text` to at most `max` characters, on a char boundary.
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
