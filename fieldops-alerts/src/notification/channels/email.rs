//! Email sender using SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChannelSender, deliver_within};
use crate::domain::{Alert, AlertPriority, ContactInfo};
use crate::error::DeliveryError;
use crate::utils::http_client::install_rustls_provider;
use crate::{Error, Result};

const CHANNEL: &str = "email";

/// Email sender configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Whether the sender is registered at all.
    pub enabled: bool,
    /// SMTP server host.
    pub smtp_host: String,
    /// SMTP server port.
    pub smtp_port: u16,
    /// SMTP username.
    pub smtp_username: Option<String>,
    /// SMTP password.
    pub smtp_password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    pub use_starttls: bool,
    /// Sender address, e.g. `FieldOps <alerts@example.com>`.
    pub from_address: String,
    /// Bound on a whole SMTP exchange.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    15
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            use_starttls: true,
            from_address: "FieldOps Alerts <alerts@localhost>".to_string(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Email sender.
pub struct EmailSender {
    config: EmailConfig,
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailSender {
    /// Create a new email sender. No connection is opened until the first send.
    pub fn new(config: EmailConfig) -> Result<Self> {
        install_rustls_provider();

        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| Error::config(format!("Invalid SMTP from address: {e}")))?;

        let mut builder = if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| Error::config(format!("Invalid SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            config,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Build the email subject.
    fn build_subject(&self, alert: &Alert) -> String {
        format!("[{}] {}", alert.payload().priority, alert.payload().title)
    }

    /// Build the email body (plain text).
    fn build_body_text(&self, alert: &Alert) -> String {
        let payload = alert.payload();
        format!(
            "{}\n\n{}\n\nPriority: {}\nType: {}\nReference: {}",
            payload.title, payload.message, payload.priority, payload.kind, alert.id()
        )
    }

    /// Build the email body (HTML).
    fn build_body_html(&self, alert: &Alert) -> String {
        let payload = alert.payload();
        let priority_color = match payload.priority {
            AlertPriority::Info => "#3498db",
            AlertPriority::Warning => "#f39c12",
            AlertPriority::Error => "#e67e22",
            AlertPriority::Critical => "#e74c3c",
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .header {{ background-color: {}; color: white; padding: 15px; border-radius: 5px; }}
        .content {{ padding: 20px; background-color: #f9f9f9; border-radius: 5px; margin-top: 10px; }}
        .footer {{ color: #666; font-size: 12px; margin-top: 20px; }}
    </style>
</head>
<body>
    <div class="header">
        <h2>{}</h2>
    </div>
    <div class="content">
        <p>{}</p>
    </div>
    <div class="footer">
        <p>Priority: {} | Type: {} | Reference: {}</p>
    </div>
</body>
</html>"#,
            priority_color,
            escape_html(&payload.title),
            escape_html(&payload.message),
            payload.priority,
            payload.kind,
            alert.id()
        )
    }

    fn build_message(&self, alert: &Alert, to: Mailbox) -> std::result::Result<Message, DeliveryError> {
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(self.build_subject(alert))
            .multipart(MultiPart::alternative_plain_html(
                self.build_body_text(alert),
                self.build_body_html(alert),
            ))
            .map_err(|e| DeliveryError::rejected(CHANNEL, format!("cannot build message: {e}")))
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> &str {
        CHANNEL
    }

    async fn send(&self, alert: &Alert, recipient: &ContactInfo) -> std::result::Result<(), DeliveryError> {
        let address = recipient.email.as_deref().ok_or(DeliveryError::MissingAddress {
            channel: CHANNEL,
            field: "email address",
        })?;
        let to: Mailbox = address
            .parse()
            .map_err(|e| DeliveryError::rejected(CHANNEL, format!("invalid address {address}: {e}")))?;
        let message = self.build_message(alert, to)?;

        deliver_within(CHANNEL, self.timeout(), async {
            self.transport
                .send(message)
                .await
                .map(|_| ())
                .map_err(|e| {
                    if e.is_permanent() {
                        DeliveryError::rejected(CHANNEL, e.to_string())
                    } else {
                        DeliveryError::transport(CHANNEL, e.to_string())
                    }
                })
        })
        .await?;

        debug!(alert_id = %alert.id(), "Alert email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertKind, AlertPayload};

    fn alert() -> Alert {
        let payload = AlertPayload::new(
            AlertKind::ExpiredCertification,
            AlertPriority::Critical,
            "Certification expired",
            "Working-at-height certificate of J. Soto expired <today>",
        )
        .unwrap();
        Alert::new("tech-3", ["email"], payload).unwrap()
    }

    #[test]
    fn test_email_config_default() {
        let config = EmailConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.smtp_port, 587);
        assert!(config.use_starttls);
        assert_eq!(config.timeout_secs, 15);
    }

    #[test]
    fn test_invalid_from_address_is_config_error() {
        let config = EmailConfig {
            from_address: "not an address".to_string(),
            ..Default::default()
        };
        assert!(matches!(EmailSender::new(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_build_subject_and_body() {
        let sender = EmailSender::new(EmailConfig::default()).unwrap();
        let alert = alert();

        let subject = sender.build_subject(&alert);
        assert_eq!(subject, "[CRITICAL] Certification expired");

        let text = sender.build_body_text(&alert);
        assert!(text.contains("EXPIRED_CERTIFICATION"));
        assert!(text.contains(alert.id()));

        let html = sender.build_body_html(&alert);
        assert!(html.contains("&lt;today&gt;"));
        assert!(html.contains("#e74c3c"));
    }

    #[tokio::test]
    async fn test_missing_email_address() {
        let sender = EmailSender::new(EmailConfig::default()).unwrap();
        let err = sender
            .send(&alert(), &ContactInfo::new("tech-3"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DeliveryError::MissingAddress {
                channel: "email",
                field: "email address"
            }
        );
    }
}
