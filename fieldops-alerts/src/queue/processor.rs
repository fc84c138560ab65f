//! Delivery cycle execution.
//!
//! [`DeliveryProcessor::process_job`] runs one delivery cycle for one alert.
//! Channel failures are captured on the alert and never surface as errors;
//! only persistence failures do, so the broker can retry them with backoff.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::database::repositories::{AlertRepository, RecipientDirectory};
use crate::domain::{Alert, AlertEvent};
use crate::error::Error;
use crate::notification::{ChannelSender, SenderFactory};
use crate::queue::job::DeliveryJob;

/// Capacity of the alert event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Why a job was dropped without a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    AlertNotFound,
    RecipientNotFound,
    RecipientLookupFailed(String),
    UnknownChannel(String),
    UndeclaredChannel(String),
    NoChannels,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlertNotFound => f.write_str("alert not found"),
            Self::RecipientNotFound => f.write_str("recipient not found"),
            Self::RecipientLookupFailed(e) => write!(f, "recipient lookup failed: {e}"),
            Self::UnknownChannel(c) => write!(f, "unknown channel: {c}"),
            Self::UndeclaredChannel(c) => write!(f, "channel not declared on alert: {c}"),
            Self::NoChannels => f.write_str("job has no channels"),
        }
    }
}

/// Result of one delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// At least one channel succeeded, or every requested channel already had.
    Delivered {
        delivered: Vec<String>,
        failed: Vec<String>,
    },
    /// Every channel in the cycle failed; the alert is FAILED or EXHAUSTED.
    AllFailed { failed: Vec<String> },
    /// Nothing was sent. A recipient lookup error still leaves the alert
    /// FAILED for the retry sweep; every other reason is permanent.
    Dropped(DropReason),
}

impl DeliveryOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

/// Executes delivery jobs against the alert store and the channel senders.
pub struct DeliveryProcessor {
    alerts: Arc<dyn AlertRepository>,
    recipients: Arc<dyn RecipientDirectory>,
    senders: Arc<SenderFactory>,
    events: broadcast::Sender<AlertEvent>,
}

impl DeliveryProcessor {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        recipients: Arc<dyn RecipientDirectory>,
        senders: Arc<SenderFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            alerts,
            recipients,
            senders,
            events,
        }
    }

    /// Subscribe to domain events emitted while delivering.
    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.events.subscribe()
    }

    /// Run one delivery cycle.
    pub async fn process_job(&self, job: &DeliveryJob) -> Result<DeliveryOutcome> {
        let Some(mut alert) = self.alerts.find_by_id(&job.alert_id).await? else {
            warn!(alert_id = %job.alert_id, "Alert no longer exists, dropping job");
            return Ok(DeliveryOutcome::Dropped(DropReason::AlertNotFound));
        };

        if job.channels.is_empty() {
            warn!(alert_id = %job.alert_id, "Job has no channels, dropping");
            return Ok(DeliveryOutcome::Dropped(DropReason::NoChannels));
        }

        if let Some(channel) = job.channels.iter().find(|c| !alert.declares_channel(c)) {
            warn!(alert_id = %alert.id(), channel = %channel, "Job names a channel the alert does not declare, dropping");
            return Ok(DeliveryOutcome::Dropped(DropReason::UndeclaredChannel(
                channel.clone(),
            )));
        }

        // Resolve every sender up front so an unknown channel leaves no trace.
        let mut plan: Vec<(String, Arc<dyn ChannelSender>)> = Vec::with_capacity(job.channels.len());
        for channel in &job.channels {
            match self.senders.get_sender(channel) {
                Ok(sender) => plan.push((channel.clone(), sender)),
                Err(e @ Error::UnknownChannel(_)) => {
                    error!(alert_id = %alert.id(), error = %e, "Dropping job");
                    return Ok(DeliveryOutcome::Dropped(DropReason::UnknownChannel(
                        channel.clone(),
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        plan.retain(|(channel, _)| {
            let done = alert.is_delivered_on(channel);
            if done {
                debug!(alert_id = %alert.id(), channel = %channel, "Channel already delivered, skipping");
            }
            !done
        });
        if plan.is_empty() {
            return Ok(DeliveryOutcome::Delivered {
                delivered: Vec::new(),
                failed: Vec::new(),
            });
        }

        let recipient = match self.recipients.get_contact_info(alert.recipient_id()).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => {
                warn!(
                    alert_id = %alert.id(),
                    recipient_id = %alert.recipient_id(),
                    "Recipient not found, dropping job"
                );
                return Ok(DeliveryOutcome::Dropped(DropReason::RecipientNotFound));
            }
            Err(e) => {
                error!(
                    alert_id = %alert.id(),
                    recipient_id = %alert.recipient_id(),
                    error = %e,
                    "Recipient lookup failed, marking cycle failed"
                );
                // Leave the alert FAILED so the retry sweep picks it up.
                let cycle: Vec<&str> = plan.iter().map(|(c, _)| c.as_str()).collect();
                alert.begin_cycle(&cycle);
                for channel in &cycle {
                    alert.mark_channel_failed(channel, format!("recipient lookup failed: {e}"));
                }
                self.persist(&mut alert).await?;
                return Ok(DeliveryOutcome::Dropped(DropReason::RecipientLookupFailed(
                    e.to_string(),
                )));
            }
        };

        let cycle: Vec<&str> = plan.iter().map(|(c, _)| c.as_str()).collect();
        alert.begin_cycle(&cycle);

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        let mut dirty = false;

        for (channel, sender) in &plan {
            match sender.send(&alert, &recipient).await {
                Ok(()) => {
                    alert.mark_channel_delivered(channel);
                    self.persist(&mut alert).await?;
                    dirty = false;
                    debug!(alert_id = %alert.id(), channel = %channel, "Channel delivered");
                    delivered.push(channel.clone());
                }
                Err(e) => {
                    warn!(alert_id = %alert.id(), channel = %channel, error = %e, "Channel delivery failed");
                    alert.mark_channel_failed(channel, &e);
                    dirty = true;
                    failed.push(channel.clone());
                }
            }
        }

        if dirty {
            self.persist(&mut alert).await?;
        }

        if delivered.is_empty() {
            info!(
                alert_id = %alert.id(),
                state = %alert.state(),
                attempts = alert.attempts(),
                "Delivery cycle failed on every channel"
            );
            Ok(DeliveryOutcome::AllFailed { failed })
        } else {
            info!(
                alert_id = %alert.id(),
                delivered = delivered.len(),
                failed = failed.len(),
                "Delivery cycle finished"
            );
            Ok(DeliveryOutcome::Delivered { delivered, failed })
        }
    }

    async fn persist(&self, alert: &mut Alert) -> Result<()> {
        self.alerts.save(alert).await?;
        for event in alert.take_events() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
        Ok(())
    }
}
