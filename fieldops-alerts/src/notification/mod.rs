//! Alert delivery transports.
//!
//! Every transport implements [`ChannelSender`]; the [`SenderFactory`]
//! maps channel identifiers (`email`, `sms`, `push`, `in_app`) to the
//! registered senders.
//!
//! # Example
//!
//! ```ignore
//! use fieldops_alerts::notification::{ChannelsConfig, SenderFactory};
//!
//! let factory = SenderFactory::from_config(&ChannelsConfig::default(), pool)?;
//! let sender = factory.get_sender("email")?;
//! sender.send(&alert, &contact).await?;
//! ```

pub mod channels;
mod factory;

pub use channels::{
    ChannelSender, EmailConfig, EmailSender, InAppSender, PushConfig, PushSender, SmsConfig,
    SmsSender,
};
pub use factory::{ChannelsConfig, SenderFactory};
