//! Domain layer for fieldops-alerts.
//!
//! This module contains the alert aggregate and its value objects.

pub mod alert;
pub mod value_objects;

pub use alert::{
    Alert, AlertEvent, AlertPayload, AlertSnapshot, ChannelOutcome, DeliveryState, MAX_ATTEMPTS,
};
pub use value_objects::*;
