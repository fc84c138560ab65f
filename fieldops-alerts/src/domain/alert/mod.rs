//! Alert aggregate.

mod entity;
mod events;
mod state;

pub use entity::{Alert, AlertPayload, AlertSnapshot, ChannelOutcome, MAX_ATTEMPTS};
pub use events::AlertEvent;
pub use state::DeliveryState;
