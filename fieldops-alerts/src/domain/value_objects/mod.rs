//! Domain value objects.
//!
//! Value objects are immutable objects that represent concepts in the domain
//! and are defined by their attributes rather than identity.

mod channel;
mod contact;
mod kind;
mod priority;
mod retry_policy;

pub use channel::{Channel, normalize_channel_id};
pub use contact::ContactInfo;
pub use kind::AlertKind;
pub use priority::AlertPriority;
pub use retry_policy::JobRetryPolicy;
