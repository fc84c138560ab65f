//! Database models for fieldops-alerts.
//!
//! These models map directly to the database schema and handle
//! serialization/deserialization of JSON fields.

pub mod alert;
pub mod contact;
pub mod delivery_job;

pub use alert::*;
pub use contact::*;
pub use delivery_job::*;
