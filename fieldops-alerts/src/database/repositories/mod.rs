//! Repository layer for database access.
//!
//! Each repository is a trait with a SQLx implementation so the delivery
//! pipeline can be exercised against in-memory fakes.

pub mod alert;
pub mod delivery_job;
pub mod recipient;

pub use alert::*;
pub use delivery_job::*;
pub use recipient::*;
