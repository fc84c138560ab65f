//! fieldops-alerts library crate.
//!
//! Alert delivery for field-services operations: the alert aggregate,
//! channel senders, the delivery queue with its worker pool, the retry
//! sweep and the read/ack use case.

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notification;
pub mod queue;
pub mod scheduler;
pub mod services;
pub mod usecases;
pub mod utils;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
