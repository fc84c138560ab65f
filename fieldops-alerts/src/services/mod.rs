//! Service layer module.
//!
//! This module provides the service container that wires and runs the
//! alert delivery services.

pub mod container;

pub use container::ServiceContainer;
