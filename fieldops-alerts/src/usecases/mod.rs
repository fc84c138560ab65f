//! Application use cases driven by the scheduler and the API layer.

mod mark_read;
mod retry_sweep;

pub use mark_read::MarkAlertRead;
pub use retry_sweep::{DEFAULT_STALE_PENDING, RetrySweep, SweepReport};
