//! Delivery queue: job model, backends, broker, workers and the processor.

mod backend;
mod broker;
mod distributed;
mod inprocess;
mod job;
mod processor;
mod service;
mod worker_pool;

pub use backend::QueueBackend;
pub use broker::{ClaimedJob, JobBroker, RetentionPolicy};
pub use distributed::DistributedBackend;
pub use inprocess::InProcessBackend;
pub use job::{DeliveryJob, QueueMode, QueueStats};
pub use processor::{DeliveryOutcome, DeliveryProcessor, DropReason};
pub use service::{DeliveryEnqueuer, DeliveryQueue, QueueConfig};
pub use worker_pool::{WorkerPool, WorkerPoolConfig};
