//! Durable write queue for mutations made while offline.

pub mod item;
pub mod write_queue;

pub use item::{Operation, QueueItem};
pub use write_queue::{DrainSnapshot, WriteQueue, QUEUE_KEY};
