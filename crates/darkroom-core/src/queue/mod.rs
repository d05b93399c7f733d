//! Task queue collaborator.
//!
//! The core speaks to a durable, at-least-once broker through [`TaskQueue`].
//! A delivery stays owned by its consumer until it is acked or nacked; a
//! consumer that goes away without doing either hands its deliveries back to
//! the queue.

pub mod job;
mod memory;

pub use job::{DeadLetter, TransformationJob};
pub use memory::MemoryQueue;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::QueueError;

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned tag used to ack or nack this delivery
    pub tag: u64,
    pub payload: Vec<u8>,
    /// How many times this message has been delivered, including this one
    pub attempt: u32,
}

/// Deliveries for one consumer. The stream ends when the connection is lost
/// or the queue is closed.
pub type DeliveryStream = BoxStream<'static, Delivery>;

/// Durable at-least-once work queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Create `queue` if needed. Declaring twice is a no-op.
    async fn declare_durable(&self, queue: &str) -> Result<(), QueueError>;

    /// Append a message. `persistent` messages survive a broker restart.
    async fn publish(&self, queue: &str, payload: Vec<u8>, persistent: bool)
        -> Result<(), QueueError>;

    /// Start a consumer holding at most `prefetch` unacknowledged deliveries.
    async fn consume(&self, queue: &str, prefetch: usize) -> Result<DeliveryStream, QueueError>;

    /// Remove a delivered message for good.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reject a delivery; with `requeue` it goes back to the queue.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;

    /// Close the connection. Open consumer streams end and their unacked
    /// deliveries return to the queue.
    async fn close(&self) -> Result<(), QueueError>;
}
