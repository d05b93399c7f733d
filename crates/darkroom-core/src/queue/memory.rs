//! In-process broker implementing [`TaskQueue`].
//!
//! Behaves like a single durable broker node for the lifetime of the
//! process: declared queues, per-consumer prefetch, redelivery counting and
//! requeue of unacked deliveries when a consumer goes away. Used by the CLI
//! and by tests, which can also simulate an outage or a dropped connection.

use async_trait::async_trait;
use futures_util::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use super::{Delivery, DeliveryStream, TaskQueue};
use crate::error::QueueError;

struct Message {
    payload: Vec<u8>,
    deliveries: u32,
}

struct Unacked {
    queue: String,
    consumer: u64,
    message: Message,
    // Released on ack/nack/requeue, freeing a prefetch slot.
    _permit: OwnedSemaphorePermit,
}

struct State {
    queues: HashMap<String, VecDeque<Message>>,
    unacked: HashMap<u64, Unacked>,
    consumers: HashMap<u64, Arc<Semaphore>>,
    next_tag: u64,
    next_consumer: u64,
    generation: u64,
    available: bool,
    closed: bool,
}

impl State {
    fn check_open(&self) -> Result<(), QueueError> {
        if self.closed {
            Err(QueueError::Closed)
        } else if !self.available {
            Err(QueueError::Unavailable("broker unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn requeue(&mut self, unacked: Unacked) {
        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            queue.push_back(unacked.message);
        }
    }

    fn requeue_where(&mut self, pred: impl Fn(&Unacked) -> bool) -> usize {
        let tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| pred(u))
            .map(|(tag, _)| *tag)
            .collect();
        for tag in &tags {
            if let Some(unacked) = self.unacked.remove(tag) {
                self.requeue(unacked);
            }
        }
        tags.len()
    }

    fn drop_consumers(&mut self) {
        for (_, permits) in self.consumers.drain() {
            permits.close();
        }
    }
}

struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process task queue.
#[derive(Clone)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queues: HashMap::new(),
                    unacked: HashMap::new(),
                    consumers: HashMap::new(),
                    next_tag: 0,
                    next_consumer: 0,
                    generation: 0,
                    available: true,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Messages waiting in `queue`, not counting unacked deliveries.
    pub fn ready(&self, queue: &str) -> usize {
        self.shared.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Deliveries handed out and not yet acked or nacked.
    pub fn unacked(&self) -> usize {
        self.shared.lock().unacked.len()
    }

    /// Remove and return every waiting message in `queue`.
    pub fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).map(|m| m.payload).collect())
            .unwrap_or_default()
    }

    /// Simulate the broker becoming unreachable (or reachable again).
    /// Existing consumers keep their streams.
    pub fn set_available(&self, available: bool) {
        self.shared.lock().available = available;
    }

    /// Simulate a dropped connection: every consumer stream ends and all
    /// unacked deliveries return to their queues.
    pub fn disconnect(&self) {
        let requeued = {
            let mut state = self.shared.lock();
            state.generation += 1;
            state.drop_consumers();
            state.requeue_where(|_| true)
        };
        tracing::debug!("Queue connection dropped, {} deliveries requeued", requeued);
        self.shared.notify.notify_waiters();
    }

    fn open_consumer(&self, queue: &str, prefetch: usize) -> Result<Consumer, QueueError> {
        let mut state = self.shared.lock();
        state.check_open()?;
        if !state.queues.contains_key(queue) {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }
        state.next_consumer += 1;
        let id = state.next_consumer;
        let permits = Arc::new(Semaphore::new(prefetch.max(1)));
        state.consumers.insert(id, permits.clone());
        Ok(Consumer {
            shared: self.shared.clone(),
            queue: queue.to_string(),
            id,
            generation: state.generation,
            permits,
        })
    }
}

/// One consumer's view of a queue. Dropping it requeues whatever it still
/// holds, like a broker does when a channel closes.
struct Consumer {
    shared: Arc<Shared>,
    queue: String,
    id: u64,
    generation: u64,
    permits: Arc<Semaphore>,
}

impl Consumer {
    async fn next(&self) -> Option<Delivery> {
        // Waits here while the consumer is at its prefetch limit.
        let permit = self.permits.clone().acquire_owned().await.ok()?;
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.lock();
                if state.closed || state.generation != self.generation {
                    return None;
                }
                let next = state
                    .queues
                    .get_mut(&self.queue)
                    .and_then(VecDeque::pop_front);
                if let Some(mut message) = next {
                    message.deliveries += 1;
                    state.next_tag += 1;
                    let delivery = Delivery {
                        tag: state.next_tag,
                        payload: message.payload.clone(),
                        attempt: message.deliveries,
                    };
                    state.unacked.insert(
                        delivery.tag,
                        Unacked {
                            queue: self.queue.clone(),
                            consumer: self.id,
                            message,
                            _permit: permit,
                        },
                    );
                    return Some(delivery);
                }
            }
            notified.await;
        }
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let id = self.id;
        let requeued = {
            let mut state = self.shared.lock();
            state.consumers.remove(&id);
            state.requeue_where(|u| u.consumer == id)
        };
        if requeued > 0 {
            self.shared.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn declare_durable(&self, queue: &str) -> Result<(), QueueError> {
        let mut state = self.shared.lock();
        state.check_open()?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        payload: Vec<u8>,
        _persistent: bool,
    ) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock();
            state.check_open()?;
            let target = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
            target.push_back(Message {
                payload,
                deliveries: 0,
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: usize) -> Result<DeliveryStream, QueueError> {
        let consumer = self.open_consumer(queue, prefetch)?;
        tracing::debug!(queue, prefetch, consumer = consumer.id, "Consumer started");
        let deliveries = stream::unfold(consumer, |consumer| async move {
            let delivery = consumer.next().await?;
            Some((delivery, consumer))
        });
        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.shared
            .lock()
            .unacked
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(delivery.tag))
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock();
            let unacked = state
                .unacked
                .remove(&delivery.tag)
                .ok_or(QueueError::UnknownDelivery(delivery.tag))?;
            if requeue {
                state.requeue(unacked);
            }
        }
        if requeue {
            self.shared.notify.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        {
            let mut state = self.shared.lock();
            state.closed = true;
            state.drop_consumers();
            state.requeue_where(|_| true);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
