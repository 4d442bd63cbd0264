//! In-process broker for tests and single-process setups.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use super::transport::{Delivery, DeliveryStream, Listener, Publisher, Sender, TransportError};

/// In-memory broker with exchanges, bindings and settlement tracking.
///
/// Features:
/// - Thread-safe (can be shared across engines via `Clone`)
/// - Fan-out exchanges: a publish copies the frame into every bound queue
/// - Competing consumers: each queue hands frames to its consumers round robin
/// - Unacked deliveries are tracked per queue and per consumer; `nack` with
///   requeue puts the frame back at the head of the queue flagged as
///   redelivered
/// - A cancelled consumer gives back the frames it has not taken yet; a
///   dropped consumer gives back everything it has not settled
///
/// Two engines sharing one broker behave like two processes connected to the
/// same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Vec<String>>,
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    next_consumer_id: u64,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Pending>,
    unacked: HashMap<u64, Unacked>,
    consumers: Vec<Consumer>,
    next_consumer: usize,
    acked: usize,
    rejected: usize,
}

struct Consumer {
    id: u64,
    tag: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Clone)]
struct Pending {
    body: Vec<u8>,
    redelivered: bool,
}

struct Unacked {
    pending: Pending,
    consumer: u64,
    taken: bool,
}

impl QueueState {
    /// Detach a consumer and requeue its unsettled frames in delivery order.
    ///
    /// With `taken_too` unset, frames the consumer already read stay unacked.
    fn release(&mut self, consumer: u64, taken_too: bool) -> usize {
        self.consumers.retain(|c| c.id != consumer);

        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| u.consumer == consumer && (taken_too || !u.taken))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();

        for tag in tags.iter().rev() {
            if let Some(unacked) = self.unacked.remove(tag) {
                let mut pending = unacked.pending;
                pending.redelivered = true;
                self.ready.push_front(pending);
            }
        }
        tags.len()
    }
}

impl BrokerState {
    /// Hand ready frames to live consumers until one side runs out.
    fn pump(&mut self, queue: &str) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };

        while !state.ready.is_empty() && !state.consumers.is_empty() {
            let index = state.next_consumer % state.consumers.len();
            let Some(pending) = state.ready.pop_front() else {
                break;
            };

            self.next_tag += 1;
            let delivery = Delivery {
                queue: queue.to_string(),
                delivery_tag: self.next_tag,
                body: pending.body.clone(),
                redelivered: pending.redelivered,
            };

            let consumer = &state.consumers[index];
            match consumer.sender.send(delivery) {
                Ok(()) => {
                    let unacked = Unacked {
                        pending,
                        consumer: consumer.id,
                        taken: false,
                    };
                    state.unacked.insert(self.next_tag, unacked);
                    state.next_consumer = index + 1;
                }
                Err(_) => {
                    trace!(queue, "dropping closed consumer");
                    let id = consumer.id;
                    state.ready.push_front(pending);
                    state.release(id, true);
                }
            }
        }
    }

    fn enqueue(&mut self, queue: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let state = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
        state.ready.push_back(Pending {
            body,
            redelivered: false,
        });
        self.pump(queue);
        Ok(())
    }

    /// Remove a consumer and requeue what it holds, then redistribute.
    fn release(&mut self, queue: &str, consumer: u64, taken_too: bool) {
        let Some(state) = self.queues.get_mut(queue) else {
            return;
        };
        let requeued = state.release(consumer, taken_too);
        if requeued > 0 {
            debug!(queue, consumer, requeued, "unsettled deliveries returned to queue");
        }
        self.pump(queue);
    }

    /// Mark a delivery as read by its consumer. `false` if it was taken back.
    fn take(&mut self, queue: &str, consumer: u64, delivery_tag: u64) -> bool {
        self.queues
            .get_mut(queue)
            .and_then(|state| state.unacked.get_mut(&delivery_tag))
            .filter(|unacked| unacked.consumer == consumer)
            .map(|unacked| unacked.taken = true)
            .is_some()
    }
}

/// Receiving end of one consumer.
///
/// Skips frames the broker has already taken back, and releases the
/// consumer when dropped.
struct ConsumerStream {
    broker: InMemoryBroker,
    queue: String,
    consumer: u64,
    deliveries: UnboundedReceiverStream<Delivery>,
}

impl Stream for ConsumerStream {
    type Item = Delivery;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        let this = self.get_mut();
        loop {
            match this.deliveries.poll_next_unpin(cx) {
                Poll::Ready(Some(delivery)) => {
                    let mut state = this.broker.state.lock();
                    if state.take(&this.queue, this.consumer, delivery.delivery_tag) {
                        return Poll::Ready(Some(delivery));
                    }
                    trace!(
                        queue = %this.queue,
                        delivery_tag = delivery.delivery_tag,
                        "skipping delivery returned to the queue"
                    );
                }
                other => return other,
            }
        }
    }
}

impl Drop for ConsumerStream {
    fn drop(&mut self) {
        self.broker
            .state
            .lock()
            .release(&self.queue, self.consumer, true);
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all declared queues, sorted.
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queues bound to an exchange.
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        self.state
            .lock()
            .exchanges
            .get(exchange)
            .cloned()
            .unwrap_or_default()
    }

    /// Frames waiting in a queue, not yet delivered to a consumer.
    pub fn ready(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|state| state.ready.iter().map(|p| p.body.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of live consumers on a queue.
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.queue_stat(queue, |state| state.consumers.len())
    }

    /// Number of frames delivered but not yet settled.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.queue_stat(queue, |state| state.unacked.len())
    }

    pub fn acked_count(&self, queue: &str) -> usize {
        self.queue_stat(queue, |state| state.acked)
    }

    /// Number of frames nacked without requeue.
    pub fn rejected_count(&self, queue: &str) -> usize {
        self.queue_stat(queue, |state| state.rejected)
    }

    fn queue_stat(&self, queue: &str, f: impl Fn(&QueueState) -> usize) -> usize {
        self.state.lock().queues.get(queue).map(f).unwrap_or(0)
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), TransportError> {
        self.state
            .lock()
            .exchanges
            .entry(exchange.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(&self, exchange: &str, body: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let bound = state.exchanges.get(exchange).cloned().unwrap_or_default();
        if bound.is_empty() {
            trace!(exchange, "no queues bound, frame dropped");
        }
        for queue in bound {
            state.enqueue(&queue, body.clone())?;
        }
        Ok(())
    }
}

#[async_trait]
impl Sender for InMemoryBroker {
    async fn send(&self, queue: &str, body: Vec<u8>) -> Result<(), TransportError> {
        self.state.lock().enqueue(queue, body)
    }
}

#[async_trait]
impl Listener for InMemoryBroker {
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError> {
        self.state.lock().queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn bind(&self, queue: &str, exchange: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(TransportError::QueueNotFound(queue.to_string()));
        }
        let bound = state.exchanges.entry(exchange.to_string()).or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_consumer_id += 1;
        let id = state.next_consumer_id;
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
        if queue_state.consumers.iter().any(|c| c.tag == consumer_tag) {
            return Err(TransportError::ConsumerExists {
                queue: queue.to_string(),
                consumer_tag: consumer_tag.to_string(),
            });
        }
        queue_state.consumers.push(Consumer {
            id,
            tag: consumer_tag.to_string(),
            sender: tx,
        });
        state.pump(queue);

        Ok(ConsumerStream {
            broker: self.clone(),
            queue: queue.to_string(),
            consumer: id,
            deliveries: UnboundedReceiverStream::new(rx),
        }
        .boxed())
    }

    async fn cancel(&self, queue: &str, consumer_tag: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let consumer = state
            .queues
            .get(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?
            .consumers
            .iter()
            .find(|c| c.tag == consumer_tag)
            .map(|c| c.id);
        if let Some(consumer) = consumer {
            state.release(queue, consumer, false);
        }
        Ok(())
    }

    async fn ack(&self, queue: &str, delivery_tag: u64) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
        if queue_state.unacked.remove(&delivery_tag).is_none() {
            return Err(TransportError::UnknownDelivery {
                queue: queue.to_string(),
                delivery_tag,
            });
        }
        queue_state.acked += 1;
        Ok(())
    }

    async fn nack(
        &self,
        queue: &str,
        delivery_tag: u64,
        requeue: bool,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_string()))?;
        let Some(unacked) = queue_state.unacked.remove(&delivery_tag) else {
            return Err(TransportError::UnknownDelivery {
                queue: queue.to_string(),
                delivery_tag,
            });
        };

        if requeue {
            let mut pending = unacked.pending;
            pending.redelivered = true;
            queue_state.ready.push_front(pending);
            state.pump(queue);
        } else {
            queue_state.rejected += 1;
        }
        Ok(())
    }
}
