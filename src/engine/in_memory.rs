//! In-process engine for tests and single-process applications.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace, warn};

use super::{BusEngine, EngineError, MessageStream, Subscription, SubscriptionTable};
use crate::config::InMemoryOptions;
use crate::message::{Envelope, Message};
use crate::registry::MessageDescriptorStore;
use crate::serializer::{JsonSerializer, Serializer};

/// In-memory engine backed by a broadcast channel.
///
/// Features:
/// - Hot, multi-subscriber stream: every call to `start` gets its own receiver
/// - Sends before `start` or after `stop` are dropped
/// - Every send goes through a full envelope encode/decode, like a real transport
/// - Sends, settlements and error-queue traffic are recorded for inspection,
///   bounded by [`InMemoryOptions::record_limit`] entries per log
///
/// ## Example
///
/// ```
/// use futures::StreamExt;
/// use nybus::{BusEngine, BusEngineExt, EventMessage, InMemoryBusEngine};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize, nybus::Event)]
/// struct OrderPlaced {
///     id: u64,
/// }
///
/// # tokio_test_block(async {
/// let engine = InMemoryBusEngine::new();
/// engine.subscribe_to_event::<OrderPlaced>().unwrap();
///
/// let mut stream = engine.start().await.unwrap();
/// engine.send_event(EventMessage::new(OrderPlaced { id: 42 })).await.unwrap();
///
/// let message = stream.next().await.unwrap();
/// assert_eq!(message.item::<OrderPlaced>().unwrap().id, 42);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f);
/// # }
/// ```
pub struct InMemoryBusEngine {
    subscriptions: Arc<SubscriptionTable>,
    serializer: Arc<dyn Serializer>,
    capacity: usize,
    sender: Mutex<Option<broadcast::Sender<Envelope>>>,
    sent: TrafficLog<Envelope>,
    acknowledged: TrafficLog<String>,
    rejected: TrafficLog<String>,
    error_queues: Mutex<HashMap<String, VecDeque<Message>>>,
    record_limit: usize,
}

/// Append-only log that keeps the newest `limit` entries.
struct TrafficLog<T> {
    entries: Mutex<VecDeque<T>>,
    limit: usize,
}

impl<T: Clone> TrafficLog<T> {
    fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            limit,
        }
    }

    fn push(&self, entry: T) {
        push_bounded(&mut self.entries.lock(), entry, self.limit);
    }

    fn snapshot(&self) -> Vec<T> {
        self.entries.lock().iter().cloned().collect()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn push_bounded<T>(entries: &mut VecDeque<T>, entry: T, limit: usize) {
    if limit == 0 {
        return;
    }
    if entries.len() == limit {
        entries.pop_front();
        trace!(limit, "traffic log full, oldest entry dropped");
    }
    entries.push_back(entry);
}

impl Default for InMemoryBusEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBusEngine {
    pub fn new() -> Self {
        Self::with_options(&InMemoryOptions::default())
    }

    pub fn with_options(options: &InMemoryOptions) -> Self {
        Self {
            subscriptions: Arc::new(SubscriptionTable::new()),
            serializer: Arc::new(JsonSerializer),
            capacity: options.capacity.max(1),
            sender: Mutex::new(None),
            sent: TrafficLog::new(options.record_limit),
            acknowledged: TrafficLog::new(options.record_limit),
            rejected: TrafficLog::new(options.record_limit),
            error_queues: Mutex::new(HashMap::new()),
            record_limit: options.record_limit,
        }
    }

    /// Replace the payload serializer.
    pub fn with_serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Share a type registry with other components.
    pub fn with_registry(mut self, registry: Arc<MessageDescriptorStore>) -> Self {
        self.subscriptions = Arc::new(SubscriptionTable::with_registry(registry));
        self
    }

    pub fn registry(&self) -> &Arc<MessageDescriptorStore> {
        self.subscriptions.registry()
    }

    pub fn is_started(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Recent envelopes passed to `send_message`, including dropped ones.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.snapshot()
    }

    /// Ids of messages settled with `notify_success`.
    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.snapshot()
    }

    /// Ids of messages settled with `notify_fail`.
    pub fn rejected(&self) -> Vec<String> {
        self.rejected.snapshot()
    }

    /// Messages forwarded to the named error queue.
    pub fn error_queue(&self, queue: &str) -> Vec<Message> {
        self.error_queues
            .lock()
            .get(queue)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Clear recorded traffic (useful for test cleanup).
    pub fn clear(&self) {
        self.sent.clear();
        self.acknowledged.clear();
        self.rejected.clear();
        self.error_queues.lock().clear();
    }
}

#[async_trait]
impl BusEngine for InMemoryBusEngine {
    async fn start(&self) -> Result<MessageStream, EngineError> {
        let receiver = {
            let mut sender = self.sender.lock();
            let sender = sender.get_or_insert_with(|| broadcast::channel(self.capacity).0);
            sender.subscribe()
        };

        let subscriptions = Arc::clone(&self.subscriptions);
        let serializer = Arc::clone(&self.serializer);

        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let decoded = match item {
                Ok(envelope) => subscriptions.decode(&envelope, serializer.as_ref()),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "in-memory engine receiver lagged, messages lost");
                    None
                }
            };
            futures::future::ready(decoded)
        });

        debug!(subscriptions = self.subscriptions.len(), "in-memory engine started");
        Ok(stream.boxed())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if self.sender.lock().take().is_some() {
            debug!("in-memory engine stopped");
        }
        Ok(())
    }

    fn subscribe(&self, subscription: Subscription) -> Result<(), EngineError> {
        self.subscriptions.add(subscription)?;
        Ok(())
    }

    async fn send_message(&self, message: Message) -> Result<(), EngineError> {
        let envelope = message.to_envelope(self.serializer.as_ref())?;
        self.sent.push(envelope.clone());

        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(envelope).is_err() {
                    debug!(message_id = %message.message_id(), "no receivers, message dropped");
                }
            }
            None => {
                debug!(message_id = %message.message_id(), "engine not started, message dropped");
            }
        }
        Ok(())
    }

    async fn notify_success(&self, message: &Message) -> Result<(), EngineError> {
        self.acknowledged.push(message.message_id().to_string());
        Ok(())
    }

    async fn notify_fail(&self, message: &Message) -> Result<(), EngineError> {
        self.rejected.push(message.message_id().to_string());
        Ok(())
    }

    async fn send_to_error_queue(&self, queue: &str, message: Message) -> Result<(), EngineError> {
        let mut queues = self.error_queues.lock();
        let entries = queues.entry(queue.to_string()).or_default();
        push_bounded(entries, message, self.record_limit);
        Ok(())
    }
}
