//! Broker-backed engine.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, AbortHandle};
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::transport::{Delivery, DeliveryStream, Transport};
use crate::config::{BrokerOptions, FrameFormat};
use crate::engine::{BusEngine, EngineError, MessageStream, Subscription, SubscriptionTable};
use crate::message::{Envelope, EnvelopeError, Message, MessageDescriptor, MessageType};
use crate::registry::MessageDescriptorStore;
use crate::serializer::{JsonSerializer, SerializationError, Serializer};

/// Prefix of the headers this engine attaches to received messages.
pub const TRANSPORT_HEADER_PREFIX: &str = "Transport:";
/// Delivery tag of a received message.
pub const DELIVERY_TAG_HEADER: &str = "Transport:DeliveryTag";
/// Queue a received message was consumed from.
pub const QUEUE_HEADER: &str = "Transport:Queue";

/// Engine on top of a broker [`Transport`].
///
/// Topology:
/// - one exchange per message descriptor, named `{namespace}:{name}`
/// - one queue per command descriptor, named `{command_queue}.{namespace}:{name}`;
///   every process subscribed to that command consumes it, so each command
///   reaches one handler (competing consumers)
/// - an event queue per engine instance, bound to every subscribed event
///   exchange, so each process sees every event
///
/// Received messages carry their delivery tag and queue in `Transport:`
/// headers. Those headers are stripped before a message is sent again, so a
/// retried message never carries a stale delivery tag.
///
/// A delivery that cannot become a message is settled right away: an
/// unknown command goes back to its queue once for another consumer, an
/// unknown event is acked, and unreadable frames are rejected.
pub struct BrokerBusEngine<T: Transport + Clone + 'static> {
    transport: T,
    subscriptions: Arc<SubscriptionTable>,
    serializer: Arc<dyn Serializer>,
    command_queue_prefix: String,
    event_queue: String,
    consumer_tag: String,
    requeue_on_fail: bool,
    frame_format: FrameFormat,
    active: Mutex<Option<ActiveConsumers>>,
}

struct ActiveConsumers {
    abort: AbortHandle,
    queues: Vec<String>,
}

/// Why a delivery could not become a message.
enum Undeliverable {
    Unreadable(EnvelopeError),
    Unknown(Envelope),
    Malformed(Envelope, SerializationError),
}

impl<T: Transport + Clone + 'static> BrokerBusEngine<T> {
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, &BrokerOptions::default())
    }

    pub fn with_options(transport: T, options: &BrokerOptions) -> Self {
        let instance = Uuid::new_v4();
        let event_queue = options
            .event_queue
            .clone()
            .unwrap_or_else(|| format!("nybus.events.{instance}"));
        Self {
            transport,
            subscriptions: Arc::new(SubscriptionTable::new()),
            serializer: Arc::new(JsonSerializer),
            command_queue_prefix: options.command_queue.clone(),
            event_queue,
            consumer_tag: format!("nybus.{instance}"),
            requeue_on_fail: options.requeue_on_fail,
            frame_format: options.frame_format,
            active: Mutex::new(None),
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

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queue commands with `descriptor` are consumed from.
    pub fn command_queue(&self, descriptor: &MessageDescriptor) -> String {
        format!("{}.{}", self.command_queue_prefix, descriptor)
    }

    pub fn event_queue(&self) -> &str {
        &self.event_queue
    }

    /// Tag this engine consumes every queue under.
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    fn encode(&self, message: &Message) -> Result<Vec<u8>, EngineError> {
        let mut envelope = message.to_envelope(self.serializer.as_ref())?;
        envelope.headers.remove_prefixed(TRANSPORT_HEADER_PREFIX);
        Ok(self.frame_format.encode(&envelope)?)
    }

    /// Declare a queue, bind it to each subscription's exchange, and start consuming.
    async fn consume_bound(
        &self,
        queue: &str,
        subscriptions: &[Subscription],
    ) -> Result<DeliveryStream, EngineError> {
        self.transport.declare_queue(queue).await?;
        for subscription in subscriptions {
            let exchange = subscription.descriptor().to_string();
            self.transport.declare_exchange(&exchange).await?;
            self.transport.bind(queue, &exchange).await?;
        }
        Ok(self.transport.consume(queue, &self.consumer_tag).await?)
    }

    /// End the current stream and cancel its consumers. `false` if none were active.
    async fn release_consumers(&self) -> Result<bool, EngineError> {
        let active = self.active.lock().take();
        let Some(active) = active else {
            return Ok(false);
        };

        active.abort.abort();
        for queue in &active.queues {
            self.transport.cancel(queue, &self.consumer_tag).await?;
        }
        Ok(true)
    }
}

/// Pull the delivery coordinates back out of a received message.
fn delivery_of(message: &Message) -> Result<(String, u64), EngineError> {
    let headers = message.headers();
    let queue = headers.get(QUEUE_HEADER);
    let tag = headers
        .get(DELIVERY_TAG_HEADER)
        .and_then(|tag| tag.parse::<u64>().ok());
    match (queue, tag) {
        (Some(queue), Some(tag)) => Ok((queue.to_string(), tag)),
        _ => Err(EngineError::UnknownMessage(message.message_id().to_string())),
    }
}

fn decode_delivery(
    delivery: &Delivery,
    format: FrameFormat,
    table: &SubscriptionTable,
    serializer: &dyn Serializer,
) -> Result<Message, Undeliverable> {
    let envelope = format
        .decode(&delivery.body)
        .map_err(Undeliverable::Unreadable)?;
    let Some(subscription) = table.resolve(&envelope) else {
        return Err(Undeliverable::Unknown(envelope));
    };
    match subscription.decode(&envelope, serializer) {
        Ok(message) => Ok(message),
        Err(err) => Err(Undeliverable::Malformed(envelope, err)),
    }
}

/// Settle a delivery this process cannot handle.
///
/// Command queues are shared with other processes, so an unknown command is
/// handed back once before it is rejected.
async fn settle_undeliverable<T: Transport>(
    transport: &T,
    delivery: &Delivery,
    reason: Undeliverable,
    shared: bool,
) {
    let queue = delivery.queue.as_str();
    let tag = delivery.delivery_tag;

    let result = match reason {
        Undeliverable::Unreadable(err) => {
            warn!(queue, delivery_tag = tag, error = %err, "unreadable frame, rejecting");
            transport.nack(queue, tag, false).await
        }
        Undeliverable::Malformed(envelope, err) => {
            warn!(
                queue,
                message_id = %envelope.message_id,
                descriptor = %envelope.descriptor,
                error = %err,
                "failed to decode inbound message, rejecting"
            );
            transport.nack(queue, tag, false).await
        }
        Undeliverable::Unknown(envelope) if !shared => {
            trace!(
                queue,
                message_id = %envelope.message_id,
                descriptor = %envelope.descriptor,
                "no subscription for inbound message, skipping"
            );
            transport.ack(queue, tag).await
        }
        Undeliverable::Unknown(envelope) => {
            let requeue = !delivery.redelivered;
            if requeue {
                debug!(
                    queue,
                    message_id = %envelope.message_id,
                    descriptor = %envelope.descriptor,
                    "no subscription for inbound message, handing it back"
                );
            } else {
                warn!(
                    queue,
                    message_id = %envelope.message_id,
                    descriptor = %envelope.descriptor,
                    "no subscription for redelivered message, rejecting"
                );
            }
            transport.nack(queue, tag, requeue).await
        }
    };

    if let Err(err) = result {
        warn!(queue, delivery_tag = tag, error = %err, "failed to settle undeliverable message");
    }
}

impl FrameFormat {
    fn encode(self, envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            FrameFormat::Binary => envelope.to_bytes(),
            FrameFormat::Json => envelope.to_json(),
        }
    }

    fn decode(self, body: &[u8]) -> Result<Envelope, EnvelopeError> {
        match self {
            FrameFormat::Binary => Envelope::from_bytes(body),
            FrameFormat::Json => Envelope::from_json(body),
        }
    }
}

#[async_trait]
impl<T: Transport + Clone + 'static> BusEngine for BrokerBusEngine<T> {
    async fn start(&self) -> Result<MessageStream, EngineError> {
        self.release_consumers().await?;

        let subscriptions = self.subscriptions.subscriptions();
        let (commands, events): (Vec<_>, Vec<_>) = subscriptions
            .into_iter()
            .partition(|s| s.message_type() == MessageType::Command);

        let mut streams = Vec::new();
        let mut queues = Vec::new();
        for command in &commands {
            let queue = self.command_queue(command.descriptor());
            streams.push(self.consume_bound(&queue, std::slice::from_ref(command)).await?);
            queues.push(queue);
        }
        if !events.is_empty() {
            streams.push(self.consume_bound(&self.event_queue, &events).await?);
            queues.push(self.event_queue.clone());
        }

        let inbound: DeliveryStream = if streams.is_empty() {
            debug!("broker engine started without subscriptions");
            stream::pending().boxed()
        } else {
            stream::select_all(streams).boxed()
        };

        let transport = self.transport.clone();
        let table = Arc::clone(&self.subscriptions);
        let serializer = Arc::clone(&self.serializer);
        let format = self.frame_format;
        let event_queue = self.event_queue.clone();

        let decoded = inbound.filter_map(move |delivery: Delivery| {
            let transport = transport.clone();
            let table = Arc::clone(&table);
            let serializer = Arc::clone(&serializer);
            let shared = delivery.queue != event_queue;
            async move {
                match decode_delivery(&delivery, format, &table, serializer.as_ref()) {
                    Ok(mut message) => {
                        let headers = message.headers_mut();
                        headers.insert(DELIVERY_TAG_HEADER, delivery.delivery_tag.to_string());
                        headers.insert(QUEUE_HEADER, delivery.queue);
                        Some(message)
                    }
                    Err(reason) => {
                        settle_undeliverable(&transport, &delivery, reason, shared).await;
                        None
                    }
                }
            }
        });

        let (decoded, abort) = stream::abortable(decoded);
        info!(
            command_queues = ?&queues[..commands.len()],
            event_queue = %self.event_queue,
            consumer_tag = %self.consumer_tag,
            "broker engine started"
        );
        *self.active.lock() = Some(ActiveConsumers { abort, queues });
        Ok(decoded.boxed())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if self.release_consumers().await? {
            info!("broker engine stopped");
        }
        Ok(())
    }

    fn subscribe(&self, subscription: Subscription) -> Result<(), EngineError> {
        self.subscriptions.add(subscription)?;
        Ok(())
    }

    async fn send_message(&self, message: Message) -> Result<(), EngineError> {
        let body = self.encode(&message)?;
        let exchange = message.descriptor().to_string();
        self.transport.declare_exchange(&exchange).await?;
        self.transport.publish(&exchange, body).await?;
        debug!(
            message_id = %message.message_id(),
            exchange = %exchange,
            "message published"
        );
        Ok(())
    }

    async fn notify_success(&self, message: &Message) -> Result<(), EngineError> {
        let (queue, tag) = delivery_of(message)?;
        self.transport.ack(&queue, tag).await?;
        Ok(())
    }

    async fn notify_fail(&self, message: &Message) -> Result<(), EngineError> {
        let (queue, tag) = delivery_of(message)?;
        self.transport.nack(&queue, tag, self.requeue_on_fail).await?;
        Ok(())
    }

    async fn send_to_error_queue(&self, queue: &str, message: Message) -> Result<(), EngineError> {
        let body = self.encode(&message)?;
        self.transport.declare_queue(queue).await?;
        self.transport.send(queue, body).await?;
        Ok(())
    }
}
