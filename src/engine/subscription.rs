//! Per-type decoders captured at subscribe time, and inbound routing.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{trace, warn};

use crate::message::{
    Command, CommandMessage, Envelope, Event, EventMessage, Message, MessageDescriptor,
    MessageType,
};
use crate::registry::{MessageDescriptorStore, RegistryError};
use crate::serializer::{self, SerializationError, Serializer};

type DecodeFn =
    Arc<dyn Fn(&Envelope, &dyn Serializer) -> Result<Message, SerializationError> + Send + Sync>;

/// Interest in one payload type, with the closure that rebuilds a typed
/// message from an envelope.
#[derive(Clone)]
pub struct Subscription {
    message_type: MessageType,
    type_id: TypeId,
    type_name: &'static str,
    descriptor: MessageDescriptor,
    decode: DecodeFn,
}

impl Subscription {
    pub fn command<T: Command>() -> Self {
        Self {
            message_type: MessageType::Command,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            descriptor: T::descriptor(),
            decode: Arc::new(|envelope: &Envelope, format: &dyn Serializer| {
                let item: T = serializer::decode(format, &envelope.content)?;
                Ok(CommandMessage::from_parts(
                    envelope.message_id.clone(),
                    envelope.headers.clone(),
                    Arc::new(item),
                )
                .into())
            }),
        }
    }

    pub fn event<T: Event>() -> Self {
        Self {
            message_type: MessageType::Event,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            descriptor: T::descriptor(),
            decode: Arc::new(|envelope: &Envelope, format: &dyn Serializer| {
                let item: T = serializer::decode(format, &envelope.content)?;
                Ok(EventMessage::from_parts(
                    envelope.message_id.clone(),
                    envelope.headers.clone(),
                    Arc::new(item),
                )
                .into())
            }),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Rebuild the typed message carried by `envelope`.
    pub fn decode(
        &self,
        envelope: &Envelope,
        serializer: &dyn Serializer,
    ) -> Result<Message, SerializationError> {
        (self.decode)(envelope, serializer)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("message_type", &self.message_type)
            .field("type_name", &self.type_name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// The subscriptions of one engine, plus the type registry they populate.
///
/// Inbound envelopes are routed by exact type path first, then by descriptor
/// through the registry. The message kind must match the subscription.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    registry: Arc<MessageDescriptorStore>,
    by_type: DashMap<TypeId, Subscription>,
    by_type_name: DashMap<String, TypeId>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing registry instead of creating a private one.
    pub fn with_registry(registry: Arc<MessageDescriptorStore>) -> Self {
        Self {
            registry,
            by_type: DashMap::new(),
            by_type_name: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<MessageDescriptorStore> {
        &self.registry
    }

    /// Add a subscription. Returns `false` if the type was already subscribed.
    pub fn add(&self, subscription: Subscription) -> Result<bool, RegistryError> {
        if self.by_type.contains_key(&subscription.type_id) {
            return Ok(false);
        }

        match self.registry.register(
            subscription.type_id,
            subscription.type_name,
            subscription.descriptor.clone(),
        ) {
            Ok(()) | Err(RegistryError::AlreadyRegistered { .. }) => {}
            Err(err) => return Err(err),
        }

        self.by_type_name
            .insert(subscription.type_name.to_string(), subscription.type_id);
        self.by_type.insert(subscription.type_id, subscription);
        Ok(true)
    }

    /// Find the subscription an envelope should be decoded with.
    pub fn resolve(&self, envelope: &Envelope) -> Option<Subscription> {
        let exact = self
            .by_type_name
            .get(envelope.type_name.as_str())
            .map(|entry| *entry.value());
        let type_id = match exact {
            Some(type_id) => type_id,
            None => self.registry.type_for(&envelope.descriptor)?.type_id,
        };

        let subscription = self.by_type.get(&type_id)?;
        if subscription.message_type != envelope.message_type {
            return None;
        }
        Some(subscription.value().clone())
    }

    /// Decode an envelope into a message, or `None` if this process does not
    /// know the type or the payload cannot be read.
    pub fn decode(&self, envelope: &Envelope, serializer: &dyn Serializer) -> Option<Message> {
        let Some(subscription) = self.resolve(envelope) else {
            trace!(
                message_id = %envelope.message_id,
                descriptor = %envelope.descriptor,
                "no subscription for inbound message, skipping"
            );
            return None;
        };

        match subscription.decode(envelope, serializer) {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(
                    message_id = %envelope.message_id,
                    descriptor = %envelope.descriptor,
                    error = %err,
                    "failed to decode inbound message, dropping"
                );
                None
            }
        }
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.by_type.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
