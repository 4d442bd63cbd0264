//! Payload traits implemented by command and event types.

use std::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::descriptor::MessageDescriptor;

/// A type that can travel on the bus as the item of a message.
///
/// Usually implemented through `#[derive(Command)]` or `#[derive(Event)]`.
/// A manual implementation can rely on the default descriptor, derived from
/// the Rust type path.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn descriptor() -> MessageDescriptor {
        MessageDescriptor::of::<Self>()
    }
}

/// A directed instruction handled by exactly one logical handler.
pub trait Command: Payload {}

/// A fact broadcast to any number of subscribers.
pub trait Event: Payload {}

/// Object-safe view of a payload, used by type-erased messages.
pub(crate) trait AnyPayload: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn to_value(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<T: Payload> AnyPayload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
