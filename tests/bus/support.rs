//! Shared payloads and helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use nybus::{BusBuilder, CommandContext, Dispatcher, EventContext, InMemoryBusEngine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, nybus::Command)]
#[message(namespace = "MyApp", name = "PlaceOrder")]
pub struct PlaceOrder {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, nybus::Event)]
#[message(namespace = "MyApp", name = "OrderPlaced")]
pub struct OrderPlaced {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, nybus::Command)]
pub struct CancelOrder {
    pub id: u32,
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Thread-safe list of values seen by handlers.
#[derive(Debug)]
pub struct Seen<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Seen<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Clone> Seen<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, value: T) {
        self.0.lock().push(value);
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn values(&self) -> Vec<T> {
        self.0.lock().clone()
    }
}

pub fn in_memory() -> (Arc<InMemoryBusEngine>, BusBuilder) {
    let engine = Arc::new(InMemoryBusEngine::new());
    let builder = BusBuilder::new(engine.clone());
    (engine, builder)
}

/// Command handler that always fails.
pub async fn failing_command(_: Dispatcher, context: CommandContext<PlaceOrder>) -> anyhow::Result<()> {
    anyhow::bail!("order {} rejected", context.command().id)
}

/// Event handler that always fails.
pub async fn failing_event(_: Dispatcher, context: EventContext<OrderPlaced>) -> anyhow::Result<()> {
    anyhow::bail!("event {} rejected", context.event().id)
}
