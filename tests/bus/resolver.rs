use std::sync::Arc;

use async_trait::async_trait;
use nybus::{
    BusError, CommandContext, CommandHandler, ConfigurationError, Dispatcher, ServiceRegistry,
};

use crate::support::{eventually, in_memory, PlaceOrder, Seen};

struct OrderAuditor {
    seen: Seen<u32>,
}

#[async_trait]
impl CommandHandler<PlaceOrder> for OrderAuditor {
    async fn handle(&self, _: &Dispatcher, context: &CommandContext<PlaceOrder>) -> anyhow::Result<()> {
        self.seen.push(context.command().id);
        Ok(())
    }
}

#[tokio::test]
async fn resolves_a_handler_per_message() {
    let (engine, builder) = in_memory();
    let seen = Seen::new();
    let factory_seen = seen.clone();
    let registry = ServiceRegistry::new().with(move || OrderAuditor {
        seen: factory_seen.clone(),
    });

    let host = builder
        .with_resolver(Arc::new(registry.clone()))
        .subscribe_to_command_resolved::<PlaceOrder, OrderAuditor>()
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 2 }).await.unwrap();
    eventually("both commands", || seen.len() == 2).await;
    host.stop().await.unwrap();

    assert_eq!(seen.values(), vec![1, 2]);
    assert_eq!(registry.scopes_started(), 2);
    assert_eq!(registry.resolved(), 2);
    assert_eq!(registry.released(), 2);
    assert_eq!(engine.acknowledged().len(), 2);
}

#[tokio::test]
async fn unregistered_service_fails_the_message() {
    let (engine, builder) = in_memory();
    let host = builder
        .with_resolver(Arc::new(ServiceRegistry::new()))
        .subscribe_to_command_resolved::<PlaceOrder, OrderAuditor>()
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    eventually("rejection", || engine.rejected().len() == 1).await;

    let stats = host.stop().await.unwrap();
    assert_eq!(stats.failed, 1);
}

#[test]
fn resolved_handlers_need_a_resolver() {
    let (_engine, builder) = in_memory();
    let err = builder
        .subscribe_to_command_resolved::<PlaceOrder, OrderAuditor>()
        .build()
        .unwrap_err();

    assert!(matches!(
        err,
        BusError::Configuration(ConfigurationError::MissingDependency(_))
    ));
}
