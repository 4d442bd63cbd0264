use std::sync::Arc;

use nybus::config::{BrokerOptions, FrameFormat};
use futures::StreamExt;
use nybus::{
    BrokerBusEngine, BusBuilder, BusEngine, BusEngineExt, CommandContext, CommandMessage,
    Dispatcher, EventContext, InMemoryBroker, Payload, RetryErrorFilter, SystemClock,
};
use serde::{Deserialize, Serialize};

use crate::support::{eventually, failing_command, CancelOrder, PlaceOrder, Seen};

/// The publishing process's view of the event.
mod sales {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, nybus::Event)]
    #[message(namespace = "MyApp", name = "OrderPlaced")]
    pub struct OrderWasPlaced {
        pub id: u32,
    }
}

/// The subscribing process's view of the same event.
#[derive(Debug, Clone, Serialize, Deserialize, nybus::Event)]
#[message(namespace = "MyApp", name = "OrderPlaced")]
struct PlacedOrder {
    id: u32,
}

fn engine(broker: &InMemoryBroker, format: FrameFormat) -> Arc<BrokerBusEngine<InMemoryBroker>> {
    let options = BrokerOptions {
        frame_format: format,
        ..BrokerOptions::default()
    };
    Arc::new(BrokerBusEngine::with_options(broker.clone(), &options))
}

#[tokio::test]
async fn descriptor_matches_across_type_names() {
    let broker = InMemoryBroker::new();
    let publisher = engine(&broker, FrameFormat::Binary);
    let subscriber = engine(&broker, FrameFormat::Binary);

    let seen = Seen::new();
    let sink = seen.clone();
    let host = BusBuilder::new(subscriber.clone())
        .subscribe_to_event_with(move |_: Dispatcher, context: EventContext<PlacedOrder>| {
            let sink = sink.clone();
            async move {
                sink.push(context.event().id);
                Ok(())
            }
        })
        .build()
        .unwrap();
    host.start().await.unwrap();

    let dispatcher = Dispatcher::new(publisher, Arc::new(SystemClock));
    dispatcher
        .raise_event(sales::OrderWasPlaced { id: 7 })
        .await
        .unwrap();

    eventually("event on the subscriber", || seen.len() == 1).await;
    host.stop().await.unwrap();

    assert_eq!(seen.values(), vec![7]);
    eventually("ack", || broker.acked_count(subscriber.event_queue()) == 1).await;
}

#[tokio::test]
async fn events_fan_out_to_every_process() {
    let broker = InMemoryBroker::new();
    let seen = Seen::new();

    let mut hosts = Vec::new();
    for _ in 0..2 {
        let sink = seen.clone();
        let host = BusBuilder::new(engine(&broker, FrameFormat::Json))
            .subscribe_to_event_with(move |_: Dispatcher, context: EventContext<PlacedOrder>| {
                let sink = sink.clone();
                async move {
                    sink.push(context.event().id);
                    Ok(())
                }
            })
            .build()
            .unwrap();
        host.start().await.unwrap();
        hosts.push(host);
    }

    hosts[0].dispatcher().raise_event(PlacedOrder { id: 1 }).await.unwrap();
    eventually("both processes", || seen.len() == 2).await;

    for host in &hosts {
        host.stop().await.unwrap();
    }
}

#[tokio::test]
async fn commands_go_to_one_consumer() {
    let broker = InMemoryBroker::new();
    let seen = Seen::new();

    let mut hosts = Vec::new();
    for _ in 0..2 {
        let sink = seen.clone();
        let host = BusBuilder::new(engine(&broker, FrameFormat::Binary))
            .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<PlaceOrder>| {
                let sink = sink.clone();
                async move {
                    sink.push(context.command().id);
                    Ok(())
                }
            })
            .build()
            .unwrap();
        host.start().await.unwrap();
        hosts.push(host);
    }

    for id in 0..4 {
        hosts[0].dispatcher().invoke_command(PlaceOrder { id }).await.unwrap();
    }
    eventually("all commands", || seen.len() == 4).await;

    for host in &hosts {
        host.stop().await.unwrap();
    }
    let mut ids = seen.values();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn retries_travel_through_the_broker() {
    let broker = InMemoryBroker::new();
    let engine = engine(&broker, FrameFormat::Binary);
    let queue = engine.command_queue(&PlaceOrder::descriptor());

    let host = BusBuilder::new(engine)
        .with_command_error_filter(RetryErrorFilter::new(2))
        .subscribe_to_command_with(failing_command)
        .build()
        .unwrap();
    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();

    eventually("terminal rejection", || broker.rejected_count(&queue) == 1).await;
    let stats = host.stop().await.unwrap();

    assert_eq!(stats.failed, 3);
    assert_eq!(broker.acked_count(&queue), 2);
    assert_eq!(broker.unacked_count(&queue), 0);
}

#[tokio::test]
async fn each_command_type_reaches_its_own_handler() {
    let broker = InMemoryBroker::new();

    let placed = Seen::new();
    let sink = placed.clone();
    let orders = BusBuilder::new(engine(&broker, FrameFormat::Binary))
        .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<PlaceOrder>| {
            let sink = sink.clone();
            async move {
                sink.push(context.command().id);
                Ok(())
            }
        })
        .build()
        .unwrap();

    let cancelled = Seen::new();
    let sink = cancelled.clone();
    let cancellations = BusBuilder::new(engine(&broker, FrameFormat::Binary))
        .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<CancelOrder>| {
            let sink = sink.clone();
            async move {
                sink.push(context.command().id);
                Ok(())
            }
        })
        .build()
        .unwrap();

    orders.start().await.unwrap();
    cancellations.start().await.unwrap();

    for id in 0..4 {
        orders.dispatcher().invoke_command(PlaceOrder { id }).await.unwrap();
    }
    cancellations
        .dispatcher()
        .invoke_command(CancelOrder { id: 9 })
        .await
        .unwrap();

    eventually("every command", || placed.len() == 4 && cancelled.len() == 1).await;
    let order_stats = orders.stop().await.unwrap();
    let cancel_stats = cancellations.stop().await.unwrap();

    let mut ids = placed.values();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(cancelled.values(), vec![9]);
    assert_eq!(order_stats.received, 4);
    assert_eq!(cancel_stats.received, 1);
}

#[tokio::test]
async fn unsettled_commands_are_redelivered_after_restart() {
    let broker = InMemoryBroker::new();
    let first = engine(&broker, FrameFormat::Binary);
    first.subscribe_to_command::<PlaceOrder>().unwrap();
    let queue = first.command_queue(&PlaceOrder::descriptor());

    let mut stream = first.start().await.unwrap();
    for id in [1, 2] {
        first
            .send_command(CommandMessage::new(PlaceOrder { id }))
            .await
            .unwrap();
    }
    let read = stream.next().await.unwrap();
    first.stop().await.unwrap();
    drop(stream);

    assert_eq!(broker.unacked_count(&queue), 0);
    assert_eq!(broker.ready(&queue).len(), 2);

    let seen = Seen::new();
    let sink = seen.clone();
    let host = BusBuilder::new(engine(&broker, FrameFormat::Binary))
        .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<PlaceOrder>| {
            let sink = sink.clone();
            async move {
                sink.push(context.command().id);
                Ok(())
            }
        })
        .build()
        .unwrap();
    host.start().await.unwrap();

    eventually("both commands again", || seen.len() == 2).await;
    host.stop().await.unwrap();

    let mut ids = seen.values();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(read.item::<PlaceOrder>().unwrap().id, 1);
    assert_eq!(broker.acked_count(&queue), 2);
}

#[tokio::test]
async fn stopping_a_host_keeps_undelivered_commands() {
    let broker = InMemoryBroker::new();
    let engine = engine(&broker, FrameFormat::Json);
    let queue = engine.command_queue(&PlaceOrder::descriptor());

    let host = BusBuilder::new(engine.clone())
        .subscribe_to_command_with(|_: Dispatcher, _: CommandContext<PlaceOrder>| async { Ok(()) })
        .build()
        .unwrap();
    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    eventually("first ack", || broker.acked_count(&queue) == 1).await;
    host.stop().await.unwrap();

    host.dispatcher().invoke_command(PlaceOrder { id: 2 }).await.unwrap();
    assert_eq!(broker.ready(&queue).len(), 1);
    assert_eq!(broker.consumer_count(&queue), 0);
    assert!(engine.start().await.unwrap().next().await.is_some());
}
