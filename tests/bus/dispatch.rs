use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use nybus::{
    BusBuilder, BusEngineExt, BusError, CommandContext, ConcurrencyPolicy, Dispatcher, EventContext,
    ManualClock, NybusOptions,
};
use tokio::sync::Barrier;
use uuid::Uuid;

use crate::support::{eventually, in_memory, CancelOrder, OrderPlaced, PlaceOrder, Seen};

#[tokio::test]
async fn raised_event_reaches_its_handler() {
    let (engine, builder) = in_memory();
    let seen = Seen::new();
    let sink = seen.clone();

    let host = builder
        .subscribe_to_event_with(move |_: Dispatcher, context: EventContext<OrderPlaced>| {
            let sink = sink.clone();
            async move {
                sink.push(context.event().id);
                Ok(())
            }
        })
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().raise_event(OrderPlaced { id: 42 }).await.unwrap();
    eventually("event handler", || seen.len() == 1).await;

    let stats = host.stop().await.unwrap();
    assert_eq!(seen.values(), vec![42]);
    assert_eq!(stats.received, 1);
    assert_eq!(stats.handled, 1);
    assert_eq!(engine.acknowledged().len(), 1);
    assert!(engine.rejected().is_empty());
}

#[tokio::test]
async fn unsubscribed_commands_are_ignored() {
    let (engine, builder) = in_memory();
    let seen = Seen::new();
    let sink = seen.clone();

    let host = builder
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
    host.dispatcher().invoke_command(CancelOrder { id: 1 }).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = host.stop().await.unwrap();
    assert_eq!(engine.sent().len(), 1);
    assert_eq!(stats.received, 0);
    assert_eq!(seen.len(), 0);
    assert!(engine.acknowledged().is_empty());
    assert!(engine.rejected().is_empty());
}

#[tokio::test]
async fn raised_events_get_a_fresh_correlation_id() {
    let (_engine, builder) = in_memory();
    let commands = Seen::new();
    let events = Seen::new();
    let command_sink = commands.clone();
    let event_sink = events.clone();

    let host = builder
        .subscribe_to_command_with(move |dispatcher: Dispatcher, context: CommandContext<PlaceOrder>| {
            let sink = command_sink.clone();
            async move {
                sink.push(context.correlation_id());
                dispatcher.raise_event(OrderPlaced { id: context.command().id }).await?;
                Ok(())
            }
        })
        .subscribe_to_event_with(move |_: Dispatcher, context: EventContext<OrderPlaced>| {
            let sink = event_sink.clone();
            async move {
                sink.push(context.correlation_id());
                Ok(())
            }
        })
        .build()
        .unwrap();

    host.start().await.unwrap();
    let correlation_id = Uuid::new_v4();
    host.dispatcher()
        .invoke_command_with_correlation(PlaceOrder { id: 3 }, Some(correlation_id))
        .await
        .unwrap();
    eventually("raised event", || events.len() == 1).await;
    host.stop().await.unwrap();

    assert_eq!(commands.values(), vec![correlation_id]);
    let raised = events.values()[0];
    assert_ne!(raised, correlation_id);
    assert!(!raised.is_nil());
}

#[tokio::test]
async fn forwarded_correlation_id_is_kept() {
    let (_engine, builder) = in_memory();
    let events = Seen::new();
    let sink = events.clone();

    let host = builder
        .subscribe_to_command_with(|dispatcher: Dispatcher, context: CommandContext<PlaceOrder>| async move {
            dispatcher
                .raise_event_with_correlation(
                    OrderPlaced { id: context.command().id },
                    Some(context.correlation_id()),
                )
                .await?;
            Ok(())
        })
        .subscribe_to_event_with(move |_: Dispatcher, context: EventContext<OrderPlaced>| {
            let sink = sink.clone();
            async move {
                sink.push(context.correlation_id());
                Ok(())
            }
        })
        .build()
        .unwrap();

    host.start().await.unwrap();
    let correlation_id = Uuid::new_v4();
    host.dispatcher()
        .invoke_command_with_correlation(PlaceOrder { id: 4 }, Some(correlation_id))
        .await
        .unwrap();
    eventually("raised event", || events.len() == 1).await;
    host.stop().await.unwrap();

    assert_eq!(events.values(), vec![correlation_id]);
}

#[tokio::test]
async fn context_times_come_from_the_clock() {
    let (_engine, builder) = in_memory();
    let sent_on = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let clock = Arc::new(ManualClock::new(sent_on));
    let seen = Seen::new();
    let sink = seen.clone();

    let host = builder
        .with_clock(clock.clone())
        .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<PlaceOrder>| {
            let sink = sink.clone();
            async move {
                sink.push((context.sent_on(), context.received_on()));
                Ok(())
            }
        })
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 5 }).await.unwrap();
    eventually("command handler", || seen.len() == 1).await;
    host.stop().await.unwrap();

    let (seen_sent_on, received_on) = seen.values()[0];
    assert_eq!(seen_sent_on, sent_on);
    assert_eq!(received_on, sent_on);
}

#[tokio::test]
async fn messages_without_handler_are_rejected_without_filters() {
    let (engine, builder) = in_memory();
    engine.subscribe_to_command::<CancelOrder>().unwrap();

    let options = NybusOptions::from_toml(
        r#"
        [[nybus.command_error_filters]]
        type = "retry"
        max_retries = 5
        "#,
    )
    .unwrap();

    let host = builder
        .configure(&options, &Default::default())
        .subscribe_to_command_with(|_: Dispatcher, _: CommandContext<PlaceOrder>| async { Ok(()) })
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(CancelOrder { id: 9 }).await.unwrap();
    eventually("rejection", || engine.rejected().len() == 1).await;

    let stats = host.stop().await.unwrap();
    assert_eq!(stats.missing_handler, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(engine.sent().len(), 1);
}

#[tokio::test]
async fn panicking_handler_is_a_failure() {
    let (engine, builder) = in_memory();
    let seen = Seen::new();
    let sink = seen.clone();

    let host = builder
        .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<PlaceOrder>| {
            let sink = sink.clone();
            async move {
                if context.command().id == 0 {
                    panic!("order zero");
                }
                sink.push(context.command().id);
                Ok(())
            }
        })
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 0 }).await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    eventually("second command", || seen.len() == 1).await;

    let stats = host.stop().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.handled, 1);
    assert_eq!(engine.rejected().len(), 1);
    assert_eq!(engine.acknowledged().len(), 1);
}

#[tokio::test]
async fn concurrent_policy_overlaps_handlers() {
    let (_engine, builder) = in_memory();
    let barrier = Arc::new(Barrier::new(2));
    let seen = Seen::new();
    let sink = seen.clone();

    let host = builder
        .with_concurrency(ConcurrencyPolicy::Concurrent(NonZeroUsize::new(4).unwrap()))
        .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<PlaceOrder>| {
            let barrier = barrier.clone();
            let sink = sink.clone();
            async move {
                tokio::time::timeout(Duration::from_secs(2), barrier.wait()).await?;
                sink.push(context.command().id);
                Ok(())
            }
        })
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 2 }).await.unwrap();
    eventually("both commands", || seen.len() == 2).await;

    let stats = host.stop().await.unwrap();
    assert_eq!(stats.handled, 2);
}

#[tokio::test]
async fn sequential_policy_keeps_order() {
    let (_engine, builder) = in_memory();
    let seen = Seen::new();
    let sink = seen.clone();

    let host = builder
        .subscribe_to_command_with(move |_: Dispatcher, context: CommandContext<PlaceOrder>| {
            let sink = sink.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(u64::from(10 - context.command().id))).await;
                sink.push(context.command().id);
                Ok(())
            }
        })
        .build()
        .unwrap();

    host.start().await.unwrap();
    for id in 0..5 {
        host.dispatcher().invoke_command(PlaceOrder { id }).await.unwrap();
    }
    eventually("all commands", || seen.len() == 5).await;
    host.stop().await.unwrap();

    assert_eq!(seen.values(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn host_cannot_start_twice() {
    let (_engine, builder) = in_memory();
    let host = builder.build().unwrap();

    host.start().await.unwrap();
    assert!(matches!(host.start().await, Err(BusError::AlreadyStarted)));
    host.stop().await.unwrap();
    assert!(!host.is_running());
}

#[tokio::test]
async fn stop_without_start_is_harmless() {
    let host = BusBuilder::new(Arc::new(nybus::InMemoryBusEngine::new()))
        .build()
        .unwrap();
    assert_eq!(host.stop().await.unwrap(), nybus::HostStats::default());
}
