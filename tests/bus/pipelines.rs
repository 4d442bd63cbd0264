use nybus::{
    DeadLetterErrorFilter, DiscardErrorFilter, Headers, MessageType, NybusOptions, RetryErrorFilter,
};

use crate::support::{eventually, failing_command, failing_event, in_memory, OrderPlaced, PlaceOrder};

#[tokio::test]
async fn retries_until_max_then_rejects_once() {
    let (engine, builder) = in_memory();
    let options = NybusOptions::from_toml(
        r#"
        [[nybus.command_error_filters]]
        type = "retry"
        max_retries = 3
        "#,
    )
    .unwrap();

    let host = builder
        .configure(&options, &Default::default())
        .subscribe_to_command_with(failing_command)
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    eventually("terminal rejection", || engine.rejected().len() == 1).await;
    let stats = host.stop().await.unwrap();

    let retry_counts: Vec<u32> = engine
        .sent()
        .iter()
        .map(|envelope| envelope.headers.retry_count())
        .collect();
    assert_eq!(retry_counts, vec![0, 1, 2, 3]);

    let message_ids: Vec<_> = engine.sent().into_iter().map(|e| e.message_id).collect();
    assert!(message_ids.windows(2).all(|pair| pair[0] == pair[1]));

    assert_eq!(engine.acknowledged().len(), 3);
    assert_eq!(engine.rejected().len(), 1);
    assert_eq!(stats.received, 4);
    assert_eq!(stats.failed, 4);
}

#[tokio::test]
async fn zero_retries_reject_the_first_failure() {
    let (engine, builder) = in_memory();

    let host = builder
        .with_command_error_filter(RetryErrorFilter::new(0))
        .subscribe_to_command_with(failing_command)
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 2 }).await.unwrap();
    eventually("rejection", || engine.rejected().len() == 1).await;
    host.stop().await.unwrap();

    assert_eq!(engine.sent().len(), 1);
    assert!(engine.acknowledged().is_empty());
}

#[tokio::test]
async fn exhausted_retries_fall_through_to_dead_letter() {
    let (engine, builder) = in_memory();

    let host = builder
        .with_command_error_filter(RetryErrorFilter::new(1))
        .with_command_error_filter(DeadLetterErrorFilter::new("orders.errors"))
        .subscribe_to_command_with(failing_command)
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 7 }).await.unwrap();
    eventually("rejection", || engine.rejected().len() == 1).await;
    host.stop().await.unwrap();

    let dead = engine.error_queue("orders.errors");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count(), 1);
    assert_eq!(
        dead[0].headers().get(Headers::EXCEPTION_MESSAGE),
        Some("order 7 rejected")
    );
    assert_eq!(dead[0].item::<PlaceOrder>(), Some(&PlaceOrder { id: 7 }));
}

#[tokio::test]
async fn discard_rejects_events_without_resending() {
    let (engine, builder) = in_memory();

    let host = builder
        .with_event_error_filter(DiscardErrorFilter)
        .subscribe_to_event_with(failing_event)
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().raise_event(OrderPlaced { id: 3 }).await.unwrap();
    eventually("rejection", || engine.rejected().len() == 1).await;
    host.stop().await.unwrap();

    assert_eq!(engine.sent().len(), 1);
}

#[tokio::test]
async fn command_and_event_chains_are_independent() {
    let (engine, builder) = in_memory();
    let options = NybusOptions::from_toml(
        r#"
        [[nybus.command_error_filters]]
        type = "retry"
        max_retries = 1

        [[nybus.event_error_filters]]
        type = "discard"
        "#,
    )
    .unwrap();

    let host = builder
        .configure(&options, &Default::default())
        .subscribe_to_command_with(failing_command)
        .subscribe_to_event_with(failing_event)
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    host.dispatcher().raise_event(OrderPlaced { id: 1 }).await.unwrap();
    eventually("both rejections", || engine.rejected().len() == 2).await;
    host.stop().await.unwrap();

    let sent = engine.sent();
    let commands = sent
        .iter()
        .filter(|envelope| envelope.message_type == MessageType::Command)
        .count();
    let events = sent
        .iter()
        .filter(|envelope| envelope.message_type == MessageType::Event)
        .count();
    assert_eq!(commands, 2);
    assert_eq!(events, 1);
}

#[tokio::test]
async fn without_filters_failures_are_rejected() {
    let (engine, builder) = in_memory();
    let host = builder
        .subscribe_to_command_with(failing_command)
        .build()
        .unwrap();

    host.start().await.unwrap();
    host.dispatcher().invoke_command(PlaceOrder { id: 1 }).await.unwrap();
    eventually("rejection", || engine.rejected().len() == 1).await;
    let stats = host.stop().await.unwrap();

    assert_eq!(stats.failed, 1);
    assert_eq!(engine.sent().len(), 1);
}
