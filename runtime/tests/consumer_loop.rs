//! Consumer loop behaviour against in-memory doubles.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use eventline_core::contracts::{ORDER_CREATED_V1, OrderCreatedV1};
use eventline_core::envelope::Envelope;
use eventline_core::handler::{EnvelopeHandler, EventHandler, HandlerError, JsonHandler};
use eventline_core::producer::{Delivery, EventProducer, EventProducerExt, PublishError};
use eventline_core::registry::HandlerRegistry;
use eventline_core::shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
use eventline_core::source::InboundMessage;
use eventline_runtime::consumer::{
    ConsumerError, ConsumerLoop, ConsumerOptions, ConsumerState, ConsumerStats,
};
use eventline_runtime::dead_letter::DeadLetterPublisher;
use eventline_runtime::retry::RetryPolicy;
use eventline_testing::{RecordingProducer, ScriptedHandler, ScriptedSource, test_clock};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DLQ: &str = "user-service.dlq";

fn registry(handler: impl EventHandler + 'static) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(ORDER_CREATED_V1, Arc::new(handler))
        .unwrap()
        .build()
}

fn consumer(
    source: ScriptedSource,
    registry: HandlerRegistry,
    producer: &Arc<RecordingProducer>,
    options: ConsumerOptions,
) -> ConsumerLoop<ScriptedSource> {
    let dead_letters = DeadLetterPublisher::new(producer.clone(), DLQ, "user-service")
        .with_clock(Arc::new(test_clock()));

    ConsumerLoop::new(source, Arc::new(registry), dead_letters, options)
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
}

fn options() -> ConsumerOptions {
    ConsumerOptions::new(vec![ORDER_CREATED_V1.to_string()])
}

fn order(offset: i64, payload: &str) -> InboundMessage {
    InboundMessage::new(ORDER_CREATED_V1, 0, offset, "user-42", payload)
}

/// Run the loop over `messages` until the script is drained.
async fn run_to_completion(
    messages: Vec<InboundMessage>,
    handler: impl EventHandler + 'static,
    producer: &Arc<RecordingProducer>,
    options: ConsumerOptions,
) -> (ConsumerStats, eventline_testing::SourceProbe) {
    let (trigger, signal) = shutdown_channel();
    let source = messages
        .into_iter()
        .fold(ScriptedSource::new(), ScriptedSource::with_message)
        .stop_when_drained(trigger);
    let probe = source.probe();

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        consumer(source, registry(handler), producer, options).run(signal),
    )
    .await
    .expect("consumer loop did not stop")
    .unwrap();

    (stats, probe)
}

#[tokio::test]
async fn transient_failure_recovers_within_retry_budget() {
    let handler = ScriptedHandler::failing_first(2);
    let producer = Arc::new(RecordingProducer::new());

    let (stats, probe) =
        run_to_completion(vec![order(0, "{}")], handler.clone(), &producer, options()).await;

    assert_eq!(handler.call_count(), 3);
    assert!(producer.sent().is_empty());
    assert_eq!(probe.committed_offsets(), vec![0]);
    assert_eq!(stats.handled, 1);
    assert_eq!(stats.dead_lettered, 0);
}

#[tokio::test]
async fn persistent_failure_is_dead_lettered_once() {
    let raw = r#"{"eventType":"order.created.v1","key":"user-42"}"#;
    let handler = ScriptedHandler::always_failing();
    let producer = Arc::new(RecordingProducer::new());

    let (stats, probe) =
        run_to_completion(vec![order(5, raw)], handler.clone(), &producer, options()).await;

    assert_eq!(handler.call_count(), 3);

    let dead = producer.sent_to(DLQ);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].key, "user-42");

    let envelope = dead[0].json();
    assert_eq!(envelope["key"], "user-42");
    assert_eq!(envelope["producer"], "user-service");
    assert_eq!(envelope["version"], 1);

    let record = &envelope["data"];
    assert_eq!(record["originalTopic"], ORDER_CREATED_V1);
    assert_eq!(record["key"], "user-42");
    assert_eq!(record["rawPayload"], raw);
    assert_eq!(record["errorType"], "InvalidOperation");
    assert_eq!(record["errorMessage"], "Simulated processing failure");
    assert_eq!(record["failedAtUtc"], "2025-01-01T00:00:00Z");
    assert_eq!(record["offset"], 5);
    assert_eq!(record["attempts"], 3);

    assert_eq!(probe.committed_offsets(), vec![5]);
    assert_eq!(stats.dead_lettered, 1);
}

#[tokio::test]
async fn unkeyed_message_is_dead_lettered_under_fallback_key() {
    let message = InboundMessage {
        key: None,
        ..order(0, "{}")
    };
    let producer = Arc::new(RecordingProducer::new());
    let handler = ScriptedHandler::always_failing()
        .with_error(HandlerError::new("TimeoutException", "Inventory lookup timed out"));

    run_to_completion(vec![message], handler, &producer, options()).await;

    let dead = producer.sent_to(DLQ);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].key, "dlq");
    let record = &dead[0].json()["data"];
    assert_eq!(record["key"], "");
    assert_eq!(record["errorType"], "TimeoutException");
    assert_eq!(record["errorMessage"], "Inventory lookup timed out");
}

#[tokio::test]
async fn unmapped_topic_is_skipped_and_committed() {
    let handler = ScriptedHandler::succeeding();
    let producer = Arc::new(RecordingProducer::new());
    let stray = InboundMessage::new("inventory.adjusted.v1", 2, 40, "sku-1", "{}");

    let (stats, probe) = run_to_completion(
        vec![stray],
        handler.clone(),
        &producer,
        ConsumerOptions::new(vec![ORDER_CREATED_V1.to_string(), "inventory.adjusted.v1".to_string()]),
    )
    .await;

    assert_eq!(handler.call_count(), 0);
    assert!(producer.sent().is_empty());
    assert_eq!(probe.committed_offsets(), vec![40]);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn empty_payload_is_skipped_and_committed() {
    let tombstone = InboundMessage {
        payload: None,
        ..order(3, "")
    };
    let handler = ScriptedHandler::succeeding();
    let producer = Arc::new(RecordingProducer::new());

    let (stats, probe) =
        run_to_completion(vec![tombstone], handler.clone(), &producer, options()).await;

    assert_eq!(handler.call_count(), 0);
    assert_eq!(probe.committed_offsets(), vec![3]);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn dead_letter_failure_withholds_offset_and_redelivers() {
    let handler = ScriptedHandler::always_failing();
    let producer = Arc::new(RecordingProducer::new().failing_first(1));

    let (stats, probe) =
        run_to_completion(vec![order(9, "{}")], handler.clone(), &producer, options()).await;

    // first pass: 3 attempts, DLQ publish fails, offset withheld
    // second pass: 3 attempts, DLQ publish succeeds, offset committed
    assert_eq!(handler.call_count(), 6);
    assert_eq!(probe.rewinds().len(), 1);
    assert_eq!(probe.delivered().len(), 2);
    assert_eq!(probe.committed_offsets(), vec![9]);
    assert_eq!(producer.attempts(), 2);
    assert_eq!(producer.sent_to(DLQ).len(), 1);
    assert_eq!(stats.withheld, 1);
    assert_eq!(stats.dead_lettered, 1);
}

#[tokio::test]
async fn published_order_reaches_handler_with_key_and_payload() {
    let producer = Arc::new(RecordingProducer::new());
    let data = OrderCreatedV1 {
        order_id: "o1".to_string(),
        user_id: "user-42".to_string(),
        product: "Widget".to_string(),
        quantity: 2,
        price: 9.99,
        created_at_utc: None,
    };
    let envelope = Envelope::builder(ORDER_CREATED_V1, "user-42", data)
        .producer("order-service")
        .build()
        .unwrap();
    producer
        .publish(ORDER_CREATED_V1, envelope.key(), &envelope)
        .await
        .unwrap();

    let sent = producer.sent_to(ORDER_CREATED_V1).remove(0);
    let message = InboundMessage::new(
        ORDER_CREATED_V1,
        0,
        0,
        sent.key.clone(),
        String::from_utf8(sent.payload).unwrap(),
    );

    let handler = ScriptedHandler::succeeding();
    run_to_completion(vec![message], handler.clone(), &producer, options()).await;

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].key, "user-42");
    let payload: serde_json::Value = serde_json::from_str(&calls[0].payload).unwrap();
    assert_eq!(payload["data"]["product"], "Widget");
    assert_eq!(payload["eventType"], ORDER_CREATED_V1);
}

#[derive(Clone, Default)]
struct OrderProbe {
    seen: Arc<Mutex<Vec<OrderCreatedV1>>>,
}

impl EnvelopeHandler for OrderProbe {
    type Data = OrderCreatedV1;
    const SUPPORTED_VERSION: u32 = 1;

    fn handle_envelope(
        &self,
        envelope: Envelope<OrderCreatedV1>,
        _shutdown: ShutdownSignal,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send {
        self.seen.lock().unwrap().push(envelope.into_data());
        async { Ok(()) }
    }
}

#[tokio::test]
async fn malformed_json_is_consumed_without_dead_letter() {
    let typed = OrderProbe::default();
    let producer = Arc::new(RecordingProducer::new());

    let (stats, probe) = run_to_completion(
        vec![order(0, "{not json"), order(1, r#"{"eventType":"order.created.v1"}"#)],
        JsonHandler::new(typed.clone()),
        &producer,
        options(),
    )
    .await;

    assert!(typed.seen.lock().unwrap().is_empty());
    assert!(producer.sent().is_empty());
    assert_eq!(probe.committed_offsets(), vec![0, 1]);
    assert_eq!(stats.handled, 2);
}

#[tokio::test]
async fn newer_schema_version_is_dead_lettered() {
    let wire = r#"{"eventId":"4f1b1c5e-8a3b-4a7e-9d8e-2b0f6f1b2c3d","eventType":"order.created.v1",
        "version":2,"occurredAtUtc":"2026-01-01T00:00:00Z","producer":"order-service",
        "key":"user-42","data":{"orderId":"o1","userId":"user-42","product":"Widget","quantity":2,"price":9.99}}"#;
    let producer = Arc::new(RecordingProducer::new());

    run_to_completion(
        vec![order(0, wire)],
        JsonHandler::new(OrderProbe::default()),
        &producer,
        options(),
    )
    .await;

    let dead = producer.sent_to(DLQ);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].json()["data"]["errorType"], "UnsupportedVersion");
}

fn auto_commit() -> ConsumerOptions {
    ConsumerOptions {
        auto_commit: true,
        ..options()
    }
}

#[tokio::test]
async fn auto_commit_mode_stores_offsets_instead_of_committing() {
    let producer = Arc::new(RecordingProducer::new());
    let stray = InboundMessage::new("inventory.adjusted.v1", 0, 2, "sku-1", "{}");

    let (stats, probe) = run_to_completion(
        vec![order(0, "{}"), order(1, "{}"), stray],
        ScriptedHandler::succeeding(),
        &producer,
        auto_commit(),
    )
    .await;

    assert!(probe.commits().is_empty());
    assert_eq!(probe.stored_offsets(), vec![0, 1, 2]);
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn auto_commit_mode_does_not_store_a_withheld_offset() {
    let producer = Arc::new(RecordingProducer::new().failing_first(1));

    let (stats, probe) = run_to_completion(
        vec![order(9, "{}")],
        ScriptedHandler::always_failing(),
        &producer,
        auto_commit(),
    )
    .await;

    // stored once, by the second pass whose dead letter went through
    assert_eq!(probe.rewinds().len(), 1);
    assert_eq!(probe.stored_offsets(), vec![9]);
    assert!(probe.commits().is_empty());
    assert_eq!(stats.withheld, 1);
    assert_eq!(stats.dead_lettered, 1);
}

#[tokio::test]
async fn poll_errors_do_not_stop_the_loop() {
    let (trigger, signal) = shutdown_channel();
    let source = ScriptedSource::new()
        .with_poll_error("Broker transport failure")
        .with_message(order(0, "{}"))
        .stop_when_drained(trigger);
    let probe = source.probe();
    let producer = Arc::new(RecordingProducer::new());

    let stats = consumer(source, registry(ScriptedHandler::succeeding()), &producer, options())
        .run(signal)
        .await
        .unwrap();

    assert_eq!(stats.poll_errors, 1);
    assert_eq!(stats.handled, 1);
    assert_eq!(probe.committed_offsets(), vec![0]);
}

#[tokio::test]
async fn commit_failures_are_counted_and_processing_continues() {
    let (trigger, signal) = shutdown_channel();
    let source = ScriptedSource::new()
        .with_message(order(0, "{}"))
        .with_message(order(1, "{}"))
        .failing_commits()
        .stop_when_drained(trigger);
    let handler = ScriptedHandler::succeeding();
    let producer = Arc::new(RecordingProducer::new());

    let stats = consumer(source, registry(handler.clone()), &producer, options())
        .run(signal)
        .await
        .unwrap();

    assert_eq!(handler.call_count(), 2);
    assert_eq!(stats.commit_failures, 2);
}

#[tokio::test]
async fn subscription_failure_stops_and_closes_the_source() {
    let source = ScriptedSource::new().failing_subscribe();
    let probe = source.probe();
    let producer = Arc::new(RecordingProducer::new());

    let result = consumer(source, registry(ScriptedHandler::succeeding()), &producer, options())
        .run(ShutdownSignal::never())
        .await;

    assert!(matches!(result, Err(ConsumerError::Subscribe(_))));
    assert_eq!(probe.close_calls(), 1);
}

#[tokio::test]
async fn source_is_subscribed_once_and_closed_once() {
    let producer = Arc::new(RecordingProducer::new());
    let (_, probe) =
        run_to_completion(vec![order(0, "{}")], ScriptedHandler::succeeding(), &producer, options())
            .await;

    assert_eq!(probe.subscribed(), vec![ORDER_CREATED_V1.to_string()]);
    assert_eq!(probe.close_calls(), 1);
}

#[tokio::test]
async fn shutdown_during_handler_leaves_offset_uncommitted() {
    let source = ScriptedSource::new().with_message(order(0, "{}"));
    let probe = source.probe();
    let handler = ScriptedHandler::awaiting_shutdown();
    let producer = Arc::new(RecordingProducer::new());

    let handle = consumer(source, registry(handler.clone()), &producer, options()).spawn();

    tokio::time::timeout(Duration::from_secs(5), async {
        while handler.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("handler was never invoked");

    let stats = tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("consumer loop did not stop")
        .unwrap();

    assert_eq!(handler.call_count(), 1);
    assert!(probe.commits().is_empty());
    assert!(producer.sent().is_empty());
    assert!(probe.is_closed());
    assert_eq!(stats.handled, 0);
}

#[tokio::test]
async fn stop_on_idle_loop_returns_promptly() {
    let source = ScriptedSource::new();
    let probe = source.probe();
    let producer = Arc::new(RecordingProducer::new());

    let consumer = consumer(source, registry(ScriptedHandler::succeeding()), &producer, options());
    let states = consumer.state();
    assert_eq!(*states.borrow(), ConsumerState::Idle);

    let mut handle = consumer.spawn();
    let reached = tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for_state(|state| state == ConsumerState::Polling),
    )
    .await
    .expect("loop never polled");
    assert_eq!(reached, Some(ConsumerState::Polling));

    let stats = tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("consumer loop did not stop")
        .unwrap();

    assert_eq!(stats, ConsumerStats::default());
    assert_eq!(*states.borrow(), ConsumerState::Stopped);
    assert!(probe.is_closed());
}

/// Fails every call and fires `trigger` on call number `stop_on`.
struct FailingUntilShutdown {
    calls: AtomicUsize,
    stop_on: usize,
    trigger: ShutdownTrigger,
}

impl EventHandler for FailingUntilShutdown {
    fn handle<'a>(
        &'a self,
        _key: &'a str,
        _raw_payload: &'a str,
        _shutdown: ShutdownSignal,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.stop_on {
            self.trigger.trigger();
        }
        Box::pin(async { Err(HandlerError::new("InvalidOperation", "still failing")) })
    }
}

#[tokio::test]
async fn shutdown_before_dead_letter_publishes_nothing_and_commits_nothing() {
    let (trigger, signal) = shutdown_channel();
    let source = ScriptedSource::new()
        .with_message(order(0, "{}"))
        .with_message(order(1, "{}"));
    let probe = source.probe();
    let producer = Arc::new(RecordingProducer::new());
    let handler = FailingUntilShutdown {
        calls: AtomicUsize::new(0),
        stop_on: 3,
        trigger,
    };

    let stats = tokio::time::timeout(
        Duration::from_secs(5),
        consumer(source, registry(handler), &producer, options()).run(signal),
    )
    .await
    .expect("consumer loop did not stop")
    .unwrap();

    assert_eq!(producer.attempts(), 0);
    assert!(producer.sent().is_empty());
    assert!(probe.commits().is_empty());
    assert_eq!(probe.delivered().len(), 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(stats.withheld, 0);
    assert!(probe.is_closed());
}

/// Producer whose sends never complete.
struct StalledProducer;

impl EventProducer for StalledProducer {
    fn send(
        &self,
        _topic: &str,
        _key: &str,
        _payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, PublishError>> + Send + '_>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn handle_reports_dead_lettering_then_stopped() {
    let source = ScriptedSource::new().with_message(order(0, "{}"));
    let probe = source.probe();
    let handler = ScriptedHandler::always_failing();
    let dead_letters = DeadLetterPublisher::new(Arc::new(StalledProducer), DLQ, "user-service");

    let consumer = ConsumerLoop::new(
        source,
        Arc::new(registry(handler.clone())),
        dead_letters,
        options(),
    )
    .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(1)));
    let states = consumer.state();

    let mut handle = consumer.spawn();
    let reached = tokio::time::timeout(
        Duration::from_secs(5),
        handle.wait_for_state(|state| state == ConsumerState::DeadLettering),
    )
    .await
    .expect("loop never started dead-lettering");
    assert_eq!(reached, Some(ConsumerState::DeadLettering));
    assert_eq!(handle.state(), ConsumerState::DeadLettering);
    assert_eq!(handler.call_count(), 3);

    let stats = tokio::time::timeout(Duration::from_secs(5), handle.stop())
        .await
        .expect("stalled dead letter blocked shutdown")
        .unwrap();

    assert_eq!(*states.borrow(), ConsumerState::Stopped);
    assert!(probe.commits().is_empty());
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(stats.withheld, 0);
    assert!(probe.is_closed());
}
