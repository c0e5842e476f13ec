//! Eventline consumer service.
//!
//! Loads `eventline.toml` (or the file named by `EVENTLINE_CONFIG`), applies
//! `EVENTLINE_*` overrides, and runs one consumer loop until Ctrl+C or
//! SIGTERM. On shutdown the loop drains, the subscription is closed and the
//! shared producer is flushed.
//!
//! ```bash
//! RUST_LOG=info,eventline=debug cargo run -p eventline-service
//! ```

mod handlers;

use anyhow::Context;
use eventline_core::config::PipelineConfig;
use eventline_core::shutdown::shutdown_channel;
use eventline_redpanda::{KafkaEventProducer, KafkaMessageSource};
use eventline_runtime::consumer::{ConsumerLoop, ConsumerOptions};
use eventline_runtime::dead_letter::DeadLetterPublisher;
use eventline_runtime::metrics::MetricsServer;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,eventline=debug,rdkafka=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match PipelineConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Refusing to start with invalid configuration");
            return Err(e.into());
        },
    };

    tracing::info!(
        group_id = %config.consumer.group_id,
        topics = ?config.consumer.topics,
        dlq_topic = %config.dead_letter.topic,
        "Starting eventline service"
    );

    if let Some(addr) = config.metrics.listen_addr {
        MetricsServer::new(addr)
            .start()
            .context("Failed to start metrics endpoint")?;
    }

    let producer = Arc::new(
        KafkaEventProducer::from_settings(&config.producer).context("Failed to create producer")?,
    );
    let source =
        KafkaMessageSource::from_settings(&config.consumer).context("Failed to create consumer")?;
    let registry = handlers::registry().context("Failed to register handlers")?;

    let dead_letters = DeadLetterPublisher::new(
        producer.clone(),
        &config.dead_letter.topic,
        producer.client_id(),
    );

    let (trigger, signal) = shutdown_channel();
    let consumer = ConsumerLoop::new(
        source,
        Arc::new(registry),
        dead_letters,
        ConsumerOptions::from_settings(&config.consumer),
    );

    let run = consumer.run(signal);
    tokio::pin!(run);

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        () = shutdown_signal() => {
            tracing::info!("Shutdown signal received, draining consumer...");
            trigger.trigger();
            run.await
        }
    };

    let dropped = tokio::task::spawn_blocking(move || producer.close())
        .await
        .context("Producer flush task failed")?;
    if dropped > 0 {
        tracing::warn!(dropped, "Undelivered messages discarded at shutdown");
    }

    let stats = outcome.context("Consumer loop failed")?;
    tracing::info!(?stats, "Service stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
