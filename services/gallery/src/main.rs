use anyhow::{Context, Result};
use gallery_service::{
    config::Config,
    coordinator::{RetryCoordinator, RetryPolicy},
    health::{start_health_server, HealthState},
    kafka_consumer::ProcessingConsumer,
    metadata_store::PgPhotoRepository,
    model::KeyLayout,
    object_store::S3ObjectStore,
    producer::GalleryProducer,
    worker::ImageWorker,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Gallery Processing Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize components
    let repository = Arc::new(
        PgPhotoRepository::new(&config.database)
            .await
            .context("Failed to initialize photo repository")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        repository
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 object store")?,
    );

    let producer =
        Arc::new(GalleryProducer::new(&config.kafka).context("Failed to initialize Kafka producer")?);

    let worker = Arc::new(ImageWorker::new(
        store.clone(),
        repository.clone(),
        config.s3.primary_bucket.clone(),
        KeyLayout::from_config(&config.s3),
        config.watermark.clone(),
    ));

    let coordinator = Arc::new(RetryCoordinator::new(
        worker,
        store.clone(),
        producer.clone(),
        producer.clone(),
        RetryPolicy::from_config(&config.retry),
    ));

    let consumer = ProcessingConsumer::new(&config.kafka, coordinator)
        .context("Failed to initialize Kafka consumer")?;

    let health = HealthState::new(config.health.initially_healthy, config.s3.region.clone());
    let shutdown = CancellationToken::new();

    // Spawn Kafka consumer task
    let consumer_shutdown = shutdown.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_shutdown).await {
            error!(error = %e, "Kafka consumer error");
        }
    });

    // Spawn health endpoint task
    let health_config = config.health.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = start_health_server(health, &health_config).await {
            error!(error = %e, "Health server error");
        }
    });

    info!("Gallery service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down gallery service");

    // Let the consumer finish its in-flight message before stopping
    shutdown.cancel();
    if let Err(e) = consumer_handle.await {
        warn!(error = %e, "Consumer task ended abnormally");
    }
    health_handle.abort();

    info!("Gallery service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
