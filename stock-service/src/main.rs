use std::sync::Arc;

use anyhow::Context;
use common_events::{BufferedEventSink, EventSink, LogEventSink};
use common_observability::StockMetrics;
use stock_service::store::{MemoryStore, PgStore, StockStore};
use stock_service::{build_router, AppState, ServiceConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_store(config: &ServiceConfig) -> anyhow::Result<Arc<dyn StockStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.db_max_connections)
                .await
                .context("failed to connect to DATABASE_URL")?;
            store.migrate().await.context("failed to run migrations")?;
            info!(max_connections = config.db_max_connections, "Using Postgres stock store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory stock store, data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(any(feature = "kafka", feature = "kafka-producer"))]
fn low_stock_sink(config: &ServiceConfig) -> anyhow::Result<Arc<dyn EventSink>> {
    let Some(bootstrap) = &config.kafka_bootstrap else {
        return Ok(Arc::new(LogEventSink));
    };
    let producer: rdkafka::producer::FutureProducer = rdkafka::ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .set("message.timeout.ms", "5000")
        .create()
        .context("failed to create kafka producer")?;
    info!(topic = %config.low_stock_topic, "Publishing low-stock events to Kafka");
    Ok(Arc::new(common_events::KafkaEventSink::new(producer, config.low_stock_topic.clone())))
}

#[cfg(not(any(feature = "kafka", feature = "kafka-producer")))]
fn low_stock_sink(config: &ServiceConfig) -> anyhow::Result<Arc<dyn EventSink>> {
    if config.kafka_bootstrap.is_some() {
        warn!("KAFKA_BOOTSTRAP set but kafka support not compiled in; logging low-stock events instead");
    }
    Ok(Arc::new(LogEventSink))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env()?;
    init_tracing(config.json_logs);

    let store = build_store(&config).await?;
    let events = BufferedEventSink::new(low_stock_sink(&config)?, config.event_buffer_capacity);
    let state = AppState::new(store, Arc::new(events), StockMetrics::new());
    let app = build_router(state, &config.allowed_origins);

    let addr = config.bind_addr();
    info!(%addr, "starting stock-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
