mod handler;
mod stats;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use servicekit::config::{AppConfig, load_config};
use servicekit::consumer::{Consumer, MessageContext};
use servicekit::logger::setup_logger;
use servicekit::model::SendOptions;
use servicekit::producer::ServiceBusClientProducerExt;
use servicekit::service_bus::{AzureServiceBusClient, InMemoryServiceBus, ServiceBusClient};
use stats::ConsumerStats;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "demo-service",
    about = "Consumes a Service Bus queue or subscription and logs every message"
)]
struct Cli {
    /// Configuration file (TOML, JSON or YAML); defaults to ./config.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use an in-process broker instead of Azure Service Bus
    #[arg(long)]
    in_memory: bool,

    /// Number of sample JSON messages to send before consuming
    #[arg(long, default_value_t = 0)]
    produce: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    setup_logger(config.logging()).context("Failed to install logger")?;

    let app = config.app();
    log::info!(
        "Starting {} {} in {}",
        app.name(),
        app.version(),
        app.environment()
    );

    let shutdown = CancellationToken::new();
    let client = connect(&config, cli.in_memory, &shutdown).await?;
    let stats = Arc::new(ConsumerStats::new());

    if cli.produce > 0 {
        produce_samples(&client, &config, cli.produce, &stats).await?;
    }

    let handler_stats = stats.clone();
    let consumer = Consumer::new(
        client.as_ref(),
        config.servicebus().consumer_config(),
        move |ctx: MessageContext| handler::log_message(ctx, handler_stats.clone()),
    )
    .await
    .context("Failed to create consumer")?;

    consumer.start(shutdown.clone()).await?;
    log::info!("Consuming {} (press Ctrl+C to stop)", consumer.config().queue_or_subscription);

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Failed to listen for Ctrl+C: {e}");
                }
                log::info!("Shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => stats.display(),
        }
    }

    let stopped = consumer.stop(None).await;
    shutdown.cancel();

    stats.display();
    stopped.context("Consumer did not stop cleanly")?;
    log::info!("{} stopped", app.name());
    Ok(())
}

async fn connect(
    config: &AppConfig,
    in_memory: bool,
    shutdown: &CancellationToken,
) -> anyhow::Result<Arc<dyn ServiceBusClient>> {
    let servicebus = config.servicebus();

    if in_memory {
        let bus = InMemoryServiceBus::new();
        if let (Some(topic), Some(subscription)) = (servicebus.topic(), servicebus.subscription()) {
            bus.create_subscription(topic, subscription).await;
        }
        log::info!("Using in-memory broker");
        return Ok(Arc::new(bus));
    }

    let connection_string = servicebus
        .connection_string()
        .context("servicebus.connection_string is required unless --in-memory is set")?;

    log::info!("Connecting to Service Bus...");
    let client = AzureServiceBusClient::connect_with_retry(
        connection_string,
        &config.retry().retry_config(),
        shutdown,
    )
    .await
    .context("Failed to connect to Service Bus")?;
    Ok(Arc::new(client))
}

async fn produce_samples(
    client: &Arc<dyn ServiceBusClient>,
    config: &AppConfig,
    count: u32,
    stats: &ConsumerStats,
) -> anyhow::Result<()> {
    let producer = client.producer_for(config.servicebus().send_target())?;
    let options = SendOptions::default().with_property("source", config.app().name());

    for sequence in 1..=count {
        let data = json!({
            "sequence": sequence,
            "timestamp": Utc::now().to_rfc3339(),
            "content": format!("Sample message #{sequence}"),
        });
        let id = producer.send_json_with(&data, options.clone()).await?;
        log::debug!("Sent sample message {id}");
    }

    stats.record_sent(u64::from(count));
    log::info!("Sent {count} sample messages to {}", producer.target());
    Ok(())
}
