//! Orders Consumer Example
//!
//! Runs a consumer against the in-memory broker and feeds it a stream of
//! order events:
//!
//! ```text
//! publisher ──▶ queue "orders" ─┬─ orders.created  ──▶ on_created
//!                               ├─ orders.cancelled ──▶ on_cancelled
//!                               └─ anything else   ──▶ fallback
//! publisher ──▶ queue "audit"  ─── exchange "audit" ──▶ on_audit
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package orders-consumer -- --messages 20
//! cargo run --package orders-consumer -- --config cottontail.toml --keep-running
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cottontail::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(about = "Consume order events from an in-memory broker")]
struct Args {
    /// Settings file (defaults to searching for cottontail.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of order events to publish.
    #[arg(long, default_value_t = 10)]
    messages: usize,

    /// Delay between published events, in milliseconds.
    #[arg(long, default_value_t = 50)]
    interval_ms: u64,

    /// Keep consuming after the publisher is done, until Ctrl+C.
    #[arg(long)]
    keep_running: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrderEvent {
    order_id: u64,
    customer: String,
    total_cents: u64,
}

#[derive(Default)]
struct Stats {
    created: AtomicUsize,
    cancelled: AtomicUsize,
    audited: AtomicUsize,
    unhandled: AtomicUsize,
}

// ============================================================================
// Handlers
// ============================================================================

async fn on_created(consumer: Consumer<Stats>, delivery: Arc<Delivery>) -> Result<()> {
    let order: OrderEvent = delivery.payload_json()?;
    if order.total_cents == 0 {
        anyhow::bail!("order {} has an empty total", order.order_id);
    }

    consumer.state().created.fetch_add(1, Ordering::Relaxed);
    info!(
        order_id = order.order_id,
        customer = %order.customer,
        total_cents = order.total_cents,
        "Order created"
    );
    Ok(())
}

async fn on_cancelled(consumer: Consumer<Stats>, delivery: Arc<Delivery>) -> Result<()> {
    let order: OrderEvent = delivery.payload_json()?;
    consumer.state().cancelled.fetch_add(1, Ordering::Relaxed);
    info!(order_id = order.order_id, "Order cancelled");
    Ok(())
}

async fn on_audit(consumer: Consumer<Stats>, delivery: Arc<Delivery>) -> Result<()> {
    consumer.state().audited.fetch_add(1, Ordering::Relaxed);
    debug!(
        routing_key = delivery.routing_key(),
        bytes = delivery.payload().len(),
        "Audit record"
    );
    Ok(())
}

async fn fallback(consumer: Consumer<Stats>, delivery: Arc<Delivery>) -> Result<()> {
    consumer.state().unhandled.fetch_add(1, Ordering::Relaxed);
    warn!(routing_key = delivery.routing_key(), "No dedicated handler");
    Ok(())
}

// ============================================================================
// Publisher
// ============================================================================

async fn publish_orders(broker: MemoryBroker, count: usize, interval: Duration) -> Result<()> {
    const KEYS: [&str; 3] = ["orders.created", "orders.cancelled", "orders.refunded"];

    while ["orders", "audit"]
        .iter()
        .any(|queue| broker.subscriber_count(queue) == 0)
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for i in 0..count {
        let event = OrderEvent {
            order_id: i as u64 + 1,
            customer: format!("customer-{}", i % 4),
            total_cents: 1_000 + (i as u64 * 250),
        };
        let payload = serde_json::to_vec(&event)?;
        let routing_key = KEYS[i % KEYS.len()];

        let order = MemoryMessage::new("orders")
            .exchange("orders")
            .routing_key(routing_key)
            .properties(Properties::default().with_content_type("application/json"))
            .payload(payload.clone());
        if let Err(e) = broker.publish(order).await? {
            error!(error = %e, "Consumer rejected order event");
            break;
        }

        let audit = MemoryMessage::new("audit")
            .exchange("audit")
            .routing_key(routing_key)
            .payload(payload);
        if let Err(e) = broker.publish(audit).await? {
            error!(error = %e, "Consumer rejected audit event");
            break;
        }

        tokio::time::sleep(interval).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let settings = loader.load()?;

    let broker = MemoryBroker::new();
    let consumer = ConsumerDefinition::from_settings(&settings)
        .transport(broker.connector())
        .session(|consumer, connection| async move {
            let channel = connection.open_channel().await?;
            for name in ["orders", "audit"] {
                let queue = channel.queue(name).await?;
                consumer
                    .subscribe(&queue, SubscribeOptions::new().consumer_tag(format!("demo-{name}")))
                    .await?;
            }
            Ok(())
        })
        .consume("orders.created", on_created)
        .consume(Route::new().queue("orders").route("orders.cancelled"), on_cancelled)
        .consume(Route::new().exchange("audit"), on_audit)
        .consume(Route::any(), fallback)
        .after(Stage::Initialize, |consumer, _| async move {
            info!(routes = consumer.dispatcher().routes().len(), "Order consumer ready");
            Ok(())
        })
        .on_error(|_, delivery, error| async move {
            error!(routing_key = delivery.routing_key(), %error, "Order event failed");
        })
        .build(Stats::default())
        .await?;

    let publisher = tokio::spawn(publish_orders(
        broker.clone(),
        args.messages,
        Duration::from_millis(args.interval_ms),
    ));

    if args.keep_running {
        info!("Consuming until Ctrl+C");
        let result = consumer.run().await;
        publisher.abort();
        result?;
    } else {
        consumer.start(false).await?;
        publisher.await??;
        consumer.stop().await?;
    }

    let stats = consumer.state();
    info!(
        created = stats.created.load(Ordering::Relaxed),
        cancelled = stats.cancelled.load(Ordering::Relaxed),
        audited = stats.audited.load(Ordering::Relaxed),
        unhandled = stats.unhandled.load(Ordering::Relaxed),
        "Consumer stopped"
    );

    if let Some(failure) = consumer.take_failure() {
        return Err(failure.into());
    }
    Ok(())
}
