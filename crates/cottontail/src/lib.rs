//! # Cottontail
//!
//! Message consumers for AMQP-style brokers: every delivery is routed on
//! its `(exchange, queue, routing key)` to the most specific registered
//! handler, wrapped in before/after hooks, and failures either stop the
//! consumer or are logged and swallowed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  subscribe   ┌──────────┐  deliver   ┌────────────┐
//! │  Session  │─────────────▶│  Broker  │───────────▶│ Dispatcher │──▶ handler
//! └───────────┘              └──────────┘            └────────────┘
//!       ▲                                                  │ failure
//!       │ start / stop        ┌──────────┐                 ▼
//!       └─────────────────────│ Consumer │◀──── stop (raise_on_exception)
//!                             └──────────┘
//!                                   │ blocks on
//!                             ┌──────────┐
//!                             │ Launcher │◀── SIGINT / SIGTERM / SIGQUIT
//!                             └──────────┘
//! ```
//!
//! - **Core** ([`core`]): configuration store, routes and route table,
//!   deliveries, the transport boundary and an in-memory broker
//! - **Runtime** ([`runtime`]): consumer definitions, the dispatch
//!   pipeline, session and launcher, settings and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cottontail::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = ConfigLoader::new().load()?;
//!
//!     let consumer = ConsumerDefinition::from_settings(&settings)
//!         .transport(my_amqp_connector())
//!         .session(|consumer, connection| async move {
//!             let queue = connection.open_channel().await?.queue("billing").await?;
//!             consumer.subscribe(&queue, SubscribeOptions::new()).await
//!         })
//!         .consume("orders.created", |_, delivery| async move {
//!             let order: serde_json::Value = delivery.payload_json()?;
//!             info!(%order, "Order created");
//!             Ok(())
//!         })
//!         .consume(Route::any(), |_, delivery| async move {
//!             warn!(routing_key = delivery.routing_key(), "Unhandled event");
//!             Ok(())
//!         })
//!         .build(())
//!         .await?;
//!
//!     consumer.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML settings files
//! - `yaml-config`: YAML settings files
//! - `json-log`: JSON log output

pub use cottontail_core as core;
pub use cottontail_runtime as runtime;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use cottontail_core::transport::memory::{MemoryBroker, MemoryMessage};
    pub use cottontail_core::{
        BoxedConnection, BoxedQueue, Configuration, ConnectionOptions, ConsumeError, Delivery,
        MatchField, Properties, Route, SubscribeOptions, TransportError,
    };
    pub use cottontail_runtime::{
        ConfigLoader, Consumer, ConsumerDefinition, ConsumerError, ConsumerResult,
        ConsumerSettings, LoggingConfig, Outcome, Phase, Stage,
    };
    pub use cottontail_runtime::tracing::{debug, error, info, trace, warn};
}
