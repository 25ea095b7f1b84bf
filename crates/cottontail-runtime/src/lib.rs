//! # Cottontail Runtime
//!
//! Lifecycle and dispatch for Cottontail consumers:
//!
//! - [`ConsumerDefinition`]: routes, hooks, error handlers, transport and
//!   session setup, collected before a consumer runs
//! - [`Consumer`]: the running instance, with `start`/`stop`/`run`
//! - [`Dispatcher`]: the per-delivery pipeline and error policy
//! - [`Session`]: connection lifecycle with a user setup callback
//! - [`Launcher`]: blocks until a termination signal or a programmatic stop
//! - [`config`]: typed settings loaded from files and the environment
//! - [`logging`]: `tracing` subscriber initialisation
//!
//! ```rust,ignore
//! use cottontail_core::transport::memory::MemoryBroker;
//! use cottontail_runtime::ConsumerDefinition;
//!
//! let broker = MemoryBroker::new();
//! let consumer = ConsumerDefinition::<()>::new()
//!     .transport(broker.connector())
//!     .session(|consumer, connection| async move {
//!         let queue = connection.open_channel().await?.queue("billing").await?;
//!         consumer.subscribe(&queue, Default::default()).await
//!     })
//!     .consume("orders.created", |_, delivery| async move {
//!         tracing::info!(payload = ?delivery.payload_str(), "Order created");
//!         Ok(())
//!     })
//!     .build(())
//!     .await?;
//!
//! consumer.run().await?;
//! ```

pub mod config;
pub mod consumer;
pub mod definition;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod launcher;
pub mod logging;
pub mod session;

pub use config::{ConfigError, ConfigLoader, ConfigResult, ConsumerSettings, LoggingConfig};
pub use consumer::Consumer;
pub use definition::ConsumerDefinition;
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{ConsumerError, ConsumerResult};
pub use handler::{BoxedHandler, ErrorHandler};
pub use hooks::{HookFn, Hooks, Phase, Stage};
pub use launcher::{Launcher, Shutdown};
pub use logging::{LoggingBuilder, SpanEvents};
pub use session::{Session, SetupFn};

pub use tracing;

/// Prelude for consumer definitions.
pub mod prelude {
    pub use super::{
        Consumer, ConsumerDefinition, ConsumerError, ConsumerResult, ConsumerSettings, Outcome,
        Phase, Stage,
    };
    pub use tracing::{debug, error, info, trace, warn};
}
