//! # Cottontail Core
//!
//! The leaf components of the Cottontail consumer framework.
//!
//! This crate owns everything that does not depend on a running consumer:
//!
//! - **Configuration**: a key/value store with lazily produced, memoized
//!   values and copy-on-derive semantics ([`Configuration`])
//! - **Routing**: match predicates over `(exchange, queue, route)`
//!   ([`Route`], [`RouteEntity`]) kept in specificity order by a
//!   [`RouteCollection`]
//! - **Deliveries**: the read-only view of one inbound message
//!   ([`Delivery`])
//! - **Transport boundary**: the minimal broker contract a consumer needs
//!   ([`Connector`], [`Connection`], [`Channel`], [`Queue`]), plus an
//!   in-process broker for tests and demos ([`transport::memory`])
//!
//! ## Resolution
//!
//! ```text
//! (exchange, queue, routing_key)
//!         │
//!         ▼
//! ┌──────────────────┐   most specific first
//! │ RouteCollection  │──▶ (a, b, c) (a, b, *) (a, *, *) (*, *, c) (*, *, *)
//! └──────────────────┘
//!         │ exchange ▸ queue ▸ route narrowing
//!         ▼
//!    Option<&RouteEntity<H>>
//! ```

pub mod collection;
pub mod config;
pub mod delivery;
pub mod entity;
pub mod error;
pub mod transport;

pub use collection::RouteCollection;
pub use config::Configuration;
pub use delivery::{Delivery, DeliveryInfo, Properties, Signature};
pub use entity::{Field, MatchField, Rank, Route, RouteEntity, Specificity};
pub use error::{
    ConsumeError, ConsumeResult, FailurePoint, TransportError, TransportResult,
};
pub use transport::{
    BoxedChannel, BoxedConnection, BoxedConnector, BoxedQueue, Channel, Connection,
    ConnectionOptions, Connector, DeliverFn, Queue, SubscribeOptions,
};

/// Prelude for common imports.
pub mod prelude {
    pub use super::collection::RouteCollection;
    pub use super::config::Configuration;
    pub use super::delivery::{Delivery, DeliveryInfo, Properties, Signature};
    pub use super::entity::{MatchField, Route, RouteEntity};
    pub use super::error::{ConsumeError, ConsumeResult, TransportError, TransportResult};
    pub use super::transport::{ConnectionOptions, SubscribeOptions};
}
