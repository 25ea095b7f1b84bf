//! Registration object a consumer is built from.
//!
//! A [`ConsumerDefinition`] collects everything a consumer needs before it
//! runs: configuration entries, routes, hooks, error handlers, the
//! transport connector and the session setup callback.
//!
//! [`derive`](ConsumerDefinition::derive) copies a definition so a
//! specialised consumer can extend or override a shared base without
//! affecting it.
//!
//! ```rust,ignore
//! let base = ConsumerDefinition::<()>::new()
//!     .transport(broker.connector())
//!     .session(|consumer, connection| async move {
//!         let channel = connection.open_channel().await?;
//!         let queue = channel.queue("billing").await?;
//!         consumer.subscribe(&queue, SubscribeOptions::new()).await
//!     })
//!     .consume(Route::any(), |_, delivery| async move {
//!         tracing::info!(routing_key = delivery.routing_key(), "Fallback");
//!         Ok(())
//!     });
//!
//! let consumer = base
//!     .derive()
//!     .consume("orders.created", handle_order_created)
//!     .build(())
//!     .await?;
//!
//! consumer.run().await?;
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use cottontail_core::{
    BoxedConnection, BoxedConnector, Configuration, ConnectionOptions, ConsumeError, Connector,
    Delivery, Route, RouteCollection, RouteEntity, TransportResult,
};
use tracing::debug;

use crate::config::{ConsumerSettings, LoggingConfig, keys};
use crate::consumer::Consumer;
use crate::dispatcher::Dispatcher;
use crate::error::ConsumerResult;
use crate::handler::{BoxedHandler, ErrorHandler, boxed_error_handler, boxed_handler};
use crate::hooks::{Hooks, Phase, Stage};
use crate::session::{Session, SetupFn, boxed_setup};

/// Everything a consumer is built from.
pub struct ConsumerDefinition<S = ()> {
    config: Configuration,
    routes: RouteCollection<BoxedHandler<S>>,
    hooks: Hooks<S>,
    error_handlers: Vec<ErrorHandler<S>>,
    connector: Option<BoxedConnector>,
    setup: Option<SetupFn<S>>,
}

impl<S: Send + Sync + 'static> Default for ConsumerDefinition<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + Sync + 'static> ConsumerDefinition<S> {
    /// Creates a definition with default settings.
    ///
    /// `raise_on_exception` is `true`, connection options point at a local
    /// broker, and logging settings are produced on first read.
    pub fn new() -> Self {
        let config = Configuration::new();
        config.set(keys::RAISE_ON_EXCEPTION, true);
        config.set(keys::CONNECTION, ConnectionOptions::default());
        config.set_with(keys::LOGGING, LoggingConfig::default);

        Self {
            config,
            routes: RouteCollection::new(),
            hooks: Hooks::default(),
            error_handlers: Vec::new(),
            connector: None,
            setup: None,
        }
    }

    /// Creates a definition seeded from loaded settings.
    pub fn from_settings(settings: &ConsumerSettings) -> Self {
        let definition = Self::new();
        settings.apply_to(&definition.config);
        definition
    }

    /// Returns the configuration store.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Returns the route table.
    pub fn routes(&self) -> &RouteCollection<BoxedHandler<S>> {
        &self.routes
    }

    /// Sets a configuration value.
    pub fn set<T>(self, key: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.config.set(key, value);
        self
    }

    /// Sets a configuration value produced on first read.
    pub fn set_with<T, F>(self, key: impl Into<String>, producer: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.config.set_with(key, producer);
        self
    }

    /// Sets whether a failed delivery stops the consumer.
    pub fn raise_on_exception(self, raise: bool) -> Self {
        self.set(keys::RAISE_ON_EXCEPTION, raise)
    }

    /// Sets the broker connection options.
    pub fn connection(self, options: ConnectionOptions) -> Self {
        self.set(keys::CONNECTION, options)
    }

    /// Replaces the lazily built logging settings.
    pub fn logging(self, logging: LoggingConfig) -> Self {
        self.set(keys::LOGGING, logging)
    }

    /// Sets the connector the session dials.
    pub fn transport<C>(mut self, connector: C) -> Self
    where
        C: Connector + 'static,
    {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Sets the callback run on every new connection.
    pub fn session<F, Fut>(mut self, setup: F) -> Self
    where
        F: Fn(Consumer<S>, BoxedConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransportResult<()>> + Send + 'static,
    {
        self.setup = Some(boxed_setup(setup));
        self
    }

    /// Registers a handler.
    ///
    /// A bare string is taken as the routing key; use a [`Route`] to match
    /// on exchange or queue too. Among equally specific routes the one
    /// registered last wins.
    pub fn consume<R, F, Fut>(mut self, route: R, handler: F) -> Self
    where
        R: Into<Route>,
        F: Fn(Consumer<S>, Arc<Delivery>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let entity = RouteEntity::new(route, boxed_handler(handler));
        debug!(route = %entity.route(), "Registering route");
        self.routes.insert(entity);
        self
    }

    /// Registers a hook run before a stage.
    pub fn before<F, Fut>(mut self, stage: Stage, hook: F) -> Self
    where
        F: Fn(Consumer<S>, Option<Arc<Delivery>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.push(stage, Phase::Before, hook);
        self
    }

    /// Registers a hook run after a stage.
    pub fn after<F, Fut>(mut self, stage: Stage, hook: F) -> Self
    where
        F: Fn(Consumer<S>, Option<Arc<Delivery>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.push(stage, Phase::After, hook);
        self
    }

    /// Registers a callback invoked with every failed delivery.
    pub fn on_error<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Consumer<S>, Arc<Delivery>, ConsumeError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.error_handlers.push(boxed_error_handler(handler));
        self
    }

    /// Returns an independent copy of this definition.
    ///
    /// Configuration follows [`Configuration::derive`]; routes, hooks and
    /// error handlers are copied, so registrations on either side stay
    /// invisible to the other.
    pub fn derive(&self) -> Self {
        Self {
            config: self.config.derive(),
            routes: self.routes.clone(),
            hooks: self.hooks.clone(),
            error_handlers: self.error_handlers.clone(),
            connector: self.connector.clone(),
            setup: self.setup.clone(),
        }
    }

    /// Builds the consumer, running the initialize hooks around it.
    ///
    /// The route table is fixed from here on.
    pub async fn build(self, state: S) -> ConsumerResult<Consumer<S>> {
        let dispatcher = Dispatcher::new(self.routes, self.hooks, self.error_handlers);
        let session = Session::new(self.connector, self.setup);
        let consumer = Consumer::new(state, self.config, dispatcher, session);

        consumer
            .dispatcher()
            .run_initialize_hooks(Phase::Before, &consumer)
            .await?;

        debug!(
            routes = consumer.dispatcher().routes().len(),
            has_transport = consumer.session().has_connector(),
            "Consumer built"
        );

        consumer
            .dispatcher()
            .run_initialize_hooks(Phase::After, &consumer)
            .await?;

        Ok(consumer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConsumerError;
    use cottontail_core::{DeliveryInfo, Properties, Signature};
    use parking_lot::Mutex;

    async fn noop(_: Consumer<Mutex<Vec<String>>>, _: Arc<Delivery>) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_new_seeds_defaults_with_lazy_logging() {
        let definition = ConsumerDefinition::<()>::new();
        let config = definition.config();

        assert_eq!(config.get::<bool>(keys::RAISE_ON_EXCEPTION).as_deref(), Some(&true));
        assert!(config.contains(keys::CONNECTION));
        assert!(!config.is_resolved(keys::LOGGING));
        assert!(config.get::<LoggingConfig>(keys::LOGGING).is_some());
        assert!(config.is_resolved(keys::LOGGING));
    }

    #[test]
    fn test_from_settings_overrides_defaults() {
        let settings = ConsumerSettings {
            raise_on_exception: false,
            connection: ConnectionOptions::new("amqp://rabbit:5672"),
            ..Default::default()
        };

        let definition = ConsumerDefinition::<()>::from_settings(&settings);
        let config = definition.config();

        assert_eq!(config.get::<bool>(keys::RAISE_ON_EXCEPTION).as_deref(), Some(&false));
        assert_eq!(
            config.get::<ConnectionOptions>(keys::CONNECTION).unwrap().url,
            "amqp://rabbit:5672"
        );
    }

    #[test]
    fn test_derive_isolates_routes_and_config() {
        let base = ConsumerDefinition::<Mutex<Vec<String>>>::new()
            .set("prefetch", 10u16)
            .consume("orders.created", noop);

        let child = base
            .derive()
            .set("prefetch", 1u16)
            .consume(Route::new().queue("audit"), noop);
        let base = base.set("region", "eu");

        assert_eq!(base.routes().len(), 1);
        assert_eq!(child.routes().len(), 2);
        assert_eq!(base.config().get::<u16>("prefetch").as_deref(), Some(&10));
        assert_eq!(child.config().get::<u16>("prefetch").as_deref(), Some(&1));
        assert!(!child.config().contains("region"));
    }

    #[tokio::test]
    async fn test_string_route_matches_routing_key_and_last_registration_wins() {
        let consumer = ConsumerDefinition::<Mutex<Vec<String>>>::new()
            .consume("orders.created", |consumer, _| async move {
                consumer.state().lock().push("first".into());
                Ok(())
            })
            .consume("orders.created", |consumer, _| async move {
                consumer.state().lock().push("second".into());
                Ok(())
            })
            .build(Mutex::default())
            .await
            .unwrap();

        let dispatcher = consumer.dispatcher();
        assert!(dispatcher.resolve(&Signature::new("any", "queue", "orders.created")).is_some());
        assert!(dispatcher.resolve(&Signature::new("any", "queue", "orders.updated")).is_none());

        consumer
            .handle(Delivery::new(
                DeliveryInfo::new("x", "y", "orders.created"),
                Properties::default(),
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(*consumer.state().lock(), vec!["second"]);
    }

    #[tokio::test]
    async fn test_initialize_hooks_run_in_order() {
        let consumer = ConsumerDefinition::<Mutex<Vec<String>>>::new()
            .after(Stage::Initialize, |consumer, delivery| async move {
                assert!(delivery.is_none());
                consumer.state().lock().push("after".into());
                Ok(())
            })
            .before(Stage::Initialize, |consumer, _| async move {
                consumer.state().lock().push("before 1".into());
                Ok(())
            })
            .before(Stage::Initialize, |consumer, _| async move {
                consumer.state().lock().push("before 2".into());
                Ok(())
            })
            .build(Mutex::default())
            .await
            .unwrap();

        assert_eq!(*consumer.state().lock(), vec!["before 1", "before 2", "after"]);
    }

    #[tokio::test]
    async fn test_failing_initialize_hook_fails_build() {
        let result = ConsumerDefinition::<()>::new()
            .after(Stage::Initialize, |_, _| async {
                Err(anyhow::anyhow!("missing credentials"))
            })
            .build(())
            .await;

        match result {
            Err(ConsumerError::Initialize { phase, error }) => {
                assert_eq!(phase, Phase::After);
                assert_eq!(error.to_string(), "missing credentials");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("build should fail"),
        }
    }
}
