//! A running consumer: state, configuration, dispatcher, session and
//! launcher behind one cheaply cloneable handle.
//!
//! Consumers are built from a [`ConsumerDefinition`](crate::ConsumerDefinition).
//! Handlers and hooks receive a clone of the consumer so they can read its
//! state and configuration, subscribe further queues or stop it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use cottontail_core::{
    BoxedQueue, Configuration, ConnectionOptions, ConsumeError, ConsumeResult, DeliverFn, Delivery,
    DeliveryInfo, Properties, SubscribeOptions, TransportResult,
};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::{LoggingConfig, keys};
use crate::dispatcher::{Dispatcher, Outcome};
use crate::error::{ConsumerError, ConsumerResult};
use crate::launcher::{Launcher, Shutdown};
use crate::logging;
use crate::session::Session;

struct ConsumerInner<S> {
    state: S,
    config: Configuration,
    dispatcher: Dispatcher<S>,
    session: Session<S>,
    launcher: Launcher,
    running: AtomicBool,
    failure: Mutex<Option<ConsumeError>>,
}

/// A message consumer.
pub struct Consumer<S = ()> {
    inner: Arc<ConsumerInner<S>>,
}

impl<S> Clone for Consumer<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + Sync + 'static> Consumer<S> {
    pub(crate) fn new(
        state: S,
        config: Configuration,
        dispatcher: Dispatcher<S>,
        session: Session<S>,
    ) -> Self {
        Self {
            inner: Arc::new(ConsumerInner {
                state,
                config,
                dispatcher,
                session,
                launcher: Launcher::new(),
                running: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Returns the user state.
    pub fn state(&self) -> &S {
        &self.inner.state
    }

    /// Returns the configuration store.
    pub fn config(&self) -> &Configuration {
        &self.inner.config
    }

    /// Returns the dispatch pipeline.
    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.inner.dispatcher
    }

    /// Returns the broker session.
    pub fn session(&self) -> &Session<S> {
        &self.inner.session
    }

    /// Returns `true` between a successful `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Reads the error policy; absent or mistyped means `true`.
    pub fn raise_on_exception(&self) -> bool {
        self.config()
            .get::<bool>(keys::RAISE_ON_EXCEPTION)
            .is_none_or(|raise| *raise)
    }

    /// Returns the connection options from the configuration store.
    pub fn connection_options(&self) -> ConnectionOptions {
        self.config()
            .get::<ConnectionOptions>(keys::CONNECTION)
            .map(|options| (*options).clone())
            .unwrap_or_default()
    }

    /// Starts the session, then blocks until shutdown when `blocking`.
    ///
    /// A blocking start returns the failure that stopped the consumer, if
    /// any. A non-blocking start returns as soon as the session is set up.
    pub async fn start(&self, blocking: bool) -> ConsumerResult<()> {
        if let Some(logging) = self.config().get::<LoggingConfig>(keys::LOGGING)
            && logging::init_from_config(&logging)
        {
            debug!(level = %logging.level, "Installed tracing subscriber");
        }

        info!(
            blocking,
            routes = self.dispatcher().routes().len(),
            "Starting consumer"
        );

        self.inner.launcher.arm();
        self.inner.failure.lock().take();
        self.inner.running.store(true, Ordering::SeqCst);

        if let Err(e) = self.inner.session.start(self).await {
            error!(error = %e, "Failed to start session");
            self.inner.running.store(false, Ordering::SeqCst);
            self.inner.launcher.stop();
            return Err(e);
        }

        if !blocking {
            return Ok(());
        }

        match self.inner.launcher.start().await {
            Ok(Shutdown::Signal(signal)) => {
                info!(signal, "Received termination signal");
                self.stop().await?;
            }
            Ok(Shutdown::Released) => {}
            Err(e) => {
                if let Err(stop_error) = self.stop().await {
                    error!(error = %stop_error, "Failed to stop consumer");
                }
                return Err(e);
            }
        }

        match self.take_failure() {
            Some(failure) => Err(ConsumerError::Consume(failure)),
            None => Ok(()),
        }
    }

    /// Starts the consumer and blocks until shutdown.
    pub async fn run(&self) -> ConsumerResult<()> {
        self.start(true).await
    }

    /// Releases the launcher and closes the session.
    ///
    /// Safe to call repeatedly and concurrently; later calls are no-ops.
    pub async fn stop(&self) -> ConsumerResult<()> {
        let was_running = self.inner.running.swap(false, Ordering::SeqCst);
        self.inner.launcher.stop();

        if was_running {
            info!("Shutting down consumer");
        }
        self.inner.session.stop().await
    }

    /// Subscribes the dispatcher to a queue.
    ///
    /// Called from the session setup callback. The subscription holds only a
    /// weak reference to the consumer; deliveries arriving after the
    /// consumer is dropped are ignored.
    pub async fn subscribe(&self, queue: &BoxedQueue, options: SubscribeOptions) -> TransportResult<()> {
        let consumer = Arc::downgrade(&self.inner);
        let deliver: DeliverFn = Arc::new(
            move |info: DeliveryInfo, properties: Properties, payload: Vec<u8>| {
                let consumer: Weak<ConsumerInner<S>> = consumer.clone();
                async move {
                    let Some(inner) = consumer.upgrade() else {
                        return Ok(());
                    };
                    Consumer { inner }
                        .handle(Delivery::new(info, properties, payload))
                        .await
                        .map(|_| ())
                }
                .boxed()
            },
        );

        debug!(queue = queue.name(), exclusive = options.exclusive, "Subscribing to queue");
        queue.subscribe(options, deliver).await
    }

    /// Dispatches one delivery through the pipeline.
    pub async fn handle(&self, delivery: Delivery) -> ConsumeResult<Outcome> {
        self.inner.dispatcher.handle(self, delivery).await
    }

    /// Takes the failure that stopped the consumer, if any.
    pub fn take_failure(&self) -> Option<ConsumeError> {
        self.inner.failure.lock().take()
    }

    /// Records a fatal failure and stops the consumer.
    pub(crate) async fn fail(&self, failure: ConsumeError) {
        {
            let mut slot = self.inner.failure.lock();
            if slot.is_none() {
                *slot = Some(failure);
            }
        }

        if let Err(e) = self.stop().await {
            error!(error = %e, "Failed to stop consumer after a failed delivery");
        }
    }
}
