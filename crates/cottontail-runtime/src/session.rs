//! Broker connection lifecycle for one consumer.
//!
//! A [`Session`] holds the connector, the user setup callback and the live
//! connection (absent when stopped). `start` always begins from a clean
//! slate: an existing connection is closed before a new one is opened.
//!
//! The connection slot is only locked to swap handles, never across the
//! connect or the setup callback, so setup may call back into the consumer
//! (including `stop`). A `stop` or another `start` that lands while setup is
//! running supersedes it: the connection being set up is closed instead of
//! kept.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use cottontail_core::{BoxedConnection, BoxedConnector, TransportResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::consumer::Consumer;
use crate::error::{ConsumerError, ConsumerResult};

/// Callback wiring channels, queues and subscriptions on a new connection.
pub type SetupFn<S> = Arc<
    dyn Fn(Consumer<S>, BoxedConnection) -> BoxFuture<'static, TransportResult<()>> + Send + Sync,
>;

pub(crate) fn boxed_setup<S, F, Fut>(setup: F) -> SetupFn<S>
where
    F: Fn(Consumer<S>, BoxedConnection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TransportResult<()>> + Send + 'static,
{
    Arc::new(move |consumer: Consumer<S>, connection: BoxedConnection| {
        setup(consumer, connection).boxed()
    })
}

/// Owns the connection of one consumer.
pub struct Session<S> {
    connector: Option<BoxedConnector>,
    setup: Option<SetupFn<S>>,
    connection: Mutex<Option<BoxedConnection>>,
    attempts: AtomicUsize,
    generation: AtomicU64,
}

impl<S: Send + Sync + 'static> Session<S> {
    pub(crate) fn new(connector: Option<BoxedConnector>, setup: Option<SetupFn<S>>) -> Self {
        Self {
            connector,
            setup,
            connection: Mutex::new(None),
            attempts: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Connects and runs the setup callback.
    ///
    /// Each call dials the next host of the configured rotation. On a setup
    /// failure the new connection is closed and the error returned.
    ///
    /// If the session is stopped or restarted while setup runs, the new
    /// connection is closed and `start` returns without keeping it.
    pub async fn start(&self, consumer: &Consumer<S>) -> ConsumerResult<()> {
        let (generation, existing) = {
            let mut slot = self.connection.lock().await;
            (self.generation.fetch_add(1, Ordering::SeqCst) + 1, slot.take())
        };

        if let Some(existing) = existing {
            debug!(connection = existing.id(), "Session already started, restarting");
            close_connection(&existing).await;
        }

        let connector = self
            .connector
            .as_ref()
            .ok_or(ConsumerError::MissingTransport)?;

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let options = consumer.connection_options().for_attempt(attempt);
        debug!(endpoint = %options.url, attempt, "Connecting to broker");

        let connection = connector.connect(&options).await?;

        if let Some(setup) = &self.setup
            && let Err(e) = setup(consumer.clone(), Arc::clone(&connection)).await
        {
            warn!(connection = connection.id(), error = %e, "Session setup failed");
            close_connection(&connection).await;
            return Err(e.into());
        }

        let superseded = {
            let mut slot = self.connection.lock().await;
            if self.generation.load(Ordering::SeqCst) == generation {
                *slot = Some(Arc::clone(&connection));
                false
            } else {
                true
            }
        };

        if superseded {
            debug!(connection = connection.id(), "Session superseded during setup");
            close_connection(&connection).await;
            return Ok(());
        }

        info!(connection = connection.id(), endpoint = %options.url, "Session started");
        Ok(())
    }

    /// Closes the connection, if any.
    ///
    /// Also supersedes a `start` whose setup is still running.
    pub async fn stop(&self) -> ConsumerResult<()> {
        let existing = {
            let mut slot = self.connection.lock().await;
            self.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        let Some(connection) = existing else {
            return Ok(());
        };

        connection.close().await?;
        debug!(connection = connection.id(), "Session stopped");
        Ok(())
    }

    /// Returns the live connection.
    pub async fn connection(&self) -> Option<BoxedConnection> {
        self.connection.lock().await.clone()
    }

    /// Returns `true` when a transport was configured.
    pub fn has_connector(&self) -> bool {
        self.connector.is_some()
    }
}

async fn close_connection(connection: &BoxedConnection) {
    if let Err(e) = connection.close().await {
        warn!(connection = connection.id(), error = %e, "Failed to close connection");
    }
}
