//! Per-delivery pipeline: hooks, route resolution, handler, error policy.
//!
//! ```text
//! delivery ─▶ before(Consume) ─▶ resolve ─▶ handler ─▶ after(Consume)
//!                  │                │           │            │
//!                  └──── failure ───┴───────────┴────────────┘
//!                              │
//!                 log ▸ error handlers ▸ policy
//!                              │
//!         raise_on_exception ──┴── stop consumer, return Err
//!         otherwise ─────────────── continue (after hooks still run)
//! ```
//!
//! A delivery no route matches is logged at `warn` and dropped; it is not
//! an error.

use std::sync::Arc;

use cottontail_core::{
    ConsumeError, ConsumeResult, Delivery, FailurePoint, RouteCollection, RouteEntity, Signature,
};
use tracing::{Instrument, Level, debug, error, span, warn};

use crate::consumer::Consumer;
use crate::error::{ConsumerError, ConsumerResult};
use crate::handler::{BoxedHandler, ErrorHandler, contain};
use crate::hooks::{Hooks, Phase, Stage};

/// How a delivery was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A handler processed the delivery.
    Handled,
    /// No route matched; the delivery was dropped.
    Unrouted,
    /// A failure was logged and swallowed.
    Recovered,
}

/// Routes deliveries to handlers and applies the error policy.
pub struct Dispatcher<S> {
    routes: RouteCollection<BoxedHandler<S>>,
    hooks: Hooks<S>,
    error_handlers: Vec<ErrorHandler<S>>,
}

impl<S: Send + Sync + 'static> Dispatcher<S> {
    pub(crate) fn new(
        routes: RouteCollection<BoxedHandler<S>>,
        hooks: Hooks<S>,
        error_handlers: Vec<ErrorHandler<S>>,
    ) -> Self {
        Self {
            routes,
            hooks,
            error_handlers,
        }
    }

    /// Returns the route table.
    pub fn routes(&self) -> &RouteCollection<BoxedHandler<S>> {
        &self.routes
    }

    /// Returns the lifecycle hooks.
    pub fn hooks(&self) -> &Hooks<S> {
        &self.hooks
    }

    /// Returns the entity a delivery with this signature would be routed to.
    pub fn resolve(&self, signature: &Signature) -> Option<&RouteEntity<BoxedHandler<S>>> {
        self.routes.resolve_signature(signature)
    }

    /// Processes one delivery.
    ///
    /// With `raise_on_exception` set (the default), a failure stops the
    /// consumer and is returned. Otherwise it is swallowed and the outcome
    /// is [`Outcome::Recovered`].
    pub async fn handle(&self, consumer: &Consumer<S>, delivery: Delivery) -> ConsumeResult<Outcome> {
        let signature = delivery.signature();
        let span = span!(
            Level::DEBUG,
            "consume",
            exchange = %signature.exchange,
            queue = %signature.queue,
            routing_key = %signature.routing_key,
        );

        self.pipeline(consumer, Arc::new(delivery), signature)
            .instrument(span)
            .await
    }

    async fn pipeline(
        &self,
        consumer: &Consumer<S>,
        delivery: Arc<Delivery>,
        signature: Signature,
    ) -> ConsumeResult<Outcome> {
        let result = match self
            .run_consume_hooks(Phase::Before, consumer, &delivery, &signature)
            .await
        {
            Ok(()) => self.invoke(consumer, &delivery, &signature).await,
            Err(e) => Err(e),
        };

        let mut outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => self.fail(consumer, &delivery, e).await?,
        };

        if let Err(e) = self
            .run_consume_hooks(Phase::After, consumer, &delivery, &signature)
            .await
        {
            outcome = self.fail(consumer, &delivery, e).await?;
        }

        Ok(outcome)
    }

    async fn invoke(
        &self,
        consumer: &Consumer<S>,
        delivery: &Arc<Delivery>,
        signature: &Signature,
    ) -> ConsumeResult<Outcome> {
        let Some(entity) = self.routes.resolve_signature(signature) else {
            warn!(
                exchange = %signature.exchange,
                queue = %signature.queue,
                routing_key = %signature.routing_key,
                "No route matches delivery, dropping it"
            );
            return Ok(Outcome::Unrouted);
        };

        debug!(route = %entity.route(), sequence = entity.sequence(), "Dispatching to handler");
        let handler = Arc::clone(entity.handler());

        contain(handler(consumer.clone(), Arc::clone(delivery)))
            .await
            .map_err(|f| f.into_consume_error(FailurePoint::Handler, signature.clone()))?;

        Ok(Outcome::Handled)
    }

    async fn run_consume_hooks(
        &self,
        phase: Phase,
        consumer: &Consumer<S>,
        delivery: &Arc<Delivery>,
        signature: &Signature,
    ) -> ConsumeResult<()> {
        let point = match phase {
            Phase::Before => FailurePoint::BeforeConsume,
            Phase::After => FailurePoint::AfterConsume,
        };

        for hook in self.hooks.iter(Stage::Consume, phase) {
            contain(hook(consumer.clone(), Some(Arc::clone(delivery))))
                .await
                .map_err(|f| f.into_consume_error(point, signature.clone()))?;
        }
        Ok(())
    }

    /// Runs the initialize hooks of one phase.
    pub(crate) async fn run_initialize_hooks(
        &self,
        phase: Phase,
        consumer: &Consumer<S>,
    ) -> ConsumerResult<()> {
        for hook in self.hooks.iter(Stage::Initialize, phase) {
            contain(hook(consumer.clone(), None))
                .await
                .map_err(|f| ConsumerError::Initialize {
                    phase,
                    error: f.into_anyhow(),
                })?;
        }
        Ok(())
    }

    /// Logs a failure, notifies the error handlers and applies the policy.
    async fn fail(
        &self,
        consumer: &Consumer<S>,
        delivery: &Arc<Delivery>,
        err: ConsumeError,
    ) -> ConsumeResult<Outcome> {
        let signature = err.signature();
        error!(
            exchange = %signature.exchange,
            queue = %signature.queue,
            routing_key = %signature.routing_key,
            point = %err.point(),
            error = %err,
            "Failed to consume delivery"
        );

        for handler in &self.error_handlers {
            let notify = handler(consumer.clone(), Arc::clone(delivery), err.clone());
            if let Err(f) = contain(async move {
                notify.await;
                Ok(())
            })
            .await
            {
                error!(error = %f.into_anyhow(), "Error handler failed");
            }
        }

        if consumer.raise_on_exception() {
            consumer.fail(err.clone()).await;
            return Err(err);
        }

        debug!("Failure swallowed, continuing with the next delivery");
        Ok(Outcome::Recovered)
    }
}
