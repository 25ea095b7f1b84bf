//! Ordered before/after hook lists per lifecycle stage.
//!
//! Hooks run in declaration order. `Initialize` hooks run once while a
//! consumer is built and receive no delivery; `Consume` hooks run around
//! every delivery.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use cottontail_core::Delivery;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::consumer::Consumer;

/// A lifecycle stage hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Consumer construction.
    Initialize,
    /// Processing of one delivery.
    Consume,
}

/// Whether a hook runs before or after its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => f.write_str("before"),
            Self::After => f.write_str("after"),
        }
    }
}

/// A type-erased hook.
pub type HookFn<S> = Arc<
    dyn Fn(Consumer<S>, Option<Arc<Delivery>>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

struct HookEntry<S> {
    stage: Stage,
    phase: Phase,
    hook: HookFn<S>,
}

impl<S> Clone for HookEntry<S> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage,
            phase: self.phase,
            hook: Arc::clone(&self.hook),
        }
    }
}

/// Hooks registered on a consumer definition.
pub struct Hooks<S> {
    entries: Vec<HookEntry<S>>,
}

impl<S> Default for Hooks<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S> Clone for Hooks<S> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<S> Hooks<S> {
    /// Appends a hook.
    pub fn push<F, Fut>(&mut self, stage: Stage, phase: Phase, hook: F)
    where
        F: Fn(Consumer<S>, Option<Arc<Delivery>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.entries.push(HookEntry {
            stage,
            phase,
            hook: Arc::new(move |consumer: Consumer<S>, delivery: Option<Arc<Delivery>>| {
                hook(consumer, delivery).boxed()
            }),
        });
    }

    /// Returns the hooks of one stage and phase, in declaration order.
    pub fn iter(&self, stage: Stage, phase: Phase) -> impl Iterator<Item = &HookFn<S>> {
        self.entries
            .iter()
            .filter(move |entry| entry.stage == stage && entry.phase == phase)
            .map(|entry| &entry.hook)
    }

    /// Returns the number of hooks in one slot.
    pub fn count(&self, stage: Stage, phase: Phase) -> usize {
        self.iter(stage, phase).count()
    }

    /// Returns `true` when no hook is registered for any stage.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
