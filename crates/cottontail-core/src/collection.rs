//! Specificity-ordered route table.
//!
//! A [`RouteCollection`] keeps its entities sorted most specific first.
//! Entities of equal specificity are ordered by insertion sequence,
//! newest first, so the most recently registered entity wins a tie.

use tracing::trace;

use crate::delivery::Signature;
use crate::entity::{Field, RouteEntity};

/// An ordered set of [`RouteEntity`]s resolving deliveries to handlers.
#[derive(Clone)]
pub struct RouteCollection<H> {
    entities: Vec<RouteEntity<H>>,
    next_sequence: u64,
}

impl<H> Default for RouteCollection<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> RouteCollection<H> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Inserts an entity and re-establishes priority order.
    ///
    /// Returns the insertion sequence number stamped on the entity.
    pub fn insert(&mut self, mut entity: RouteEntity<H>) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        entity.stamp(sequence);
        trace!(route = %entity.route(), sequence, "Inserting route entity");

        self.entities.push(entity);
        self.entities.sort_by(RouteEntity::cmp_priority);
        sequence
    }

    /// Resolves a delivery signature to the best matching entity.
    ///
    /// Candidates are narrowed by exchange, then by queue; the first
    /// remaining entity whose route field matches is the most specific
    /// match overall.
    pub fn resolve(&self, exchange: &str, queue: &str, routing_key: &str) -> Option<&RouteEntity<H>> {
        self.entities
            .iter()
            .filter(|entity| entity.matches(Field::Exchange, exchange))
            .filter(|entity| entity.matches(Field::Queue, queue))
            .find(|entity| entity.matches(Field::Route, routing_key))
    }

    /// Resolves a signature to the best matching entity.
    pub fn resolve_signature(&self, signature: &Signature) -> Option<&RouteEntity<H>> {
        self.resolve(
            &signature.exchange,
            &signature.queue,
            &signature.routing_key,
        )
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entity is registered.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates entities in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntity<H>> {
        self.entities.iter()
    }
}

impl<H> std::fmt::Debug for RouteCollection<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entities.iter()).finish()
    }
}
