//! Route entities: match predicates over `(exchange, queue, route)`.
//!
//! Each of the three fields of a [`Route`] is a [`MatchField`]: a concrete
//! value, a list of concrete values, or an open marker (`Wildcard`/`Any`)
//! accepting every candidate.
//!
//! # Specificity
//!
//! Entities are ranked field by field in the fixed order exchange, queue,
//! route. A concrete, non-empty field ranks before an open one; distinct
//! concrete values are never ordered against each other.
//!
//! ```text
//! (a, b, c) < (a, b, *) < (a, *, c) < (a, *, *) < (*, b, *) < (*, *, *)
//! ```

use std::cmp::Ordering;
use std::fmt;

use crate::delivery::Signature;

/// One of the three routed fields of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// The origin exchange.
    Exchange,
    /// The consuming queue.
    Queue,
    /// The routing key.
    Route,
}

impl Field {
    /// All fields, most significant first.
    pub const ALL: [Field; 3] = [Field::Exchange, Field::Queue, Field::Route];

    /// Returns the field's name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exchange => "exchange",
            Self::Queue => "queue",
            Self::Route => "route",
        }
    }
}

/// The match value of a single route field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum MatchField {
    /// Matches exactly this value. An empty value matches nothing.
    Exact(String),
    /// Matches any of the listed values.
    OneOf(Vec<String>),
    /// Field left unset; matches every candidate.
    #[default]
    Wildcard,
    /// Explicit "match anything"; behaves like [`MatchField::Wildcard`].
    Any,
}

impl MatchField {
    /// Tests a candidate value against this field.
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(value) => !value.is_empty() && value == candidate,
            Self::OneOf(values) => values
                .iter()
                .any(|value| !value.is_empty() && value == candidate),
            Self::Wildcard | Self::Any => true,
        }
    }

    /// Returns `true` if the field constrains candidates to concrete values.
    pub fn is_concrete(&self) -> bool {
        match self {
            Self::Exact(value) => !value.is_empty(),
            Self::OneOf(values) => values.iter().any(|value| !value.is_empty()),
            Self::Wildcard | Self::Any => false,
        }
    }

    /// Returns the specificity rank of this field.
    pub fn rank(&self) -> Rank {
        if self.is_concrete() {
            Rank::Concrete
        } else {
            Rank::Open
        }
    }
}

impl From<&str> for MatchField {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_string())
    }
}

impl From<String> for MatchField {
    fn from(value: String) -> Self {
        Self::Exact(value)
    }
}

impl From<Option<&str>> for MatchField {
    fn from(value: Option<&str>) -> Self {
        value.map_or(Self::Wildcard, Self::from)
    }
}

impl From<Vec<String>> for MatchField {
    fn from(values: Vec<String>) -> Self {
        Self::OneOf(values)
    }
}

impl<const N: usize> From<[&str; N]> for MatchField {
    fn from(values: [&str; N]) -> Self {
        Self::OneOf(values.iter().map(|value| value.to_string()).collect())
    }
}

impl fmt::Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{value:?}"),
            Self::OneOf(values) => write!(f, "{values:?}"),
            Self::Wildcard => f.write_str("*"),
            Self::Any => f.write_str("any"),
        }
    }
}

/// How narrowly a single field constrains candidates.
///
/// `Concrete` orders before `Open`, so an ascending sort puts the most
/// specific entries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    /// A concrete, non-empty value.
    Concrete,
    /// A wildcard, any-marker or empty value.
    Open,
}

/// The specificity of a route, compared field by field
/// (exchange, queue, route).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Specificity([Rank; 3]);

impl Specificity {
    /// Returns the rank of one field.
    pub fn rank(&self, field: Field) -> Rank {
        match field {
            Field::Exchange => self.0[0],
            Field::Queue => self.0[1],
            Field::Route => self.0[2],
        }
    }
}

/// A match specification over `(exchange, queue, route)`.
///
/// Unset fields are wildcards. A bare string converts into a route matching
/// that routing key only.
///
/// ```rust,ignore
/// let route = Route::new().exchange("orders").route("orders.created");
/// let by_key: Route = "orders.created".into();
/// let catch_all = Route::any();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Route {
    exchange: MatchField,
    queue: MatchField,
    route: MatchField,
}

impl Route {
    /// Creates a route with all fields unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a route that explicitly accepts every delivery.
    pub fn any() -> Self {
        Self {
            exchange: MatchField::Any,
            queue: MatchField::Any,
            route: MatchField::Any,
        }
    }

    /// Sets the exchange match.
    pub fn exchange(mut self, exchange: impl Into<MatchField>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Sets the queue match.
    pub fn queue(mut self, queue: impl Into<MatchField>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Sets the routing key match.
    pub fn route(mut self, route: impl Into<MatchField>) -> Self {
        self.route = route.into();
        self
    }

    /// Returns the match value of one field.
    pub fn field(&self, field: Field) -> &MatchField {
        match field {
            Field::Exchange => &self.exchange,
            Field::Queue => &self.queue,
            Field::Route => &self.route,
        }
    }

    /// Tests a candidate value for one field.
    pub fn matches_field(&self, field: Field, candidate: &str) -> bool {
        self.field(field).matches(candidate)
    }

    /// Tests all three fields of a signature.
    pub fn matches(&self, signature: &Signature) -> bool {
        self.exchange.matches(&signature.exchange)
            && self.queue.matches(&signature.queue)
            && self.route.matches(&signature.routing_key)
    }

    /// Returns this route's specificity.
    pub fn specificity(&self) -> Specificity {
        Specificity([self.exchange.rank(), self.queue.rank(), self.route.rank()])
    }
}

impl From<&str> for Route {
    fn from(routing_key: &str) -> Self {
        Self::new().route(routing_key)
    }
}

impl From<String> for Route {
    fn from(routing_key: String) -> Self {
        Self::new().route(routing_key)
    }
}

impl<const N: usize> From<[&str; N]> for Route {
    fn from(routing_keys: [&str; N]) -> Self {
        Self::new().route(routing_keys)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exchange={} queue={} route={}",
            self.exchange, self.queue, self.route
        )
    }
}

/// A registered route paired with its handler.
///
/// The match fields are immutable once the entity is built. The insertion
/// sequence is stamped by [`RouteCollection`](crate::RouteCollection).
#[derive(Clone)]
pub struct RouteEntity<H> {
    route: Route,
    handler: H,
    sequence: u64,
}

impl<H> RouteEntity<H> {
    /// Creates an entity from a route and its handler.
    pub fn new(route: impl Into<Route>, handler: H) -> Self {
        Self {
            route: route.into(),
            handler,
            sequence: 0,
        }
    }

    /// Returns the match specification.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Returns the attached handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Returns the insertion sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn stamp(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Tests a candidate value for one field.
    pub fn matches(&self, field: Field, candidate: &str) -> bool {
        self.route.matches_field(field, candidate)
    }

    /// Returns this entity's specificity.
    pub fn specificity(&self) -> Specificity {
        self.route.specificity()
    }

    /// Compares specificity only; `Less` means `self` is more specific.
    pub fn cmp_specificity(&self, other: &Self) -> Ordering {
        self.specificity().cmp(&other.specificity())
    }

    /// Compares resolution priority: specificity first, then the most
    /// recently inserted entity first.
    pub fn cmp_priority(&self, other: &Self) -> Ordering {
        self.cmp_specificity(other)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<H> fmt::Debug for RouteEntity<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntity")
            .field("route", &self.route)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(route: Route) -> RouteEntity<()> {
        RouteEntity::new(route, ())
    }

    #[test]
    fn test_identical_fields_compare_equal() {
        let a = entity(Route::new());
        let b = entity(Route::new());
        assert_eq!(a.cmp_specificity(&b), Ordering::Equal);

        let a = entity(Route::new().exchange("a").queue("a").route("a"));
        let b = entity(Route::new().exchange("b").queue("b").route("b"));
        assert_eq!(a.cmp_specificity(&b), Ordering::Equal);
    }

    #[test]
    fn test_any_concrete_field_sorts_before_catch_all() {
        let catch_all = entity(Route::new());

        for route in [
            Route::new().exchange("exchange"),
            Route::new().queue("queue"),
            Route::new().route("route"),
        ] {
            let specific = entity(route);
            assert_eq!(specific.cmp_specificity(&catch_all), Ordering::Less);
            assert_eq!(catch_all.cmp_specificity(&specific), Ordering::Greater);
        }
    }

    #[test]
    fn test_fields_compared_most_significant_first() {
        let by_exchange = entity(Route::new().exchange("a"));
        let by_queue_and_route = entity(Route::new().queue("a").route("a"));
        assert_eq!(
            by_exchange.cmp_specificity(&by_queue_and_route),
            Ordering::Less
        );

        let exchange_queue = entity(Route::new().exchange("a").queue("b"));
        let exchange_route = entity(Route::new().exchange("a").route("c"));
        assert_eq!(
            exchange_queue.cmp_specificity(&exchange_route),
            Ordering::Less
        );
    }

    #[test]
    fn test_wildcard_and_any_rank_equal() {
        let wildcard = entity(Route::new());
        let any = entity(Route::any());
        assert_eq!(wildcard.cmp_specificity(&any), Ordering::Equal);
    }

    #[test]
    fn test_concrete_matches_identical_value_only() {
        let field = MatchField::from("a");
        assert!(field.matches("a"));
        assert!(!field.matches("x"));
        assert!(!field.matches(""));
        assert!(!field.matches("*"));
    }

    #[test]
    fn test_open_fields_match_everything() {
        for field in [MatchField::Wildcard, MatchField::Any, MatchField::from(None)] {
            assert!(field.matches("a"));
            assert!(field.matches(""));
            assert!(field.matches("*"));
        }
    }

    #[test]
    fn test_empty_exact_matches_nothing() {
        let field = MatchField::from("");
        assert!(!field.matches(""));
        assert!(!field.matches("a"));
        assert_eq!(field.rank(), Rank::Open);
    }

    #[test]
    fn test_one_of_matches_listed_values() {
        let field = MatchField::from(["orders.created", "orders.updated"]);
        assert!(field.matches("orders.created"));
        assert!(field.matches("orders.updated"));
        assert!(!field.matches("orders.deleted"));
        assert_eq!(field.rank(), Rank::Concrete);
        assert!(!MatchField::OneOf(Vec::new()).matches(""));
    }

    #[test]
    fn test_route_matches_all_three_fields() {
        let route = Route::new().exchange("a").queue("b");
        assert!(route.matches(&Signature::new("a", "b", "anything")));
        assert!(!route.matches(&Signature::new("a", "x", "anything")));
        assert!(!route.matches(&Signature::new("x", "b", "anything")));
    }

    #[test]
    fn test_string_converts_to_routing_key() {
        let route: Route = "orders.created".into();
        assert_eq!(route.field(Field::Route), &MatchField::from("orders.created"));
        assert_eq!(route.field(Field::Exchange), &MatchField::Wildcard);
        assert_eq!(route.specificity().rank(Field::Route), Rank::Concrete);
    }

    #[test]
    fn test_priority_prefers_newer_entity_on_tie() {
        let mut older = entity(Route::new().exchange("a"));
        let mut newer = entity(Route::new().exchange("a"));
        older.stamp(1);
        newer.stamp(2);

        assert_eq!(newer.cmp_priority(&older), Ordering::Less);
        assert_eq!(older.cmp_priority(&newer), Ordering::Greater);
    }
}
