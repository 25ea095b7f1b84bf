//! Hierarchical key/value configuration store.
//!
//! A [`Configuration`] maps setting keys to either a concrete value or a
//! producer. The first read of a producer-backed key evaluates the producer
//! and replaces it with its result, so later reads return the cached value.
//!
//! [`derive`](Configuration::derive) creates an independent child store
//! seeded with a snapshot of the parent's entries. Resolved values are
//! copied as values; pending producers are copied as producers and resolve
//! independently in each store.
//!
//! ```rust,ignore
//! use cottontail_core::Configuration;
//!
//! let config = Configuration::new();
//! config.set("prefetch", 16u16);
//! config.set_with("greeting", || String::from("hello"));
//!
//! assert_eq!(config.get::<u16>("prefetch").as_deref(), Some(&16));
//!
//! let child = config.derive();
//! child.set("prefetch", 1u16);
//! assert_eq!(config.get::<u16>("prefetch").as_deref(), Some(&16));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

/// A type-erased, shareable setting value.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

/// A zero-argument producer for a lazily evaluated setting.
pub type Producer = Arc<dyn Fn() -> SharedValue + Send + Sync>;

#[derive(Clone)]
enum Setting {
    Value(SharedValue),
    Pending(Producer),
}

/// A key/value store with memoized producers and copy-on-derive semantics.
///
/// Reads and writes go through an internal `RwLock`, so a store can be
/// shared between the consumer and its handlers. Producers run while the
/// write lock is held and must not read the same store.
#[derive(Default)]
pub struct Configuration {
    settings: RwLock<HashMap<String, Setting>>,
}

impl Configuration {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a concrete value, replacing any previous value or producer.
    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.settings
            .write()
            .insert(key.into(), Setting::Value(Arc::new(value)));
    }

    /// Stores a producer, evaluated on the first read of `key`.
    pub fn set_with<T, F>(&self, key: impl Into<String>, producer: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let producer: Producer = Arc::new(move || Arc::new(producer()) as SharedValue);
        self.settings
            .write()
            .insert(key.into(), Setting::Pending(producer));
    }

    /// Returns the value of `key`, resolving a producer on first access.
    ///
    /// Returns `None` when the key is unset.
    pub fn get_shared(&self, key: &str) -> Option<SharedValue> {
        if let Some(Setting::Value(value)) = self.settings.read().get(key) {
            return Some(Arc::clone(value));
        }

        let mut settings = self.settings.write();
        let setting = settings.get_mut(key)?;
        if let Setting::Pending(producer) = &*setting {
            trace!(key, "Evaluating configuration producer");
            let value = producer();
            *setting = Setting::Value(value);
        }

        match &*setting {
            Setting::Value(value) => Some(Arc::clone(value)),
            Setting::Pending(_) => None,
        }
    }

    /// Returns the value of `key` as a `T`.
    ///
    /// Returns `None` when the key is unset or holds a value of another type.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_shared(key)
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns `true` if `key` holds a value or producer.
    pub fn contains(&self, key: &str) -> bool {
        self.settings.read().contains_key(key)
    }

    /// Returns `true` if `key` holds an already resolved value.
    pub fn is_resolved(&self, key: &str) -> bool {
        matches!(self.settings.read().get(key), Some(Setting::Value(_)))
    }

    /// Removes `key`, returning whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.settings.write().remove(key).is_some()
    }

    /// Returns all keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.settings.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Creates an independent child store from a snapshot of this one.
    pub fn derive(&self) -> Self {
        Self {
            settings: RwLock::new(self.settings.read().clone()),
        }
    }
}

impl Clone for Configuration {
    fn clone(&self) -> Self {
        self.derive()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_set_and_get_value() {
        let config = Configuration::new();
        config.set("key", String::from("value"));

        assert_eq!(config.get::<String>("key").as_deref(), Some(&"value".to_string()));
    }

    #[test]
    fn test_unset_key_is_absent() {
        let config = Configuration::new();

        assert!(config.get::<String>("missing").is_none());
        assert!(config.get_shared("missing").is_none());
        assert!(!config.contains("missing"));
    }

    #[test]
    fn test_type_mismatch_is_absent() {
        let config = Configuration::new();
        config.set("port", 5672u16);

        assert!(config.get::<u32>("port").is_none());
        assert_eq!(config.get::<u16>("port").as_deref(), Some(&5672));
    }

    #[test]
    fn test_producer_evaluated_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let config = Configuration::new();
        config.set_with("key", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            String::from("value")
        });
        assert!(!config.is_resolved("key"));

        let first = config.get::<String>("key").unwrap();
        let second = config.get::<String>("key").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(config.is_resolved("key"));
    }

    #[test]
    fn test_derived_write_does_not_affect_parent() {
        let parent = Configuration::new();
        parent.set("foo", 123i32);

        let child = parent.derive();
        assert_eq!(child.get::<i32>("foo").as_deref(), Some(&123));

        child.set("foo", 456i32);
        assert_eq!(child.get::<i32>("foo").as_deref(), Some(&456));
        assert_eq!(parent.get::<i32>("foo").as_deref(), Some(&123));
    }

    #[test]
    fn test_parent_write_after_derive_does_not_affect_child() {
        let parent = Configuration::new();
        parent.set("foo", 123i32);
        let child = parent.derive();

        parent.set("foo", 789i32);
        parent.set("bar", true);

        assert_eq!(child.get::<i32>("foo").as_deref(), Some(&123));
        assert!(!child.contains("bar"));
    }

    #[test]
    fn test_pending_producer_resolves_independently_after_derive() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let parent = Configuration::new();
        parent.set_with("key", move || counter.fetch_add(1, Ordering::SeqCst));
        let child = parent.derive();

        assert_eq!(child.get::<usize>("key").as_deref(), Some(&0));
        assert_eq!(parent.get::<usize>("key").as_deref(), Some(&1));
        assert_eq!(child.get::<usize>("key").as_deref(), Some(&0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resolved_value_is_copied_as_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let parent = Configuration::new();
        parent.set_with("key", move || counter.fetch_add(1, Ordering::SeqCst));
        parent.get::<usize>("key");

        let child = parent.derive();
        assert!(child.is_resolved("key"));
        child.get::<usize>("key");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keys_sorted() {
        let config = Configuration::new();
        config.set("b", 1u8);
        config.set_with("a", || 2u8);

        assert_eq!(config.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(config.remove("a"));
        assert!(!config.remove("a"));
    }
}
