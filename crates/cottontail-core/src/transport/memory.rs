//! In-process broker implementing the transport boundary.
//!
//! [`MemoryBroker`] stands in for a real broker in tests, demos and local
//! development:
//!
//! - queues are created when first declared on a channel,
//! - [`publish`](MemoryBroker::publish) hands a message to one subscriber
//!   of the target queue (round-robin) and awaits the consumer's verdict,
//! - deliveries to one subscription run one at a time, in publish order,
//! - closing a connection drops every subscription made through it,
//! - the broker can be marked unavailable to exercise connection errors.
//!
//! ```rust,ignore
//! let broker = MemoryBroker::new();
//! let connector = broker.connector();
//!
//! // ... start a consumer with `connector` ...
//!
//! broker
//!     .publish(MemoryMessage::new("billing").routing_key("orders.created"))
//!     .await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, trace};

use super::{
    BoxedChannel, BoxedConnection, BoxedQueue, Channel, Connection, ConnectionOptions, Connector,
    DeliverFn, Queue, SubscribeOptions,
};
use crate::delivery::{DeliveryInfo, Properties};
use crate::error::{ConsumeResult, TransportError, TransportResult};

#[derive(Clone)]
struct Subscriber {
    connection_id: String,
    consumer_tag: String,
    deliver: DeliverFn,
    serial: Arc<AsyncMutex<()>>,
}

#[derive(Default)]
struct QueueState {
    subscribers: Vec<Subscriber>,
    cursor: usize,
    delivery_tag: u64,
}

struct BrokerState {
    available: AtomicBool,
    next_connection: AtomicU64,
    next_tag: AtomicU64,
    queues: Mutex<HashMap<String, QueueState>>,
    open_connections: Mutex<HashSet<String>>,
    endpoints: Mutex<Vec<String>>,
}

impl BrokerState {
    fn drop_connection(&self, connection_id: &str) {
        self.open_connections.lock().remove(connection_id);

        let mut queues = self.queues.lock();
        for queue in queues.values_mut() {
            queue
                .subscribers
                .retain(|subscriber| subscriber.connection_id != connection_id);
        }
    }
}

/// A message to publish on a [`MemoryBroker`].
#[derive(Debug, Clone, Default)]
pub struct MemoryMessage {
    queue: String,
    exchange: String,
    routing_key: String,
    properties: Properties,
    payload: Vec<u8>,
}

impl MemoryMessage {
    /// Creates a message addressed to `queue`.
    ///
    /// The exchange defaults to the empty (default) exchange and the
    /// routing key to the queue name.
    pub fn new(queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            routing_key: queue.clone(),
            queue,
            ..Default::default()
        }
    }

    /// Sets the exchange the message claims to come from.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Sets the routing key.
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    /// Sets the message properties.
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Sets the payload.
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// An in-process broker.
///
/// Cloning is cheap; clones share the same queues and connections.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates an empty, available broker.
    pub fn new() -> Self {
        Self {
            state: Arc::new(BrokerState {
                available: AtomicBool::new(true),
                next_connection: AtomicU64::new(1),
                next_tag: AtomicU64::new(1),
                queues: Mutex::new(HashMap::new()),
                open_connections: Mutex::new(HashSet::new()),
                endpoints: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns a connector dialling this broker.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Marks the broker reachable or unreachable for new connections.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Declares a queue without subscribing to it.
    pub fn declare(&self, queue: impl Into<String>) {
        self.state.queues.lock().entry(queue.into()).or_default();
    }

    /// Delivers a message to one subscriber of its queue.
    ///
    /// Returns the consumer's verdict for the message. Fails when the queue
    /// was never declared or has no subscriber.
    ///
    /// Deliveries to the same subscription are serialized: a concurrent
    /// publish waits for the in-flight delivery to finish. A handler must not
    /// publish back to a queue it is the only subscriber of.
    pub async fn publish(&self, message: MemoryMessage) -> TransportResult<ConsumeResult<()>> {
        let (subscriber, delivery_tag) = {
            let mut queues = self.state.queues.lock();
            let queue = queues
                .get_mut(&message.queue)
                .ok_or_else(|| TransportError::QueueNotFound {
                    queue: message.queue.clone(),
                })?;

            if queue.subscribers.is_empty() {
                return Err(TransportError::NoConsumers {
                    queue: message.queue.clone(),
                });
            }

            let index = queue.cursor % queue.subscribers.len();
            queue.cursor = queue.cursor.wrapping_add(1);
            queue.delivery_tag += 1;
            (queue.subscribers[index].clone(), queue.delivery_tag)
        };

        trace!(
            queue = %message.queue,
            routing_key = %message.routing_key,
            consumer_tag = %subscriber.consumer_tag,
            delivery_tag,
            "Delivering message"
        );

        let info = DeliveryInfo::new(message.exchange, message.queue, message.routing_key)
            .with_consumer_tag(subscriber.consumer_tag)
            .with_delivery_tag(delivery_tag);

        let _serial = subscriber.serial.lock().await;
        Ok((subscriber.deliver)(info, message.properties, message.payload).await)
    }

    /// Returns the number of subscriptions on `queue`.
    pub fn subscriber_count(&self, queue: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(queue)
            .map_or(0, |queue| queue.subscribers.len())
    }

    /// Returns the number of connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.state.open_connections.lock().len()
    }

    /// Returns every endpoint a connection was opened to, in order.
    pub fn connected_endpoints(&self) -> Vec<String> {
        self.state.endpoints.lock().clone()
    }
}

/// Connector for a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, options: &ConnectionOptions) -> TransportResult<BoxedConnection> {
        let state = &self.broker.state;
        let endpoint = options.endpoint(0).to_string();

        if !state.available.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed {
                endpoint,
                reason: "broker unavailable".to_string(),
            });
        }

        let id = format!(
            "memory-{}",
            state.next_connection.fetch_add(1, Ordering::SeqCst)
        );
        state.open_connections.lock().insert(id.clone());
        state.endpoints.lock().push(endpoint.clone());
        debug!(connection = %id, endpoint = %endpoint, "Opened in-memory connection");

        Ok(Arc::new(MemoryConnection {
            id,
            broker: self.broker.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

/// A connection to a [`MemoryBroker`].
pub struct MemoryConnection {
    id: String,
    broker: MemoryBroker,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> TransportResult<BoxedChannel> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed {
                reason: format!("{} is closed", self.id),
            });
        }

        Ok(Arc::new(MemoryChannel {
            connection_id: self.id.clone(),
            broker: self.broker.clone(),
            open: Arc::clone(&self.open),
        }))
    }

    async fn close(&self) -> TransportResult<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.broker.state.drop_connection(&self.id);
            debug!(connection = %self.id, "Closed in-memory connection");
        }
        Ok(())
    }
}

struct MemoryChannel {
    connection_id: String,
    broker: MemoryBroker,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn queue(&self, name: &str) -> TransportResult<BoxedQueue> {
        self.broker.declare(name);

        Ok(Arc::new(MemoryQueue {
            name: name.to_string(),
            connection_id: self.connection_id.clone(),
            broker: self.broker.clone(),
            open: Arc::clone(&self.open),
        }))
    }
}

struct MemoryQueue {
    name: String,
    connection_id: String,
    broker: MemoryBroker,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, options: SubscribeOptions, deliver: DeliverFn) -> TransportResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed {
                reason: format!("{} is closed", self.connection_id),
            });
        }

        let state = &self.broker.state;
        let mut queues = state.queues.lock();
        let queue = queues.entry(self.name.clone()).or_default();

        if options.exclusive && !queue.subscribers.is_empty() {
            return Err(TransportError::SubscribeFailed {
                queue: self.name.clone(),
                reason: "queue already has a consumer".to_string(),
            });
        }
        let consumer_tag = options.consumer_tag.unwrap_or_else(|| {
            format!("ctag-{}", state.next_tag.fetch_add(1, Ordering::SeqCst))
        });
        debug!(queue = %self.name, consumer_tag = %consumer_tag, "Subscribed to in-memory queue");

        queue.subscribers.push(Subscriber {
            connection_id: self.connection_id.clone(),
            consumer_tag,
            deliver,
            serial: Arc::new(AsyncMutex::new(())),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_deliver(counter: Arc<AtomicUsize>) -> DeliverFn {
        Arc::new(move |_info: DeliveryInfo, _properties: Properties, _payload: Vec<u8>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber_with_metadata() {
        let broker = MemoryBroker::new();
        let connection = broker
            .connector()
            .connect(&ConnectionOptions::default())
            .await
            .unwrap();
        let queue = connection
            .open_channel()
            .await
            .unwrap()
            .queue("billing")
            .await
            .unwrap();

        let seen: Arc<Mutex<Vec<(DeliveryInfo, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let deliver: DeliverFn =
            Arc::new(move |info: DeliveryInfo, _properties: Properties, payload: Vec<u8>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push((info, payload));
                    Ok(())
                }
                .boxed()
            });
        queue
            .subscribe(SubscribeOptions::new().consumer_tag("billing-1"), deliver)
            .await
            .unwrap();

        let verdict = broker
            .publish(
                MemoryMessage::new("billing")
                    .exchange("orders")
                    .routing_key("orders.created")
                    .payload("hello"),
            )
            .await
            .unwrap();
        assert!(verdict.is_ok());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (info, payload) = &seen[0];
        assert_eq!(info.exchange, "orders");
        assert_eq!(info.queue, "billing");
        assert_eq!(info.routing_key, "orders.created");
        assert_eq!(info.consumer_tag.as_deref(), Some("billing-1"));
        assert_eq!(info.delivery_tag, 1);
        assert_eq!(payload.as_slice(), b"hello");
    }

    #[tokio::test]
    async fn test_publish_to_unknown_or_idle_queue_fails() {
        let broker = MemoryBroker::new();
        let err = broker.publish(MemoryMessage::new("nowhere")).await.unwrap_err();
        assert!(matches!(err, TransportError::QueueNotFound { .. }));

        broker.declare("idle");
        let err = broker.publish(MemoryMessage::new("idle")).await.unwrap_err();
        assert!(matches!(err, TransportError::NoConsumers { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_available(false);

        let result = broker
            .connector()
            .connect(&ConnectionOptions::new("amqp://down"))
            .await;
        match result {
            Err(TransportError::ConnectionFailed { endpoint, .. }) => {
                assert_eq!(endpoint, "amqp://down")
            }
            _ => panic!("expected connection failure"),
        }
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_close_drops_subscriptions() {
        let broker = MemoryBroker::new();
        let connection = broker
            .connector()
            .connect(&ConnectionOptions::default())
            .await
            .unwrap();
        let channel = connection.open_channel().await.unwrap();
        let queue = channel.queue("q").await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        queue
            .subscribe(SubscribeOptions::new(), counting_deliver(Arc::clone(&counter)))
            .await
            .unwrap();
        assert_eq!(broker.subscriber_count("q"), 1);
        assert_eq!(broker.open_connections(), 1);

        connection.close().await.unwrap();
        connection.close().await.unwrap();

        assert!(!connection.is_open());
        assert_eq!(broker.subscriber_count("q"), 0);
        assert_eq!(broker.open_connections(), 0);
        assert!(channel.queue("q").await.unwrap().subscribe(
            SubscribeOptions::new(),
            counting_deliver(counter)
        ).await.is_err());
    }

    #[tokio::test]
    async fn test_round_robin_between_subscribers() {
        let broker = MemoryBroker::new();
        let connection = broker
            .connector()
            .connect(&ConnectionOptions::default())
            .await
            .unwrap();
        let queue = connection.open_channel().await.unwrap().queue("q").await.unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        queue
            .subscribe(SubscribeOptions::new(), counting_deliver(Arc::clone(&first)))
            .await
            .unwrap();
        queue
            .subscribe(SubscribeOptions::new(), counting_deliver(Arc::clone(&second)))
            .await
            .unwrap();

        for _ in 0..4 {
            broker.publish(MemoryMessage::new("q")).await.unwrap().unwrap();
        }

        assert_eq!(first.load(Ordering::SeqCst), 2);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_deliver_one_at_a_time() {
        let broker = MemoryBroker::new();
        let connection = broker
            .connector()
            .connect(&ConnectionOptions::default())
            .await
            .unwrap();
        let queue = connection.open_channel().await.unwrap().queue("q").await.unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let deliver: DeliverFn = {
            let (in_flight, peak, order) = (
                Arc::clone(&in_flight),
                Arc::clone(&peak),
                Arc::clone(&order),
            );
            Arc::new(move |_info: DeliveryInfo, _properties: Properties, payload: Vec<u8>| {
                let (in_flight, peak, order) = (
                    Arc::clone(&in_flight),
                    Arc::clone(&peak),
                    Arc::clone(&order),
                );
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    order.lock().push(payload);
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
        };
        queue.subscribe(SubscribeOptions::new(), deliver).await.unwrap();

        let (first, second) = tokio::join!(
            broker.publish(MemoryMessage::new("q").payload("first")),
            broker.publish(MemoryMessage::new("q").payload("second")),
        );
        first.unwrap().unwrap();
        second.unwrap().unwrap();

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(*order.lock(), vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[tokio::test]
    async fn test_exclusive_subscription_rejects_second_consumer() {
        let broker = MemoryBroker::new();
        let connection = broker
            .connector()
            .connect(&ConnectionOptions::default())
            .await
            .unwrap();
        let queue = connection.open_channel().await.unwrap().queue("q").await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        queue
            .subscribe(SubscribeOptions::new(), counting_deliver(Arc::clone(&counter)))
            .await
            .unwrap();
        let err = queue
            .subscribe(SubscribeOptions::new().exclusive(true), counting_deliver(counter))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::SubscribeFailed { .. }));
    }
}
