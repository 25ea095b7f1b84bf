//! The read-only view of one inbound message.
//!
//! A [`Delivery`] is built once per message by the dispatcher from the
//! metadata, properties and payload handed over by the transport, and is
//! dropped once the handler (or error handler) returns.

use std::fmt;
use std::str::Utf8Error;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The `(exchange, queue, routing key)` triple a delivery is routed on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Name of the exchange the message was published to.
    pub exchange: String,
    /// Name of the queue the message was consumed from.
    pub queue: String,
    /// The message's routing key.
    pub routing_key: String,
}

impl Signature {
    /// Creates a new signature.
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exchange={:?} queue={:?} routing_key={:?}",
            self.exchange, self.queue, self.routing_key
        )
    }
}

/// Delivery metadata supplied by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInfo {
    /// Name of the exchange the message was published to (empty for the
    /// default exchange).
    pub exchange: String,
    /// Name of the consuming queue.
    pub queue: String,
    /// The message's routing key.
    pub routing_key: String,
    /// Tag of the subscription that received the message.
    pub consumer_tag: Option<String>,
    /// Broker-assigned, per-queue delivery counter.
    pub delivery_tag: u64,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
}

impl DeliveryInfo {
    /// Creates delivery metadata for the given signature.
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
            ..Default::default()
        }
    }

    /// Sets the consumer tag.
    pub fn with_consumer_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    /// Sets the delivery tag.
    pub fn with_delivery_tag(mut self, tag: u64) -> Self {
        self.delivery_tag = tag;
        self
    }
}

/// Message properties, carried opaquely from publisher to handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    /// MIME content type of the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Application-level message identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Correlation identifier for request/reply flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Application message type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Arbitrary headers.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,
}

impl Properties {
    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Sets the message identifier.
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Looks up a header.
    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }
}

/// One inbound message as seen by hooks and handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    info: DeliveryInfo,
    properties: Properties,
    payload: Vec<u8>,
}

impl Delivery {
    /// Creates a delivery from the transport's metadata, properties and payload.
    pub fn new(info: DeliveryInfo, properties: Properties, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            info,
            properties,
            payload: payload.into(),
        }
    }

    /// Returns the full delivery metadata.
    pub fn info(&self) -> &DeliveryInfo {
        &self.info
    }

    /// Returns the origin exchange name.
    pub fn exchange(&self) -> &str {
        &self.info.exchange
    }

    /// Returns the consuming queue name.
    pub fn queue(&self) -> &str {
        &self.info.queue
    }

    /// Returns the routing key.
    pub fn routing_key(&self) -> &str {
        &self.info.routing_key
    }

    /// Returns the triple this delivery is routed on.
    pub fn signature(&self) -> Signature {
        Signature::new(
            self.info.exchange.as_str(),
            self.info.queue.as_str(),
            self.info.routing_key.as_str(),
        )
    }

    /// Returns the message properties.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Returns the raw payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the payload as UTF-8 text.
    pub fn payload_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    /// Deserializes the payload as JSON.
    pub fn payload_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct OrderCreated {
        id: u64,
        total: f64,
    }

    #[test]
    fn test_delivery_accessors() {
        let delivery = Delivery::new(
            DeliveryInfo::new("orders", "billing", "orders.created").with_delivery_tag(7),
            Properties::default().with_header("tenant", "acme"),
            br#"{"id": 42, "total": 9.5}"#.to_vec(),
        );

        assert_eq!(delivery.exchange(), "orders");
        assert_eq!(delivery.queue(), "billing");
        assert_eq!(delivery.routing_key(), "orders.created");
        assert_eq!(delivery.info().delivery_tag, 7);
        assert_eq!(
            delivery.properties().header("tenant"),
            Some(&Value::from("acme"))
        );
        assert_eq!(
            delivery.payload_json::<OrderCreated>().unwrap(),
            OrderCreated { id: 42, total: 9.5 }
        );
    }

    #[test]
    fn test_payload_str_rejects_invalid_utf8() {
        let delivery = Delivery::new(DeliveryInfo::default(), Properties::default(), vec![0xff]);
        assert!(delivery.payload_str().is_err());
    }

    #[test]
    fn test_signature_display() {
        let signature = Signature::new("", "q", "a.b");
        assert_eq!(
            signature.to_string(),
            r#"exchange="" queue="q" routing_key="a.b""#
        );
    }
}
