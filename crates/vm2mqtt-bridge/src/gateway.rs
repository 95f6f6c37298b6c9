//! Broker gateway contract.
//!
//! The engine only needs to publish, subscribe and disconnect. Inbound
//! messages travel the other way on a channel handed out when the gateway
//! connects, see [`MqttGateway::connect`](crate::mqtt::MqttGateway::connect).

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// A result type using `GatewayError`.
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Errors raised by a broker gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The broker could not be reached or refused the connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The broker did not acknowledge the connection in time.
    #[error("timed out after {0:?} waiting for the broker")]
    Timeout(Duration),

    /// A publish request could not be queued.
    #[error("failed to publish to {topic}: {reason}")]
    Publish {
        /// Target topic.
        topic: String,
        /// Underlying client error.
        reason: String,
    },

    /// A subscribe or unsubscribe request could not be queued.
    #[error("failed to (un)subscribe {topic}: {reason}")]
    Subscribe {
        /// Target topic.
        topic: String,
        /// Underlying client error.
        reason: String,
    },

    /// The connection has already been shut down.
    #[error("gateway is closed")]
    Closed,
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create an inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound side of a broker connection.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Publish a payload.
    async fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> GatewayResult<()>;

    /// Subscribe to a topic.
    async fn subscribe(&self, topic: &str) -> GatewayResult<()>;

    /// Drop a subscription.
    async fn unsubscribe(&self, topic: &str) -> GatewayResult<()>;

    /// Close the connection. Later calls fail with `GatewayError::Closed`.
    async fn disconnect(&self) -> GatewayResult<()>;
}

/// A gateway that records every call, for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// One recorded gateway call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum GatewayCall {
        /// `publish(topic, payload, retained)`
        Publish {
            /// Topic.
            topic: String,
            /// Payload as UTF-8 (lossy).
            payload: String,
            /// Retain flag.
            retained: bool,
        },
        /// `subscribe(topic)`
        Subscribe(String),
        /// `unsubscribe(topic)`
        Unsubscribe(String),
        /// `disconnect()`
        Disconnect,
    }

    /// In-memory gateway that records calls in order.
    #[derive(Debug, Default)]
    pub struct RecordingGateway {
        calls: Mutex<Vec<GatewayCall>>,
        fail_publish: AtomicBool,
        failing_topics: Mutex<HashSet<String>>,
        closed: AtomicBool,
    }

    impl RecordingGateway {
        /// Create an empty recording gateway.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every subsequent publish fail.
        pub fn fail_publish(&self, fail: bool) {
            self.fail_publish.store(fail, Ordering::SeqCst);
        }

        /// Make every subsequent publish to `topic` fail.
        pub fn fail_publish_to(&self, topic: impl Into<String>) {
            self.failing_topics.lock().insert(topic.into());
        }

        /// All recorded calls, oldest first.
        #[must_use]
        pub fn calls(&self) -> Vec<GatewayCall> {
            self.calls.lock().clone()
        }

        /// Forget every recorded call.
        pub fn clear(&self) {
            self.calls.lock().clear();
        }

        /// Recorded publishes as `(topic, payload, retained)`.
        #[must_use]
        pub fn publishes(&self) -> Vec<(String, String, bool)> {
            self.calls
                .lock()
                .iter()
                .filter_map(|call| match call {
                    GatewayCall::Publish {
                        topic,
                        payload,
                        retained,
                    } => Some((topic.clone(), payload.clone(), *retained)),
                    _ => None,
                })
                .collect()
        }

        /// Payloads published to one topic, oldest first.
        #[must_use]
        pub fn payloads_for(&self, topic: &str) -> Vec<String> {
            self.publishes()
                .into_iter()
                .filter(|(t, _, _)| t == topic)
                .map(|(_, payload, _)| payload)
                .collect()
        }

        /// Recorded subscriptions, oldest first.
        #[must_use]
        pub fn subscriptions(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .filter_map(|call| match call {
                    GatewayCall::Subscribe(topic) => Some(topic.clone()),
                    _ => None,
                })
                .collect()
        }

        /// Whether `disconnect` was called.
        #[must_use]
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn check_open(&self) -> GatewayResult<()> {
            if self.is_closed() {
                Err(GatewayError::Closed)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl BrokerGateway for RecordingGateway {
        async fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> GatewayResult<()> {
            self.check_open()?;
            if self.fail_publish.load(Ordering::SeqCst)
                || self.failing_topics.lock().contains(topic)
            {
                return Err(GatewayError::Publish {
                    topic: topic.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            self.calls.lock().push(GatewayCall::Publish {
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(payload).into_owned(),
                retained,
            });
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> GatewayResult<()> {
            self.check_open()?;
            self.calls
                .lock()
                .push(GatewayCall::Subscribe(topic.to_string()));
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> GatewayResult<()> {
            self.check_open()?;
            self.calls
                .lock()
                .push(GatewayCall::Unsubscribe(topic.to_string()));
            Ok(())
        }

        async fn disconnect(&self) -> GatewayResult<()> {
            self.check_open()?;
            self.closed.store(true, Ordering::SeqCst);
            self.calls.lock().push(GatewayCall::Disconnect);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{GatewayCall, RecordingGateway};
    use super::*;

    #[tokio::test]
    async fn recording_gateway_keeps_order() {
        let gateway = RecordingGateway::new();
        gateway.subscribe("a/set").await.unwrap();
        gateway.publish("a/state", b"ON", true).await.unwrap();
        gateway.unsubscribe("a/set").await.unwrap();

        assert_eq!(
            gateway.calls(),
            vec![
                GatewayCall::Subscribe("a/set".into()),
                GatewayCall::Publish {
                    topic: "a/state".into(),
                    payload: "ON".into(),
                    retained: true
                },
                GatewayCall::Unsubscribe("a/set".into()),
            ]
        );
        assert_eq!(gateway.payloads_for("a/state"), vec!["ON".to_string()]);
    }

    #[tokio::test]
    async fn closed_gateway_rejects_calls() {
        let gateway = RecordingGateway::new();
        gateway.disconnect().await.unwrap();
        assert!(gateway.is_closed());
        assert!(matches!(
            gateway.publish("t", b"x", false).await,
            Err(GatewayError::Closed)
        ));
    }

    #[tokio::test]
    async fn injected_publish_failure() {
        let gateway = RecordingGateway::new();
        gateway.fail_publish(true);
        assert!(matches!(
            gateway.publish("t", b"x", false).await,
            Err(GatewayError::Publish { .. })
        ));
        assert!(gateway.publishes().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_for_one_topic() {
        let gateway = RecordingGateway::new();
        gateway.fail_publish_to("a/config");
        assert!(gateway.publish("a/config", b"{}", false).await.is_err());
        gateway.publish("b/config", b"{}", false).await.unwrap();
        assert_eq!(gateway.publishes().len(), 1);
    }
}
