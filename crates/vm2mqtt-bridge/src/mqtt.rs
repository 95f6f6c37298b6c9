//! MQTT broker gateway built on `rumqttc`.
//!
//! `rumqttc` splits a connection into an [`AsyncClient`] that queues requests
//! and an [`EventLoop`] that must be polled for anything to happen. The
//! gateway polls the event loop on a background task (the driver), which
//! also forwards incoming publishes to the engine and restores
//! subscriptions after the client reconnects.
//!
//! The request queue only drains while the broker is connected, so every
//! request is bounded by `MqttConfig::request_timeout` and fails with
//! `GatewayError::Timeout` once the queue has stayed full that long.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    QoS,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::gateway::{BrokerGateway, GatewayError, GatewayResult, InboundMessage};

/// Capacity of the client's request queue.
const REQUEST_CAPACITY: usize = 64;

/// Pause between reconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long `disconnect` waits for the driver to flush.
const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

/// Broker gateway over a single MQTT connection.
pub struct MqttGateway {
    client: AsyncClient,
    request_timeout: Duration,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttGateway {
    /// Connect to the broker and start the driver.
    ///
    /// Returns the gateway and the receiver on which every message for a
    /// subscribed topic is delivered.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` if the broker is unreachable or
    /// refuses the connection, and `GatewayError::Timeout` if no CONNACK
    /// arrives within `config.connect_timeout()`.
    pub async fn connect(
        config: &MqttConfig,
    ) -> GatewayResult<(Self, mpsc::UnboundedReceiver<InboundMessage>)> {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Connecting to MQTT broker"
        );

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let timeout = config.connect_timeout();
        tokio::time::timeout(timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| GatewayError::Timeout(timeout))??;

        tracing::info!(host = %config.host, "Connected to MQTT broker");

        // Unbounded: the driver must never wait on the engine, because the
        // engine's own publishes wait on the driver.
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Mutex::new(BTreeSet::new()));
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            Arc::clone(&subscriptions),
            inbound_tx,
        ));

        Ok((
            Self {
                client,
                request_timeout: config.request_timeout(),
                subscriptions,
                driver: Mutex::new(Some(driver)),
            },
            inbound_rx,
        ))
    }

    async fn queue<F>(&self, request: F) -> GatewayResult<Result<(), ClientError>>
    where
        F: Future<Output = Result<(), ClientError>> + Send,
    {
        tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?self.request_timeout, "MQTT request queue stayed full");
                GatewayError::Timeout(self.request_timeout)
            })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> GatewayResult<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(GatewayError::Connection(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => {}
            Err(e) => return Err(GatewayError::Connection(e.to_string())),
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                if inbound.send(message).is_err() {
                    tracing::debug!("Inbound receiver dropped, stopping MQTT driver");
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let topics: Vec<String> = subscriptions.lock().iter().cloned().collect();
                tracing::info!(count = topics.len(), "Reconnected to MQTT broker, restoring subscriptions");
                for topic in topics {
                    // try_subscribe: the request queue is drained by this very task.
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        tracing::warn!(topic = %topic, error = %e, "Failed to restore subscription");
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("DISCONNECT sent, stopping MQTT driver");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT connection error, retrying in {RECONNECT_DELAY:?}");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl BrokerGateway for MqttGateway {
    async fn publish(&self, topic: &str, payload: &[u8], retained: bool) -> GatewayResult<()> {
        self.queue(
            self.client
                .publish(topic, QoS::AtLeastOnce, retained, payload.to_vec()),
        )
        .await?
        .map_err(|e| GatewayError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        tracing::trace!(topic, retained, bytes = payload.len(), "Published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> GatewayResult<()> {
        self.queue(self.client.subscribe(topic, QoS::AtMostOnce))
            .await?
            .map_err(|e| GatewayError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        self.subscriptions.lock().insert(topic.to_string());
        tracing::debug!(topic, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> GatewayResult<()> {
        self.subscriptions.lock().remove(topic);
        self.queue(self.client.unsubscribe(topic))
            .await?
            .map_err(|e| GatewayError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(topic, "Unsubscribed");
        Ok(())
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        let Some(mut driver) = self.driver.lock().take() else {
            return Err(GatewayError::Closed);
        };

        match self.queue(self.client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to queue DISCONNECT");
                driver.abort();
                return Err(GatewayError::Closed);
            }
            Err(e) => {
                driver.abort();
                return Err(e);
            }
        }

        if tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await.is_err() {
            tracing::warn!("MQTT driver did not stop in time, aborting it");
            driver.abort();
        }
        tracing::info!("Disconnected from MQTT broker");
        Ok(())
    }
}
