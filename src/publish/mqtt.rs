//! MQTT transport over rumqttc.
//!
//! The event loop runs on the server's task tracker and keeps the
//! `connected` flag in sync with `ConnAck`/`Disconnect` packets and
//! connection errors. rumqttc reconnects on the next poll after an error;
//! the loop waits a short backoff first so a dead broker is not hammered.
//! On shutdown a live session is closed with a `DISCONNECT` packet.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{PublishTransport, TransportError};

/// Delay before polling again after a connection error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound on flushing `DISCONNECT` at shutdown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 64;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

/// Publish transport backed by an MQTT broker.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Create the client and spawn its event loop on `tracker`.
    ///
    /// The event loop stops when `shutdown` is cancelled.
    pub fn connect(
        settings: &MqttSettings,
        tracker: &TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive);
        if let Some(username) = &settings.username {
            options.set_credentials(username, settings.password.as_deref().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));

        tracing::info!(host = %settings.host, port = settings.port, client_id = %settings.client_id, "Connecting to MQTT broker");
        tracker.spawn(drive_event_loop(
            event_loop,
            client.clone(),
            connected.clone(),
            shutdown,
        ));

        Self { client, connected }
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if !connected.swap(true, Ordering::SeqCst) {
                    tracing::info!("MQTT connected");
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                tracing::warn!("MQTT broker sent disconnect");
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    tracing::warn!(error = %e, "MQTT connection lost");
                } else {
                    tracing::debug!(error = %e, "MQTT connection attempt failed");
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }

    if connected.swap(false, Ordering::SeqCst) {
        disconnect(&client, &mut event_loop).await;
    }
    tracing::info!("MQTT event loop stopped");
}

/// Queue `DISCONNECT` and poll until it has been written.
async fn disconnect(client: &AsyncClient, event_loop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        tracing::debug!(error = %e, "MQTT disconnect request failed");
        return;
    }

    let flushed = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    match flushed {
        Ok(()) => tracing::info!("MQTT disconnected"),
        Err(_) => tracing::warn!("MQTT disconnect timed out"),
    }
}

impl PublishTransport for MqttTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}
