//! rosbridge-compatible WebSocket endpoint for the serial bridge.
//!
//! This module provides [`Ros2Bridge`], which exposes the same two topics
//! the host-side ROS 2 graph uses to talk to the microcontroller:
//!
//! 1. **Outbound status** – every [`EventPayload::Status`] event on the bus
//!    is forwarded to connected clients as a rosbridge `publish` frame on
//!    [`STATUS_TOPIC`].
//!
//! 2. **Inbound commands** – a rosbridge `publish` on [`CMD_VEL_TOPIC`]
//!    carrying a `geometry_msgs/msg/Twist` is translated into a
//!    [`CommandRecord`] and published on [`Topic::Commands`], where the
//!    outbound dispatcher picks it up.
//!
//! The bridge only handles serialisation and transport; it never touches
//! the serial channel.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use serialbridge_types::{BridgeError, CommandRecord, Event, EventPayload, StatusRecord};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, Topic};

/// Topic on which motion commands arrive.
pub const CMD_VEL_TOPIC: &str = "/cmd_vel";

/// Topic on which decoded referee telemetry is published.
pub const STATUS_TOPIC: &str = "/stm32_ros2_data";

/// Source tag stamped on commands that entered through the WebSocket.
pub const CMD_VEL_SOURCE: &str = "serialbridge-middleware::ros2/cmd_vel";

/// Bridge between rosbridge WebSocket clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct Ros2Bridge {
    bus: Arc<EventBus>,
}

impl Ros2Bridge {
    /// Create a new bridge backed by `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Build the rosbridge `publish` frame for a status record.
    pub fn status_message(status: &StatusRecord) -> Value {
        json!({
            "op": "publish",
            "topic": STATUS_TOPIC,
            "msg": status,
        })
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Start a WebSocket server on `addr`.
    ///
    /// Every connecting client receives one JSON text frame per status
    /// event on the bus and may publish Twist commands on `/cmd_vel`.  The
    /// server runs until it encounters a fatal bind error or its task is
    /// aborted.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the TCP listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Io(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "rosbridge endpoint listening");
        self.serve(listener).await;
        Ok(())
    }

    /// Accept clients on an already-bound `listener` until the task is
    /// aborted.
    async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), BridgeError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| BridgeError::Io(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe_to(Topic::Status);

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(Event { payload: EventPayload::Status(status), .. }) => {
                            let json = serde_json::to_string(&Self::status_message(&status))
                                .map_err(|e| BridgeError::Serialization(e.to_string()))?;
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_ws_message(text.as_str());
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Parse an incoming WebSocket text message.
    ///
    /// Only a rosbridge `publish` on `/cmd_vel` is recognised.  Its Twist
    /// `linear.x`, `linear.y` and `angular.z` are extracted (absent
    /// components read as `0.0`) and re-published as a [`CommandRecord`] on
    /// [`Topic::Commands`].  Returns the command that was published, or
    /// `None` when the message was ignored.
    fn handle_incoming_ws_message(&self, text: &str) -> Option<CommandRecord> {
        let json = serde_json::from_str::<Value>(text).ok()?;

        let op = json.get("op").and_then(Value::as_str).unwrap_or("");
        let topic = json.get("topic").and_then(Value::as_str).unwrap_or("");
        if op != "publish" || topic != CMD_VEL_TOPIC {
            return None;
        }

        let msg = json.get("msg")?;
        let component = |vector: &str, axis: &str| -> f32 {
            msg.get(vector)
                .and_then(|v| v.get(axis))
                .and_then(Value::as_f64)
                .unwrap_or(0.0) as f32
        };
        let cmd = CommandRecord::new(
            component("linear", "x"),
            component("linear", "y"),
            component("angular", "z"),
        );

        if let Err(e) = self.bus.publish_to(
            Topic::Commands,
            Event::new(CMD_VEL_SOURCE, EventPayload::Command(cmd)),
        ) {
            warn!(error = %e, "dropping /cmd_vel command");
        }
        Some(cmd)
    }
}
