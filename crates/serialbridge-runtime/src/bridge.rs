//! [`SerialBridge`] – wires the serial channel, the poller and the
//! dispatcher together and owns their shutdown.
//!
//! # Startup
//!
//! [`SerialBridge::open`] acquires the serial device.  If that fails the
//! caller receives [`BridgeError::Connection`] and nothing has been spawned.
//! [`SerialBridge::start`] then spawns two tasks on the current Tokio
//! runtime:
//!
//! * a periodic task driving [`InboundPoller`] every `poll_interval`;
//! * a reactive task driving [`OutboundDispatcher`] from
//!   [`Topic::Commands`].
//!
//! # Shutdown
//!
//! Any context may request shutdown through a [`ShutdownTrigger`].  The
//! [`BridgeHandle`] owner then calls [`BridgeHandle::shutdown`], which waits
//! for both tasks to finish their in-flight serial operation and closes the
//! channel.  The handle is consumed, so the close happens exactly once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serialbridge_hal::SerialChannel;
use serialbridge_middleware::{EventBus, Ros2Bridge, Topic};
use serialbridge_types::BridgeError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::dispatcher::{DispatcherStats, OutboundDispatcher};
use crate::poller::{InboundPoller, PollerStats};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Startup parameters for a [`SerialBridge`].
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub device_path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    /// Address of the rosbridge WebSocket endpoint; `None` disables it.
    pub ws_addr: Option<SocketAddr>,
}

impl BridgeConfig {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ws_addr: None,
        }
    }
}

/// Counters collected from both bridge paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub poller: PollerStats,
    pub dispatcher: DispatcherStats,
}

/// Cloneable handle any context can use to request shutdown.
#[derive(Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    /// Request shutdown.  Safe to call from any thread, any number of times.
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}

/// An opened, not yet running bridge.
pub struct SerialBridge {
    channel: Arc<SerialChannel>,
    bus: Arc<EventBus>,
    poll_interval: Duration,
    ws_addr: Option<SocketAddr>,
}

impl SerialBridge {
    /// Open the serial device described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the device cannot be opened.
    pub fn open(config: &BridgeConfig, bus: Arc<EventBus>) -> Result<Self, BridgeError> {
        let channel = SerialChannel::open(&config.device_path, config.baud_rate, config.read_timeout)?;
        Ok(Self::with_channel(Arc::new(channel), bus, config))
    }

    /// Build a bridge over an already-open channel.
    pub fn with_channel(channel: Arc<SerialChannel>, bus: Arc<EventBus>, config: &BridgeConfig) -> Self {
        Self {
            channel,
            bus,
            poll_interval: config.poll_interval,
            ws_addr: config.ws_addr,
        }
    }

    /// Spawn the poller and dispatcher tasks (and the rosbridge endpoint when
    /// configured).  Must be called from within a Tokio runtime.
    pub fn start(self) -> BridgeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alerts = (*self.bus).clone();

        let poller = Arc::new(
            InboundPoller::new(Arc::clone(&self.channel), self.bus.clone()).with_alerts(alerts.clone()),
        );
        let dispatcher = Arc::new(OutboundDispatcher::new(Arc::clone(&self.channel)).with_alerts(alerts));

        let commands = self.bus.subscribe_to(Topic::Commands);
        let poller_task = tokio::spawn(Arc::clone(&poller).run(self.poll_interval, shutdown_rx.clone()));
        let dispatcher_task = tokio::spawn(Arc::clone(&dispatcher).run(commands, shutdown_rx));

        let ws_task = self.ws_addr.map(|addr| {
            let bridge = Ros2Bridge::new(Arc::clone(&self.bus));
            tokio::spawn(async move {
                if let Err(e) = bridge.run_ws_server(addr).await {
                    error!(error = %e, "rosbridge endpoint stopped");
                }
            })
        });

        info!(
            device = %self.channel.device(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "serial bridge started"
        );

        BridgeHandle {
            trigger: ShutdownTrigger(Arc::new(shutdown_tx)),
            channel: self.channel,
            poller,
            dispatcher,
            poller_task,
            dispatcher_task,
            ws_task,
        }
    }
}

/// A running bridge.
pub struct BridgeHandle {
    trigger: ShutdownTrigger,
    channel: Arc<SerialChannel>,
    poller: Arc<InboundPoller>,
    dispatcher: Arc<OutboundDispatcher>,
    poller_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
    ws_task: Option<JoinHandle<()>>,
}

impl BridgeHandle {
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Resolve once shutdown has been requested through any trigger.
    pub async fn stopped(&self) {
        let mut rx = self.trigger.0.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            poller: self.poller.stats(),
            dispatcher: self.dispatcher.stats(),
        }
    }

    /// Stop both tasks, then close the serial channel.
    pub async fn shutdown(self) -> BridgeStats {
        self.trigger.trigger();

        if let Some(ws_task) = self.ws_task {
            ws_task.abort();
        }
        if let Err(e) = self.poller_task.await {
            error!(error = %e, "poller task ended abnormally");
        }
        if let Err(e) = self.dispatcher_task.await {
            error!(error = %e, "dispatcher task ended abnormally");
        }

        self.channel.close();

        let stats = BridgeStats {
            poller: self.poller.stats(),
            dispatcher: self.dispatcher.stats(),
        };
        info!(
            published = stats.poller.published,
            decode_failures = stats.poller.decode_failures,
            read_errors = stats.poller.read_errors,
            frames_written = stats.dispatcher.frames_written,
            write_errors = stats.dispatcher.write_errors,
            discarded = stats.dispatcher.discarded,
            "serial bridge stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{IdleReader, STATUS_LINE, SharedWriter};
    use serialbridge_types::{ChannelState, CommandRecord, Event, EventPayload};
    use std::io::Cursor;

    fn fast_config() -> BridgeConfig {
        BridgeConfig {
            poll_interval: Duration::from_millis(5),
            ..BridgeConfig::new("test-device")
        }
    }

    #[test]
    fn config_defaults_match_firmware_link() {
        let config = BridgeConfig::new("/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.read_timeout, Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert!(config.ws_addr.is_none());
    }

    #[test]
    fn open_missing_device_fails_before_anything_starts() {
        let bus = Arc::new(EventBus::default());
        let config = BridgeConfig::new("/dev/serialbridge-no-such-device");
        let result = SerialBridge::open(&config, Arc::clone(&bus));
        assert!(matches!(result, Err(BridgeError::Connection { .. })));
        assert_eq!(bus.subscriber_count(Topic::Commands), 0);
    }

    #[tokio::test]
    async fn bridge_translates_both_directions() {
        let bus = Arc::new(EventBus::default());
        let writer = SharedWriter::default();
        let channel = Arc::new(SerialChannel::from_io(
            "test-device",
            Cursor::new(format!("{STATUS_LINE}\n").into_bytes()),
            writer.clone(),
        ));
        let mut status_rx = bus.subscribe_to(Topic::Status);

        let handle = SerialBridge::with_channel(Arc::clone(&channel), Arc::clone(&bus), &fast_config()).start();

        let event = tokio::time::timeout(Duration::from_secs(2), status_rx.recv())
            .await
            .expect("status published")
            .unwrap();
        assert!(matches!(event.payload, EventPayload::Status(s) if s.red_base_hp == 2000));

        bus.publish_to(
            Topic::Commands,
            Event::new("test", EventPayload::Command(CommandRecord::new(1.0, 0.0, 0.5))),
        )
        .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.stats().dispatcher.frames_written < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frame written");

        let stats = handle.shutdown().await;
        assert_eq!(stats.poller.published, 1);
        assert_eq!(stats.dispatcher.frames_written, 1);
        assert_eq!(&writer.contents()[..2], &[0xAA, 0x13]);
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn trigger_from_another_context_stops_bridge() {
        let bus = Arc::new(EventBus::default());
        let channel = Arc::new(SerialChannel::from_io("test-device", IdleReader, SharedWriter::default()));
        let handle = SerialBridge::with_channel(Arc::clone(&channel), bus, &fast_config()).start();

        let trigger = handle.shutdown_trigger();
        std::thread::spawn(move || trigger.trigger());

        tokio::time::timeout(Duration::from_secs(2), handle.stopped())
            .await
            .expect("stop observed");
        assert!(handle.shutdown_trigger().is_triggered());

        let stats = tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown completes");
        assert_eq!(stats.poller.published, 0);
        assert_eq!(channel.state(), ChannelState::Closed);

        // A second close from the owning context is harmless.
        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
    }
}
