//! [`InboundPoller`] – the periodic serial → bus path.
//!
//! Every tick the poller reads at most one line from the shared
//! [`SerialChannel`], decodes it into a [`StatusRecord`] and hands the record
//! to a [`StatusPublisher`].
//!
//! ```text
//!  Idle ──tick──▶ Reading ──decoded──▶ publish ──▶ Idle
//!                    │
//!                    └──empty / timeout / decode error / I/O error──▶ Idle
//! ```
//!
//! Nothing is retried: a line that fails to decode is logged and dropped, and
//! after a device error the channel is marked `Failed` but the next tick
//! reads again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serialbridge_hal::{SerialChannel, codec};
use serialbridge_middleware::{EventBus, StatusPublisher};
use serialbridge_types::{BridgeError, StatusRecord};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::fault::{self, FAULT_SERIAL_READ};

/// Result of a single poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The channel was closed; no read was attempted.
    Skipped,
    /// The read timed out with no data.
    Idle,
    /// A record was decoded and handed to at least one consumer.
    Published(StatusRecord),
    /// A record was decoded but the publisher had nobody to deliver it to.
    Unrouted(StatusRecord),
    /// The line could not be decoded and was discarded.
    Discarded,
    /// The device reported an I/O error.
    ReadFailed,
}

/// Point-in-time copy of the poller counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerStats {
    pub published: u64,
    pub unrouted: u64,
    pub decode_failures: u64,
    pub read_errors: u64,
    pub skipped_ticks: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    unrouted: AtomicU64,
    decode_failures: AtomicU64,
    read_errors: AtomicU64,
    skipped_ticks: AtomicU64,
}

/// Reads status lines off the serial link and publishes them.
pub struct InboundPoller {
    channel: Arc<SerialChannel>,
    publisher: Arc<dyn StatusPublisher>,
    alerts: Option<EventBus>,
    counters: Counters,
}

impl InboundPoller {
    pub fn new(channel: Arc<SerialChannel>, publisher: Arc<dyn StatusPublisher>) -> Self {
        Self {
            channel,
            publisher,
            alerts: None,
            counters: Counters::default(),
        }
    }

    /// Also raise a bridge fault on `bus` whenever a read fails.
    pub fn with_alerts(mut self, bus: EventBus) -> Self {
        self.alerts = Some(bus);
        self
    }

    /// Run one tick.  Blocks for at most the channel's read timeout.
    pub fn poll_once(&self) -> TickOutcome {
        if self.channel.is_closed() {
            return self.skip(self.channel.state());
        }

        let line = match self.channel.read_line() {
            Ok(line) => line,
            Err(BridgeError::NotOpen(state)) => return self.skip(state),
            Err(e) => {
                error!(device = %self.channel.device(), error = %e, "Error reading serial data");
                self.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                fault::raise(self.alerts.as_ref(), "poller", FAULT_SERIAL_READ, &e);
                return TickOutcome::ReadFailed;
            }
        };

        if line.is_empty() {
            return TickOutcome::Idle;
        }

        let status = match codec::decode(&line) {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, bytes = line.len(), "Failed to decode status line");
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                return TickOutcome::Discarded;
            }
        };

        match self.publisher.publish_status(status) {
            Ok(receivers) => {
                debug!(receivers, "published status record");
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Published(status)
            }
            Err(e) => {
                debug!(error = %e, "status record not delivered");
                self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
                TickOutcome::Unrouted(status)
            }
        }
    }

    /// Tick every `interval` until `shutdown` flips to `true`.
    ///
    /// Each read runs on the blocking pool; a shutdown request is honoured
    /// once the in-flight read returns, so the channel is never touched after
    /// this future completes.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let poller = Arc::clone(&self);
                    if let Err(e) = tokio::task::spawn_blocking(move || poller.poll_once()).await {
                        error!(error = %e, "poll tick panicked");
                    }
                }
            }
        }
        debug!("inbound poller stopped");
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            published: self.counters.published.load(Ordering::Relaxed),
            unrouted: self.counters.unrouted.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
            read_errors: self.counters.read_errors.load(Ordering::Relaxed),
            skipped_ticks: self.counters.skipped_ticks.load(Ordering::Relaxed),
        }
    }

    fn skip(&self, state: serialbridge_types::ChannelState) -> TickOutcome {
        warn!(device = %self.channel.device(), %state, "Serial connection is closed; skipping tick");
        self.counters.skipped_ticks.fetch_add(1, Ordering::Relaxed);
        TickOutcome::Skipped
    }
}
