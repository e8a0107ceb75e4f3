//! `serialbridge-runtime` – the two concurrent paths of the serial bridge.
//!
//! # Modules
//!
//! - [`poller`] – [`InboundPoller`][poller::InboundPoller]: reads one line
//!   per tick, decodes it and publishes the status record.
//! - [`dispatcher`] – [`OutboundDispatcher`][dispatcher::OutboundDispatcher]:
//!   packs each command from the bus and writes it to the serial link.
//! - [`bridge`] – [`SerialBridge`][bridge::SerialBridge]: opens the channel,
//!   spawns both paths and closes the channel exactly once at shutdown.
//! - [`fault`] – bridge fault alerts on the `SystemAlerts` topic.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod bridge;
pub mod dispatcher;
pub mod fault;
pub mod poller;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeConfig, BridgeHandle, BridgeStats, SerialBridge, ShutdownTrigger};
pub use dispatcher::{DispatchOutcome, DispatcherStats, OutboundDispatcher};
pub use poller::{InboundPoller, PollerStats, TickOutcome};
pub use telemetry::{TracerProviderGuard, init_tracing};
