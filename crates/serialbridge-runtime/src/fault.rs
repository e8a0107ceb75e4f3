//! Fault alerts raised on [`Topic::SystemAlerts`] when a serial operation
//! fails on an open device.

use serialbridge_middleware::{EventBus, Topic};
use serialbridge_types::{BridgeError, Event, EventPayload};
use tracing::debug;

/// A line could not be read from the serial device.
pub const FAULT_SERIAL_READ: u32 = 1;

/// A frame could not be written to the serial device.
pub const FAULT_SERIAL_WRITE: u32 = 2;

/// Publish a [`EventPayload::BridgeFault`] describing `error`.
///
/// Alerts are advisory: when nobody listens on the alerts topic the fault is
/// only logged by the caller.
pub(crate) fn raise(bus: Option<&EventBus>, component: &str, code: u32, error: &BridgeError) {
    let Some(bus) = bus else { return };
    let event = Event::new(
        format!("serialbridge-runtime::{component}"),
        EventPayload::BridgeFault {
            component: component.to_string(),
            code,
            message: error.to_string(),
        },
    );
    if bus.publish_to(Topic::SystemAlerts, event).is_err() {
        debug!(component, code, "no alert subscribers for bridge fault");
    }
}
