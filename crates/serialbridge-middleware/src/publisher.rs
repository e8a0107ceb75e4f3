//! The status-publishing seam between the bridge core and the bus.
//!
//! The inbound poller never talks to a concrete transport.  It hands each
//! decoded [`StatusRecord`] to a [`StatusPublisher`], which the
//! [`EventBus`][crate::bus::EventBus] implements by publishing on
//! [`Topic::Status`][crate::bus::Topic::Status].

use serialbridge_types::{BridgeError, StatusRecord};

/// Anything that can accept a decoded [`StatusRecord`] for publication.
///
/// # Contract
///
/// * The record is consumed exactly once; implementations must not retry.
/// * Returns the number of consumers that were handed the record, or an
///   error when the record could not be delivered to anyone.
pub trait StatusPublisher: Send + Sync {
    fn publish_status(&self, status: StatusRecord) -> Result<usize, BridgeError>;
}
