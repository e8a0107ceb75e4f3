//! `serialbridge-hal` – the serial side of the bridge.
//!
//! # Modules
//!
//! - [`codec`] – pure encode/decode of the two wire formats: inbound JSON
//!   status lines and the outbound 19-byte command frame.
//! - [`channel`] – [`SerialChannel`], the single full-duplex connection to
//!   the microcontroller shared by the poller and the dispatcher.

pub mod channel;
pub mod codec;

pub use channel::SerialChannel;
pub use codec::{FRAME_LEN, OutboundFrame, decode, encode};
