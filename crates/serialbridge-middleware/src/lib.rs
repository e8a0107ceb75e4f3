//! `serialbridge-middleware` – bus plumbing around the serial bridge core.
//!
//! Routes status and command events between the bridge core and the rest of
//! the host software without caring about what is on the serial link.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`publisher`] – [`StatusPublisher`], the seam the inbound poller
//!   publishes decoded telemetry through.
//! - [`ros2_bridge`] – rosbridge-compatible WebSocket endpoint exposing
//!   `/cmd_vel` and `/stm32_ros2_data` to external clients.

pub mod bus;
pub mod publisher;
pub mod ros2_bridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use publisher::StatusPublisher;
pub use ros2_bridge::Ros2Bridge;
