use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Referee telemetry reported by the microcontroller, one per inbound line.
///
/// Every field is mandatory on the wire; a line missing any of them never
/// produces a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub game_type: u32,
    pub game_progress: u32,
    pub remain_hp: u32,
    pub max_hp: u32,
    pub stage_remain_time: u32,
    pub bullet_remaining_num_17mm: u32,
    pub red_outpost_hp: u32,
    pub red_base_hp: u32,
    pub blue_outpost_hp: u32,
    pub blue_base_hp: u32,
    pub rfid_status: u32,
}

/// Host-originated motion command, prior to binary packing.
///
/// `angular_z` feeds both the `rotate` and the `yaw_speed` slots of the
/// outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub linear_x: f32,
    pub linear_y: f32,
    pub angular_z: f32,
}

impl CommandRecord {
    pub fn new(linear_x: f32, linear_y: f32, angular_z: f32) -> Self {
        Self {
            linear_x,
            linear_y,
            angular_z,
        }
    }
}

/// Lifecycle state of a serial channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelState {
    /// Device handle acquired and usable.
    Open,
    /// A device-level I/O error was observed.  The handle is still held
    /// until an explicit close.
    Failed,
    /// Handle released.
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Open => write!(f, "open"),
            ChannelState::Failed => write!(f, "failed"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Unified event wrapper for the bridge's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "serialbridge-runtime::poller"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a freshly stamped event.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Decoded microcontroller telemetry.
    Status(StatusRecord),
    /// Motion command destined for the microcontroller.
    Command(CommandRecord),
    /// A bridge component hit a runtime fault (serial read/write failure).
    BridgeFault {
        component: String,
        code: u32,
        message: String,
    },
}

/// Workspace-wide error type covering serial connection, I/O, decoding and
/// bus failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("Connection Error on {device}: {reason}")]
    Connection { device: String, reason: String },

    #[error("Serial I/O Error: {0}")]
    Io(String),

    #[error("Frame Decode Error: {0}")]
    Decode(String),

    #[error("Serial channel is not open (state: {0})")]
    NotOpen(ChannelState),

    #[error("Bus Channel Error: {0}")]
    Channel(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_status() -> StatusRecord {
        StatusRecord {
            game_type: 1,
            game_progress: 4,
            remain_hp: 350,
            max_hp: 400,
            stage_remain_time: 120,
            bullet_remaining_num_17mm: 200,
            red_outpost_hp: 1500,
            red_base_hp: 5000,
            blue_outpost_hp: 1200,
            blue_base_hp: 4800,
            rfid_status: 3,
        }
    }

    #[test]
    fn status_record_serializes_with_wire_field_names() {
        let json = serde_json::to_string(&sample_status()).unwrap();
        assert!(json.contains("\"bullet_remaining_num_17mm\":200"));
        assert!(json.contains("\"rfid_status\":3"));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "serialbridge-runtime::poller",
            EventPayload::Status(sample_status()),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        match back.payload {
            EventPayload::Status(status) => assert_eq!(status, sample_status()),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn command_event_keeps_velocity_components() {
        let event = Event::new("test", EventPayload::Command(CommandRecord::new(1.5, -0.25, 0.3)));
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        match back.payload {
            EventPayload::Command(cmd) => {
                assert!((cmd.linear_x - 1.5).abs() < f32::EPSILON);
                assert!((cmd.linear_y - (-0.25)).abs() < f32::EPSILON);
                assert!((cmd.angular_z - 0.3).abs() < f32::EPSILON);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::Connection {
            device: "/dev/ttyUSB0".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert!(err.to_string().contains("/dev/ttyUSB0"));

        let err2 = BridgeError::NotOpen(ChannelState::Failed);
        assert!(err2.to_string().contains("failed"));
    }
}
