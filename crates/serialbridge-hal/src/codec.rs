//! Frame codec for the two wire formats spoken over the serial link.
//!
//! * **Inbound** – one JSON object per line carrying the eleven referee
//!   fields of a [`StatusRecord`].  See [`decode`].
//! * **Outbound** – a fixed 19-byte little-endian [`OutboundFrame`] packed
//!   from a [`CommandRecord`].  See [`encode`].
//!
//! Everything here is pure: no I/O, no locking, no logging.
//!
//! # Outbound layout
//!
//! | offset | size | field | value |
//! |---|---|---|---|
//! | 0 | 1 | header | [`FRAME_HEADER`] |
//! | 1 | 1 | checksum | [`FRAME_CHECKSUM`] |
//! | 2 | 4 | x_speed | `f32` linear x |
//! | 6 | 4 | y_speed | `f32` linear y |
//! | 10 | 4 | rotate | `f32` angular z |
//! | 14 | 4 | yaw_speed | `f32` angular z |
//! | 18 | 1 | running_state | [`RUNNING_STATE`] |

use serde_json::{Map, Value};
use serialbridge_types::{BridgeError, CommandRecord, StatusRecord};

/// Total size of an outbound frame in bytes.
pub const FRAME_LEN: usize = 19;

/// First byte of every outbound frame.
pub const FRAME_HEADER: u8 = 0xAA;

/// Value written into the checksum slot.
///
/// The firmware receives this constant, not a digest of the frame.  Keep it
/// until the firmware's expectation is confirmed.
pub const FRAME_CHECKSUM: u8 = 19;

/// Last byte of every outbound frame.
pub const RUNNING_STATE: u8 = 0x01;

pub const X_SPEED_OFFSET: usize = 2;
pub const Y_SPEED_OFFSET: usize = 6;
pub const ROTATE_OFFSET: usize = 10;
pub const YAW_SPEED_OFFSET: usize = 14;

/// Keys every inbound status line must carry.
pub const STATUS_FIELDS: [&str; 11] = [
    "game_type",
    "game_progress",
    "remain_hp",
    "max_hp",
    "stage_remain_time",
    "bullet_remaining_num_17mm",
    "red_outpost_hp",
    "red_base_hp",
    "blue_outpost_hp",
    "blue_base_hp",
    "rfid_status",
];

/// A packed host → microcontroller command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundFrame([u8; FRAME_LEN]);

impl OutboundFrame {
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for OutboundFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Pack `cmd` into an [`OutboundFrame`].
///
/// Total: every float (NaN and infinities included) is copied bit-for-bit.
/// `angular_z` is written to both the `rotate` and `yaw_speed` slots.
pub fn encode(cmd: &CommandRecord) -> OutboundFrame {
    let mut buf = [0u8; FRAME_LEN];
    buf[0] = FRAME_HEADER;
    buf[1] = FRAME_CHECKSUM;
    buf[X_SPEED_OFFSET..X_SPEED_OFFSET + 4].copy_from_slice(&cmd.linear_x.to_le_bytes());
    buf[Y_SPEED_OFFSET..Y_SPEED_OFFSET + 4].copy_from_slice(&cmd.linear_y.to_le_bytes());
    buf[ROTATE_OFFSET..ROTATE_OFFSET + 4].copy_from_slice(&cmd.angular_z.to_le_bytes());
    buf[YAW_SPEED_OFFSET..YAW_SPEED_OFFSET + 4].copy_from_slice(&cmd.angular_z.to_le_bytes());
    buf[FRAME_LEN - 1] = RUNNING_STATE;
    OutboundFrame(buf)
}

/// Decode one inbound line into a [`StatusRecord`].
///
/// Invalid UTF-8 sequences are dropped, then surrounding whitespace and line
/// terminators are trimmed.  The remaining text must be a JSON object that
/// carries every key in [`STATUS_FIELDS`] with a value convertible to an
/// unsigned 32-bit integer:
///
/// * JSON integers are taken as-is.
/// * JSON floats are truncated toward zero.
/// * Strings holding a decimal integer (`"42"`) are parsed.
///
/// Anything else (negative numbers, out-of-range values, booleans, null,
/// nested values) is a [`BridgeError::Decode`].  Extra keys are ignored.
///
/// Booleans are rejected rather than read as 1/0.  The firmware never sends
/// them, so a boolean in a counter field means the line is not a referee
/// status line.
pub fn decode(line: &[u8]) -> Result<StatusRecord, BridgeError> {
    let text: String = line.utf8_chunks().map(|chunk| chunk.valid()).collect();
    let text = text.trim();
    if text.is_empty() {
        return Err(BridgeError::Decode("empty line".to_string()));
    }

    let object: Map<String, Value> = serde_json::from_str(text)
        .map_err(|e| BridgeError::Decode(format!("invalid JSON object: {e}")))?;

    let field = |name: &str| -> Result<u32, BridgeError> {
        let value = object
            .get(name)
            .ok_or_else(|| BridgeError::Decode(format!("missing field `{name}`")))?;
        to_u32(value)
            .ok_or_else(|| BridgeError::Decode(format!("field `{name}` is not an unsigned integer: {value}")))
    };

    Ok(StatusRecord {
        game_type: field("game_type")?,
        game_progress: field("game_progress")?,
        remain_hp: field("remain_hp")?,
        max_hp: field("max_hp")?,
        stage_remain_time: field("stage_remain_time")?,
        bullet_remaining_num_17mm: field("bullet_remaining_num_17mm")?,
        red_outpost_hp: field("red_outpost_hp")?,
        red_base_hp: field("red_base_hp")?,
        blue_outpost_hp: field("blue_outpost_hp")?,
        blue_base_hp: field("blue_base_hp")?,
        rfid_status: field("rfid_status")?,
    })
}

fn to_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u32::try_from(u).ok()
            } else if n.is_i64() {
                None
            } else {
                let truncated = n.as_f64()?.trunc();
                if truncated.is_finite() && (0.0..=f64::from(u32::MAX)).contains(&truncated) {
                    Some(truncated as u32)
                } else {
                    None
                }
            }
        }
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_LINE: &str = r#"{"game_type":1,"game_progress":2,"remain_hp":100,"max_hp":100,"stage_remain_time":60,"bullet_remaining_num_17mm":50,"red_outpost_hp":1500,"red_base_hp":2000,"blue_outpost_hp":1500,"blue_base_hp":2000,"rfid_status":0}"#;

    fn read_f32(frame: &OutboundFrame, offset: usize) -> f32 {
        let bytes = frame.as_bytes();
        f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    fn line_without(field: &str) -> String {
        let mut object: Map<String, Value> = serde_json::from_str(SCENARIO_LINE).unwrap();
        object.remove(field);
        Value::Object(object).to_string()
    }

    // -----------------------------------------------------------------------
    // encode
    // -----------------------------------------------------------------------

    #[test]
    fn encode_matches_reference_bytes() {
        let frame = encode(&CommandRecord::new(1.0, 0.0, 0.5));
        assert_eq!(
            frame.as_bytes(),
            &[
                0xAA, 0x13, 0x00, 0x00, 0x80, 0x3F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x3F, 0x00, 0x00, 0x00, 0x3F, 0x01,
            ]
        );
    }

    #[test]
    fn encode_fields_read_back_by_offset() {
        let cmd = CommandRecord::new(-2.75, 0.125, std::f32::consts::PI);
        let frame = encode(&cmd);

        assert_eq!(frame.as_ref().len(), FRAME_LEN);
        assert_eq!(frame.as_bytes()[0], FRAME_HEADER);
        assert_eq!(frame.as_bytes()[1], FRAME_CHECKSUM);
        assert_eq!(frame.as_bytes()[18], RUNNING_STATE);
        assert_eq!(read_f32(&frame, X_SPEED_OFFSET).to_bits(), cmd.linear_x.to_bits());
        assert_eq!(read_f32(&frame, Y_SPEED_OFFSET).to_bits(), cmd.linear_y.to_bits());
        assert_eq!(read_f32(&frame, ROTATE_OFFSET).to_bits(), cmd.angular_z.to_bits());
        assert_eq!(read_f32(&frame, YAW_SPEED_OFFSET).to_bits(), cmd.angular_z.to_bits());
    }

    #[test]
    fn encode_passes_non_finite_floats_through_bit_for_bit() {
        let quiet_nan = f32::from_bits(0x7FC0_0001);
        let cmd = CommandRecord::new(quiet_nan, f32::INFINITY, f32::NEG_INFINITY);
        let frame = encode(&cmd);

        assert_eq!(read_f32(&frame, X_SPEED_OFFSET).to_bits(), 0x7FC0_0001);
        assert_eq!(read_f32(&frame, Y_SPEED_OFFSET), f32::INFINITY);
        assert_eq!(read_f32(&frame, ROTATE_OFFSET), f32::NEG_INFINITY);
        assert_eq!(read_f32(&frame, YAW_SPEED_OFFSET), f32::NEG_INFINITY);
    }

    // -----------------------------------------------------------------------
    // decode
    // -----------------------------------------------------------------------

    #[test]
    fn decode_reference_line() {
        let status = decode(SCENARIO_LINE.as_bytes()).unwrap();
        assert_eq!(
            status,
            StatusRecord {
                game_type: 1,
                game_progress: 2,
                remain_hp: 100,
                max_hp: 100,
                stage_remain_time: 60,
                bullet_remaining_num_17mm: 50,
                red_outpost_hp: 1500,
                red_base_hp: 2000,
                blue_outpost_hp: 1500,
                blue_base_hp: 2000,
                rfid_status: 0,
            }
        );
    }

    #[test]
    fn decode_maps_every_field_to_its_own_key() {
        let line = r#"{"game_type":3,"game_progress":4,"remain_hp":187,"max_hp":400,"stage_remain_time":299,"bullet_remaining_num_17mm":750,"red_outpost_hp":1200,"red_base_hp":4800,"blue_outpost_hp":950,"blue_base_hp":5000,"rfid_status":17}"#;
        assert_eq!(
            decode(line.as_bytes()).unwrap(),
            StatusRecord {
                game_type: 3,
                game_progress: 4,
                remain_hp: 187,
                max_hp: 400,
                stage_remain_time: 299,
                bullet_remaining_num_17mm: 750,
                red_outpost_hp: 1200,
                red_base_hp: 4800,
                blue_outpost_hp: 950,
                blue_base_hp: 5000,
                rfid_status: 17,
            }
        );
    }

    #[test]
    fn decode_accepts_u32_max() {
        let line = SCENARIO_LINE
            .replace(r#""rfid_status":0"#, r#""rfid_status":4294967295"#)
            .replace(r#""max_hp":100"#, r#""max_hp":"4294967295""#);
        let status = decode(line.as_bytes()).unwrap();
        assert_eq!(status.rfid_status, u32::MAX);
        assert_eq!(status.max_hp, u32::MAX);
    }

    #[test]
    fn decode_rejects_booleans() {
        for flag in ["true", "false"] {
            let line = SCENARIO_LINE.replace(r#""rfid_status":0"#, &format!(r#""rfid_status":{flag}"#));
            assert_eq!(
                decode(line.as_bytes()),
                Err(BridgeError::Decode(format!(
                    "field `rfid_status` is not an unsigned integer: {flag}"
                )))
            );
        }
    }

    #[test]
    fn decode_trims_terminators_and_whitespace() {
        let line = format!("  {SCENARIO_LINE}\r\n");
        assert_eq!(decode(line.as_bytes()).unwrap().red_base_hp, 2000);
    }

    #[test]
    fn decode_drops_invalid_utf8_bytes() {
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend_from_slice(SCENARIO_LINE.as_bytes());
        bytes.push(0xC3);
        let status = decode(&bytes).unwrap();
        assert_eq!(status.stage_remain_time, 60);
    }

    #[test]
    fn decode_rejects_each_missing_field() {
        for field in STATUS_FIELDS {
            let result = decode(line_without(field).as_bytes());
            match result {
                Err(BridgeError::Decode(msg)) => assert!(msg.contains(field), "{msg}"),
                other => panic!("expected Decode error for missing {field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn decode_rejects_non_numeric_values() {
        for bad in [r#""abc""#, "true", "null", "[1]", r#"{"v":1}"#, "-5", "4294967296"] {
            let line = SCENARIO_LINE.replace(r#""remain_hp":100"#, &format!(r#""remain_hp":{bad}"#));
            assert!(
                matches!(decode(line.as_bytes()), Err(BridgeError::Decode(_))),
                "value {bad} should be rejected"
            );
        }
    }

    #[test]
    fn decode_converts_floats_and_numeric_strings() {
        let line = SCENARIO_LINE
            .replace(r#""remain_hp":100"#, r#""remain_hp":99.9"#)
            .replace(r#""max_hp":100"#, r#""max_hp":"250""#);
        let status = decode(line.as_bytes()).unwrap();
        assert_eq!(status.remain_hp, 99);
        assert_eq!(status.max_hp, 250);
    }

    #[test]
    fn decode_ignores_extra_keys() {
        let line = SCENARIO_LINE.replace('}', r#","firmware":"v1.2"}"#);
        assert!(decode(line.as_bytes()).is_ok());
    }

    #[test]
    fn decode_rejects_non_json_input() {
        let truncated = &SCENARIO_LINE[..SCENARIO_LINE.len() / 2];
        for input in ["", "   \r\n", "hello", "[1,2,3]", "42", truncated] {
            assert!(
                matches!(decode(input.as_bytes()), Err(BridgeError::Decode(_))),
                "input {input:?} should be rejected"
            );
        }
    }
}
