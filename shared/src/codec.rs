//! Wire codecs turning [`Message`]s into frames and back
//!
//! Two interchangeable encodings share one field layout per message type:
//!
//! - **Text**: `<tag> <json array of fields>\n`, e.g.
//!   `change-screen [1,"right",0.4,2.0,0.0,0.0]`
//! - **Binary**: `[i32 total length][u32 tag][bincode fields]`, little
//!   endian throughout, where the total length covers the whole frame
//!
//! Decoding never consumes a partial frame: `try_decode` returns `Ok(None)`
//! and leaves the ring untouched until the whole frame has arrived. Unknown
//! tags are fatal because skipping them would desynchronise the stream.

use crate::error::ProtocolError;
use crate::message::{
    BalloonContent, BalloonState, ChangeScreen, Direction, Message, MessageType, NewObject,
    ObjectId, ObjectKind, Vector2,
};
use crate::ring::ByteRing;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Length prefix plus type tag
pub const BINARY_HEADER_LEN: usize = 8;

pub trait FrameCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError>;

    /// Extracts the next complete frame, if there is one
    fn try_decode(&self, ring: &mut ByteRing) -> Result<Option<Message>, ProtocolError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl FrameCodec for TextCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let ty = message.message_type();
        let fields = pack_message::<JsonFields>(message)?;

        let mut line = Vec::with_capacity(ty.name().len() + fields.len() + 2);
        line.extend_from_slice(ty.name().as_bytes());
        line.push(b' ');
        line.extend_from_slice(&fields);
        line.push(b'\n');
        Ok(line)
    }

    /// Scans for `\n` from the read cursor on every call, so one call costs
    /// at most the ring capacity. A line trickling in one byte per receive
    /// is rescanned each time, which is quadratic in the line length and
    /// therefore bounded by the square of the connection's buffer capacity.
    fn try_decode(&self, ring: &mut ByteRing) -> Result<Option<Message>, ProtocolError> {
        let Some(end) = (0..ring.available()).find(|&i| ring.peek_byte(i) == Ok(b'\n')) else {
            if ring.free_capacity() == 0 {
                return Err(ProtocolError::FrameTooLarge {
                    length: ring.available(),
                    capacity: ring.capacity(),
                });
            }
            return Ok(None);
        };

        let raw = ring.read_vec(end + 1)?;
        let line = std::str::from_utf8(&raw[..end])
            .map_err(|e| ProtocolError::malformed("text", e.to_string()))?;
        let line = line.strip_suffix('\r').unwrap_or(line);

        let (tag, fields) = line.split_once(' ').unwrap_or((line, ""));
        let ty = MessageType::from_name(tag)
            .ok_or_else(|| ProtocolError::UnsupportedMessageType(tag.to_string()))?;

        unpack_message::<JsonFields>(ty, fields.as_bytes()).map(Some)
    }
}

impl FrameCodec for BinaryCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let ty = message.message_type();
        let fields = pack_message::<BincodeFields>(message)?;
        let total = BINARY_HEADER_LEN + fields.len();

        let mut frame = Vec::with_capacity(total);
        frame.extend_from_slice(&(total as i32).to_le_bytes());
        frame.extend_from_slice(&ty.tag().to_le_bytes());
        frame.extend_from_slice(&fields);
        Ok(frame)
    }

    fn try_decode(&self, ring: &mut ByteRing) -> Result<Option<Message>, ProtocolError> {
        if ring.available() < 4 {
            return Ok(None);
        }

        let length = i32::from_le_bytes([
            ring.peek_byte(0)?,
            ring.peek_byte(1)?,
            ring.peek_byte(2)?,
            ring.peek_byte(3)?,
        ]);
        if length < BINARY_HEADER_LEN as i32 {
            return Err(ProtocolError::malformed(
                "binary",
                format!("frame length {} is shorter than its header", length),
            ));
        }

        let length = length as usize;
        if length > ring.capacity() {
            return Err(ProtocolError::FrameTooLarge {
                length,
                capacity: ring.capacity(),
            });
        }
        if ring.available() < length {
            return Ok(None);
        }

        let frame = ring.read_vec(length)?;
        let tag = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let ty = MessageType::from_tag(tag)
            .ok_or_else(|| ProtocolError::UnsupportedMessageType(tag.to_string()))?;

        unpack_message::<BincodeFields>(ty, &frame[BINARY_HEADER_LEN..]).map(Some)
    }
}

/// Encoding selected for a connection, both ends must agree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Text,
    Binary,
}

impl FrameCodec for WireFormat {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        match self {
            WireFormat::Text => TextCodec.encode(message),
            WireFormat::Binary => BinaryCodec.encode(message),
        }
    }

    fn try_decode(&self, ring: &mut ByteRing) -> Result<Option<Message>, ProtocolError> {
        match self {
            WireFormat::Text => TextCodec.try_decode(ring),
            WireFormat::Binary => BinaryCodec.try_decode(ring),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Text => f.write_str("text"),
            WireFormat::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(WireFormat::Text),
            "binary" => Ok(WireFormat::Binary),
            other => Err(format!("unknown wire format '{}' (expected text or binary)", other)),
        }
    }
}

/// How one encoding lays out a message's positional fields
trait FieldFormat {
    fn pack<T: Serialize>(fields: &T) -> Result<Vec<u8>, ProtocolError>;
    fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError>;
}

struct JsonFields;

struct BincodeFields;

impl FieldFormat for JsonFields {
    fn pack<T: Serialize>(fields: &T) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(fields)?)
    }

    fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl FieldFormat for BincodeFields {
    fn pack<T: Serialize>(fields: &T) -> Result<Vec<u8>, ProtocolError> {
        Ok(bincode::serialize(fields)?)
    }

    fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Non-finite floats have no JSON form and would only fail at the peer
fn ensure_finite(message: &Message) -> Result<(), ProtocolError> {
    let (y, velocity, time) = match message {
        Message::NewObject(new) => {
            let time = match new.kind {
                ObjectKind::Plane { time, .. } => time,
                ObjectKind::Balloon => 0.0,
            };
            (new.y, new.velocity, time)
        }
        Message::ChangeScreen(change) => (change.y, change.velocity, change.time),
        _ => return Ok(()),
    };

    if [y, velocity.x, velocity.y, time].iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ProtocolError::malformed(
            message.message_type().name(),
            "non-finite float field",
        ))
    }
}

fn pack_message<F: FieldFormat>(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    ensure_finite(message)?;
    match message {
        Message::NewObject(new) => {
            let NewObject {
                id,
                direction,
                y,
                velocity,
                ..
            } = *new;
            match new.kind {
                ObjectKind::Balloon => F::pack(&(id, direction, y, velocity.x, velocity.y)),
                ObjectKind::Plane { plane_type, time } => F::pack(&(
                    id, direction, y, velocity.x, velocity.y, plane_type, time,
                )),
            }
        }
        Message::ChangeScreen(change) => F::pack(&(
            change.id,
            change.direction,
            change.y,
            change.velocity.x,
            change.velocity.y,
            change.time,
        )),
        Message::PopObject { id } | Message::GetContent { id } | Message::GetState { id } => {
            F::pack(&(id,))
        }
        Message::ContentUpdate { id, content } => F::pack(&(
            id,
            content.content_type,
            &content.label,
            &content.content,
            &content.url,
        )),
        Message::StateUpdate { id, state } => F::pack(&(
            id,
            state.overlay_type,
            state.background_color,
            state.votes,
        )),
    }
}

fn unpack_message<F: FieldFormat>(ty: MessageType, bytes: &[u8]) -> Result<Message, ProtocolError> {
    unpack_fields::<F>(ty, bytes).map_err(|e| ProtocolError::malformed(ty.name(), e.to_string()))
}

fn unpack_fields<F: FieldFormat>(ty: MessageType, bytes: &[u8]) -> Result<Message, ProtocolError> {
    let message = match ty {
        MessageType::NewBalloon => {
            let (id, direction, y, vx, vy): (ObjectId, Direction, f32, f32, f32) =
                F::unpack(bytes)?;
            Message::NewObject(NewObject {
                id,
                kind: ObjectKind::Balloon,
                direction,
                y,
                velocity: Vector2::new(vx, vy),
            })
        }
        MessageType::NewPlane => {
            let (id, direction, y, vx, vy, plane_type, time): (
                ObjectId,
                Direction,
                f32,
                f32,
                f32,
                u32,
                f32,
            ) = F::unpack(bytes)?;
            Message::NewObject(NewObject {
                id,
                kind: ObjectKind::Plane { plane_type, time },
                direction,
                y,
                velocity: Vector2::new(vx, vy),
            })
        }
        MessageType::ChangeScreen => {
            let (id, direction, y, vx, vy, time): (ObjectId, Direction, f32, f32, f32, f32) =
                F::unpack(bytes)?;
            Message::ChangeScreen(ChangeScreen {
                id,
                direction,
                y,
                velocity: Vector2::new(vx, vy),
                time,
            })
        }
        MessageType::PopObject => {
            let (id,): (ObjectId,) = F::unpack(bytes)?;
            Message::PopObject { id }
        }
        MessageType::GetContent => {
            let (id,): (ObjectId,) = F::unpack(bytes)?;
            Message::GetContent { id }
        }
        MessageType::GetState => {
            let (id,): (ObjectId,) = F::unpack(bytes)?;
            Message::GetState { id }
        }
        MessageType::ContentUpdate => {
            let (id, content_type, label, content, url): (ObjectId, u32, String, String, String) =
                F::unpack(bytes)?;
            Message::ContentUpdate {
                id,
                content: BalloonContent {
                    content_type,
                    label,
                    content,
                    url,
                },
            }
        }
        MessageType::StateUpdate => {
            let (id, overlay_type, background_color, votes): (ObjectId, u32, [u8; 4], u32) =
                F::unpack(bytes)?;
            Message::StateUpdate {
                id,
                state: BalloonState {
                    overlay_type,
                    background_color,
                    votes,
                },
            }
        }
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::NewObject(NewObject {
                id: 1,
                kind: ObjectKind::Balloon,
                direction: Direction::Left,
                y: 0.4,
                velocity: Vector2::new(2.0, 0.0),
            }),
            Message::NewObject(NewObject {
                id: 2,
                kind: ObjectKind::Plane {
                    plane_type: 3,
                    time: 12.75,
                },
                direction: Direction::Any,
                y: 0.0,
                velocity: Vector2::new(-0.125, 1.0 / 3.0),
            }),
            Message::ChangeScreen(ChangeScreen {
                id: 3,
                direction: Direction::Right,
                y: 0.999,
                velocity: Vector2::new(-2.5, -0.0),
                time: 0.0,
            }),
            Message::PopObject { id: 4 },
            Message::ContentUpdate {
                id: 5,
                content: BalloonContent {
                    content_type: 1,
                    label: "Hello, \"ring\" world".to_string(),
                    content: "line one\nline two".to_string(),
                    url: "https://example.org/a b".to_string(),
                },
            },
            Message::StateUpdate {
                id: 6,
                state: BalloonState {
                    overlay_type: 2,
                    background_color: [255, 128, 0, 64],
                    votes: 17,
                },
            },
            Message::GetContent { id: 7 },
            Message::GetState { id: 8 },
        ]
    }

    fn decode_all(codec: &impl FrameCodec, bytes: &[u8]) -> Vec<Message> {
        let mut ring = ByteRing::new(1024);
        ring.write(bytes).unwrap();

        let mut decoded = Vec::new();
        while let Some(message) = codec.try_decode(&mut ring).unwrap() {
            decoded.push(message);
        }
        assert_eq!(ring.available(), 0);
        decoded
    }

    #[test]
    fn test_text_round_trip_every_variant() {
        let messages = sample_messages();
        let mut bytes = Vec::new();
        for message in &messages {
            bytes.extend(TextCodec.encode(message).unwrap());
        }

        assert_eq!(decode_all(&TextCodec, &bytes), messages);
    }

    #[test]
    fn test_binary_round_trip_every_variant() {
        let messages = sample_messages();
        let mut bytes = Vec::new();
        for message in &messages {
            bytes.extend(BinaryCodec.encode(message).unwrap());
        }

        assert_eq!(decode_all(&BinaryCodec, &bytes), messages);
    }

    #[test]
    fn test_text_line_layout() {
        let message = Message::ChangeScreen(ChangeScreen {
            id: 1,
            direction: Direction::Right,
            y: 0.5,
            velocity: Vector2::new(2.0, 0.0),
            time: 0.0,
        });
        let line = TextCodec.encode(&message).unwrap();

        assert_eq!(
            String::from_utf8(line).unwrap(),
            "change-screen [1,\"right\",0.5,2.0,0.0,0.0]\n"
        );
    }

    #[test]
    fn test_text_accepts_crlf() {
        let mut ring = ByteRing::new(64);
        ring.write(b"pop-object [12]\r\n").unwrap();

        let decoded = TextCodec.try_decode(&mut ring).unwrap();
        assert_eq!(decoded, Some(Message::PopObject { id: 12 }));
    }

    #[test]
    fn test_binary_header_layout() {
        let frame = BinaryCodec.encode(&Message::PopObject { id: 0x0102 }).unwrap();

        assert_eq!(frame.len(), 12);
        assert_eq!(&frame[0..4], &12i32.to_le_bytes());
        assert_eq!(&frame[4..8], &MessageType::PopObject.tag().to_le_bytes());
        assert_eq!(&frame[8..12], &[0x02, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_binary_velocity_components_survive() {
        let message = Message::ChangeScreen(ChangeScreen {
            id: 11,
            direction: Direction::Left,
            y: 0.3,
            velocity: Vector2::new(-1.0e-3, 7.25),
            time: 4.5,
        });
        let bytes = BinaryCodec.encode(&message).unwrap();

        match decode_all(&BinaryCodec, &bytes).pop() {
            Some(Message::ChangeScreen(change)) => {
                assert_approx_eq!(change.velocity.x, -1.0e-3, f32::EPSILON);
                assert_approx_eq!(change.velocity.y, 7.25, f32::EPSILON);
                assert_approx_eq!(change.time, 4.5, f32::EPSILON);
            }
            other => panic!("Unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_floats_fail_at_encode() {
        let change = Message::ChangeScreen(ChangeScreen {
            id: 1,
            direction: Direction::Right,
            y: 0.5,
            velocity: Vector2::new(f32::INFINITY, 0.0),
            time: 0.0,
        });
        let plane = Message::NewObject(NewObject {
            id: 2,
            kind: ObjectKind::Plane {
                plane_type: 0,
                time: f32::NAN,
            },
            direction: Direction::Left,
            y: 0.5,
            velocity: Vector2::new(0.1, 0.0),
        });

        for message in [change, plane] {
            assert!(matches!(
                TextCodec.encode(&message),
                Err(ProtocolError::Malformed { .. })
            ));
            assert!(matches!(
                BinaryCodec.encode(&message),
                Err(ProtocolError::Malformed { .. })
            ));
        }
    }

    fn assert_byte_by_byte(codec: &impl FrameCodec, message: &Message) {
        let frame = codec.encode(message).unwrap();
        let mut ring = ByteRing::new(256);

        for (i, byte) in frame.iter().enumerate() {
            ring.write(&[*byte]).unwrap();
            let decoded = codec.try_decode(&mut ring).unwrap();

            if i + 1 < frame.len() {
                assert!(decoded.is_none(), "decoded early at byte {}", i);
                assert_eq!(ring.available(), i + 1);
            } else {
                assert_eq!(decoded.as_ref(), Some(message));
                assert_eq!(ring.available(), 0);
            }
        }
    }

    #[test]
    fn test_partial_frames_byte_by_byte() {
        for message in sample_messages() {
            assert_byte_by_byte(&TextCodec, &message);
            assert_byte_by_byte(&BinaryCodec, &message);
        }
    }

    #[test]
    fn test_partial_frame_leaves_following_bytes() {
        let first = BinaryCodec.encode(&Message::GetState { id: 1 }).unwrap();
        let second = BinaryCodec.encode(&Message::GetState { id: 2 }).unwrap();

        let mut ring = ByteRing::new(64);
        ring.write(&first).unwrap();
        ring.write(&second[..5]).unwrap();

        assert_eq!(
            BinaryCodec.try_decode(&mut ring).unwrap(),
            Some(Message::GetState { id: 1 })
        );
        assert_eq!(BinaryCodec.try_decode(&mut ring).unwrap(), None);
        assert_eq!(ring.available(), 5);
    }

    #[test]
    fn test_text_unknown_tag_is_fatal() {
        let mut ring = ByteRing::new(64);
        ring.write(b"new-zeppelin [1]\n").unwrap();

        match TextCodec.try_decode(&mut ring) {
            Err(ProtocolError::UnsupportedMessageType(tag)) => assert_eq!(tag, "new-zeppelin"),
            other => panic!("Expected unsupported type, got {:?}", other),
        }
    }

    #[test]
    fn test_binary_unknown_tag_is_fatal() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&12i32.to_le_bytes());
        frame.extend_from_slice(&99u32.to_le_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]);

        let mut ring = ByteRing::new(64);
        ring.write(&frame).unwrap();

        assert!(matches!(
            BinaryCodec.try_decode(&mut ring),
            Err(ProtocolError::UnsupportedMessageType(_))
        ));
    }

    #[test]
    fn test_text_wrong_field_count_is_malformed() {
        let mut ring = ByteRing::new(64);
        ring.write(b"change-screen [1,\"left\"]\n").unwrap();

        match TextCodec.try_decode(&mut ring) {
            Err(ProtocolError::Malformed { tag, .. }) => assert_eq!(tag, "change-screen"),
            other => panic!("Expected malformed frame, got {:?}", other),
        }
    }

    #[test]
    fn test_text_bad_direction_is_malformed() {
        let mut ring = ByteRing::new(64);
        ring.write(b"new-balloon [1,\"up\",0.5,1.0,0.0]\n").unwrap();

        assert!(matches!(
            TextCodec.try_decode(&mut ring),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_binary_short_length_is_malformed() {
        let mut ring = ByteRing::new(64);
        ring.write(&4i32.to_le_bytes()).unwrap();

        assert!(matches!(
            BinaryCodec.try_decode(&mut ring),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_frames_larger_than_ring_are_rejected() {
        let mut ring = ByteRing::new(16);
        ring.write(&1000i32.to_le_bytes()).unwrap();
        assert!(matches!(
            BinaryCodec.try_decode(&mut ring),
            Err(ProtocolError::FrameTooLarge { length: 1000, .. })
        ));

        let mut ring = ByteRing::new(8);
        ring.write(b"pop-obje").unwrap();
        assert!(matches!(
            TextCodec.try_decode(&mut ring),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_wire_format_parsing() {
        assert_eq!("text".parse::<WireFormat>(), Ok(WireFormat::Text));
        assert_eq!("BINARY".parse::<WireFormat>(), Ok(WireFormat::Binary));
        assert!("xml".parse::<WireFormat>().is_err());
        assert_eq!(WireFormat::Binary.to_string(), "binary");
    }

    #[test]
    fn test_wire_format_dispatches_to_codec() {
        let message = Message::GetContent { id: 42 };
        assert_eq!(
            WireFormat::Text.encode(&message).unwrap(),
            TextCodec.encode(&message).unwrap()
        );
        assert_eq!(
            WireFormat::Binary.encode(&message).unwrap(),
            BinaryCodec.encode(&message).unwrap()
        );
    }
}
