//! SOF frame encoding and decoding.
//!
//! A data frame on the wire looks like this:
//!
//! ```text
//! +------+-----+------+-------+----------------+-------+
//! | SOF  | LEN | TYPE | CLASS | payload...     | CKSUM |
//! | 0x01 |     | 0/1  |       |                |       |
//! +------+-----+------+-------+----------------+-------+
//! ```
//!
//! `LEN` counts every byte after itself, i.e. TYPE through CKSUM. `CKSUM` is
//! the XOR of all bytes from LEN through the last payload byte, seeded with
//! `0xFF`. A frame is therefore `LEN + 2` bytes long in total.
//!
//! SendData requests additionally carry the transmit options and the
//! callback id as the last two payload bytes on the wire; the codec appends
//! them so higher layers never deal with that quirk.

use bytes::BufMut;

use crate::constants::*;
use crate::error::ProtocolError;
use crate::message::{MessageClass, MessageType, SerialMessage};

/// Compute the frame checksum over `bytes` (LEN through last payload byte).
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0xFF, |acc, b| acc ^ b)
}

/// Encode a message into its wire representation, checksum filled last.
pub fn encode(message: &SerialMessage) -> Result<Vec<u8>, ProtocolError> {
    let sends_callback = message.message_class == MessageClass::SendData
        && message.message_type == MessageType::Request;
    let trailer_len = if sends_callback { 2 } else { 0 };
    let payload_len = message.payload.len() + trailer_len;
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLong {
            max: MAX_PAYLOAD_SIZE,
            actual: payload_len,
        });
    }

    let mut buf = Vec::with_capacity(payload_len + MIN_FRAME_SIZE);
    buf.put_u8(SOF);
    buf.put_u8((payload_len + 3) as u8);
    buf.put_u8(message.message_type.key());
    buf.put_u8(message.message_class.key());
    buf.put_slice(&message.payload);
    if sends_callback {
        buf.put_u8(message.transmit_options);
        buf.put_u8(message.callback_id);
    }
    buf.put_u8(checksum(&buf[OFFSET_LENGTH..]));
    Ok(buf)
}

/// Decode a complete frame buffer (starting at SOF, ending at CKSUM).
///
/// A checksum or structure failure means the frame must not be acknowledged;
/// the stick will retransmit on its own timeout.
pub fn decode(buffer: &[u8]) -> Result<SerialMessage, ProtocolError> {
    if buffer.len() < MIN_FRAME_SIZE {
        return Err(ProtocolError::FrameTooShort {
            expected: MIN_FRAME_SIZE,
            actual: buffer.len(),
        });
    }
    if buffer[0] != SOF {
        return Err(ProtocolError::NotAFrame(buffer[0]));
    }
    let declared = buffer[OFFSET_LENGTH] as usize;
    if declared + 2 != buffer.len() {
        return Err(ProtocolError::LengthMismatch {
            declared,
            actual: buffer.len() - 2,
        });
    }

    let expected = checksum(&buffer[OFFSET_LENGTH..buffer.len() - 1]);
    let actual = buffer[buffer.len() - 1];
    if expected != actual {
        return Err(ProtocolError::BadChecksum { expected, actual });
    }

    let message_type = MessageType::from_key(buffer[OFFSET_MESSAGE_TYPE])?;
    let message_class = MessageClass::from_key(buffer[OFFSET_MESSAGE_CLASS]);
    let payload = buffer[OFFSET_PAYLOAD..buffer.len() - 1].to_vec();

    let mut message = SerialMessage::request(message_class, crate::MessagePriority::High);
    message.message_type = message_type;
    message.payload = payload;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessagePriority;
    use crate::requests;

    #[test]
    fn test_encode_get_version() {
        // The canonical GetVersion request frame.
        let bytes = encode(&requests::get_version()).unwrap();
        assert_eq!(bytes, vec![0x01, 0x03, 0x00, 0x15, 0xE9]);
    }

    #[test]
    fn test_encode_appends_send_data_trailer() {
        let mut msg = SerialMessage::request(MessageClass::SendData, MessagePriority::Get)
            .with_payload(vec![0x05, 0x02, 0x25, 0x02])
            .with_node(5);
        msg.transmit_options = TRANSMIT_OPTIONS_STANDARD;
        msg.callback_id = 0x01;

        let bytes = encode(&msg).unwrap();
        // SOF, LEN, TYPE, CLASS, node, len, cc bytes, options, callback, cksum
        assert_eq!(bytes[1] as usize, msg.payload.len() + 2 + 3);
        assert_eq!(bytes[bytes.len() - 3], TRANSMIT_OPTIONS_STANDARD);
        assert_eq!(bytes[bytes.len() - 2], 0x01);
    }

    #[test]
    fn test_decode_round_trip() {
        let mut msg = SerialMessage::request(MessageClass::MemoryGetId, MessagePriority::High);
        msg.payload = vec![0xDE, 0xAD, 0xBE, 0xEF];

        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.message_class, MessageClass::MemoryGetId);
        assert_eq!(decoded.message_type, MessageType::Request);
        assert_eq!(decoded.payload, msg.payload);
    }

    #[test]
    fn test_single_bit_of_rot_invalidates_frame() {
        let bytes = encode(&requests::get_version()).unwrap();
        for i in 0..bytes.len() {
            let mut corrupted = bytes.clone();
            corrupted[i] ^= 0x10;
            assert!(
                decode(&corrupted).is_err(),
                "flipping byte {} should invalidate the frame",
                i
            );
        }
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = encode(&requests::get_version()).unwrap();
        assert!(matches!(
            decode(&bytes[..4]),
            Err(ProtocolError::FrameTooShort { .. })
        ));

        let mut msg = SerialMessage::request(MessageClass::GetVersion, MessagePriority::High);
        msg.payload = vec![1, 2, 3];
        let bytes = encode(&msg).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_control_bytes() {
        for control in [ACK, NAK, CAN] {
            let buffer = [control, 0x03, 0x00, 0x15, 0xE9];
            assert!(decode(&buffer).is_err());
        }
    }

    #[test]
    fn test_decode_keeps_unknown_class() {
        let mut msg = SerialMessage::request(MessageClass::Unknown(0xAA), MessagePriority::High);
        msg.payload = vec![0x07];
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.message_class, MessageClass::Unknown(0xAA));
    }
}
