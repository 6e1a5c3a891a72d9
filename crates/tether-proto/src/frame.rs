//! Length-prefixed CBOR framing.
//!
//! Frames are a 4-byte big-endian body length followed by the CBOR body. The
//! codec is synchronous and allocation-light; readers in the runtime read the
//! header, call [`frame_len`], then read exactly that many body bytes and call
//! [`decode_body`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

use crate::ProtoError;

/// Size of the length header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest accepted frame body (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Encode `value` as a complete frame (header + body).
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes, ProtoError> {
    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body).map_err(|e| ProtoError::Encode(e.to_string()))?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE });
    }

    let len = u32::try_from(body.len())
        .map_err(|_| ProtoError::FrameTooLarge { size: body.len(), max: MAX_FRAME_SIZE })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32(len);
    buf.extend_from_slice(&body);
    Ok(buf.freeze())
}

/// Parse a length header and validate it against [`MAX_FRAME_SIZE`].
pub fn frame_len(header: [u8; HEADER_LEN]) -> Result<usize, ProtoError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge { size: len, max: MAX_FRAME_SIZE });
    }
    Ok(len)
}

/// Decode a frame body (without its header).
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtoError> {
    ciborium::from_reader(body).map_err(|e| ProtoError::Decode(e.to_string()))
}

/// Decode a complete frame (header + body) held in memory.
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtoError> {
    let Some((header, body)) = frame.split_first_chunk::<HEADER_LEN>() else {
        return Err(ProtoError::Truncated { expected: HEADER_LEN, actual: frame.len() });
    };

    let len = frame_len(*header)?;
    if body.len() < len {
        return Err(ProtoError::Truncated { expected: len, actual: body.len() });
    }

    decode_body(&body[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Payload, PeerAddress, Signal};

    #[test]
    fn header_carries_body_length() {
        let frame = encode_frame(&Signal::Lookup { address: PeerAddress::new("H1") }).unwrap();
        let header: [u8; HEADER_LEN] = frame[..HEADER_LEN].try_into().unwrap();
        assert_eq!(frame_len(header).unwrap(), frame.len() - HEADER_LEN);
    }

    #[test]
    fn oversized_header_is_rejected() {
        let header = u32::try_from(MAX_FRAME_SIZE + 1).unwrap().to_be_bytes();
        assert!(matches!(frame_len(header), Err(ProtoError::FrameTooLarge { .. })));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let frame = encode_frame(&Payload::message("P1", 100, "hi")).unwrap();
        let result = decode_frame::<Payload>(&frame[..frame.len() - 1]);
        assert!(matches!(result, Err(ProtoError::Truncated { .. })));

        let result = decode_frame::<Payload>(&frame[..2]);
        assert!(matches!(result, Err(ProtoError::Truncated { expected: 4, actual: 2 })));
    }

    #[test]
    fn garbage_body_fails_to_decode() {
        let result = decode_body::<Payload>(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtoError::Decode(_))));
    }
}
