use crate::wire::{deserialize_pack, serialize_pack};
use crate::{Envelope, LENGTH_PREFIX_BYTES, MAX_FRAME_BYTES};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too large: {len} > {max}")]
    TooLarge { len: usize, max: usize },

    #[error("encode error: {message}")]
    Encode { message: String },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("{extra} trailing bytes after frame")]
    TrailingBytes { extra: usize },
}

/// Serialize an envelope body (without the length prefix).
///
/// Fails with [`FrameError::TooLarge`] when the body would not fit behind a `u16` prefix.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, FrameError> {
    let body = serialize_pack(&envelope.as_pack()).map_err(|err| match *err {
        bincode::ErrorKind::SizeLimit => FrameError::TooLarge {
            len: MAX_FRAME_BYTES + 1,
            max: MAX_FRAME_BYTES,
        },
        other => FrameError::Encode {
            message: other.to_string(),
        },
    })?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(body)
}

pub fn decode_envelope(body: &[u8]) -> Result<Envelope, FrameError> {
    if body.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    let pack = deserialize_pack(body).map_err(|err| FrameError::Decode {
        message: err.to_string(),
    })?;
    Ok(Envelope::from_pack(pack))
}

/// Serialize an envelope including its 2-byte big-endian length prefix.
pub fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>, FrameError> {
    let body = encode_envelope(envelope)?;
    // `encode_envelope` guarantees the length fits.
    let len = body.len() as u16;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode exactly one length-prefixed frame from `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Envelope, FrameError> {
    if bytes.len() < LENGTH_PREFIX_BYTES {
        return Err(FrameError::Truncated {
            expected: LENGTH_PREFIX_BYTES,
            actual: bytes.len(),
        });
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let body = &bytes[LENGTH_PREFIX_BYTES..];
    if body.len() < len {
        return Err(FrameError::Truncated {
            expected: len,
            actual: body.len(),
        });
    }
    if body.len() > len {
        return Err(FrameError::TrailingBytes {
            extra: body.len() - len,
        });
    }
    decode_envelope(body)
}
