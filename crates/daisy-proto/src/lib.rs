use bincode::Options as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Hard limits enforced while framing envelopes.
///
/// The length prefix is a `u16`, so a single serialized envelope (not including the 2-byte
/// prefix) can never exceed this size.
pub const MAX_FRAME_BYTES: usize = u16::MAX as usize;

/// Size of the big-endian length prefix in front of every envelope.
pub const LENGTH_PREFIX_BYTES: usize = 2;

/// Connection-local correlation id. `0` on a request means "no reply expected".
pub type SessionId = i32;

/// Numeric method id assigned by the schema. Always positive.
pub type MethodId = i32;

/// A payload type that can travel as a request argument or reply.
///
/// `TYPE_NAME` is the fully qualified schema name (for example `proto.debug.Ping`) and is compared
/// against descriptor type names to check argument/reply compatibility.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("encode {type_name}: {message}")]
    Encode {
        type_name: &'static str,
        message: String,
    },

    #[error("encode {type_name}: {len} bytes exceeds the {max}-byte limit")]
    TooLarge {
        type_name: &'static str,
        len: u64,
        max: usize,
    },

    #[error("decode {type_name}: {message}")]
    Decode {
        type_name: &'static str,
        message: String,
    },
}

pub fn encode_message<M: Message>(message: &M) -> Result<Vec<u8>, MessageError> {
    wire::bincode_options()
        .serialize(message)
        .map_err(|err| match *err {
            bincode::ErrorKind::SizeLimit => MessageError::TooLarge {
                type_name: M::TYPE_NAME,
                len: bincode::DefaultOptions::new()
                    .serialized_size(message)
                    .unwrap_or(u64::MAX),
                max: MAX_FRAME_BYTES,
            },
            other => MessageError::Encode {
                type_name: M::TYPE_NAME,
                message: other.to_string(),
            },
        })
}

pub fn decode_message<M: Message>(bytes: &[u8]) -> Result<M, MessageError> {
    wire::bincode_options()
        .deserialize(bytes)
        .map_err(|err| MessageError::Decode {
            type_name: M::TYPE_NAME,
            message: err.to_string(),
        })
}

/// A single method as published by the schema compiler.
///
/// The runtime treats a list of these as validated, opaque input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorRecord {
    pub id: MethodId,
    /// `Module.Method`, used when binding handlers.
    pub qualified_name: String,
    /// `module.method`, used by callers.
    pub call_name: String,
    pub argument_type: String,
    /// `None` means fire-and-forget.
    pub reply_type: Option<String>,
}

/// Envelope encoding: tagged request/response variants over the overloaded wire `Pack`.
pub mod wire;

/// Length-prefixed framing of envelopes.
pub mod framing;

/// Parser for the `module { name[:input[output]] = id }` schema format.
pub mod protolist;

pub use framing::{decode_envelope, decode_frame, encode_envelope, encode_frame, FrameError};
pub use wire::{codes, Envelope, ResponseOutcome};
