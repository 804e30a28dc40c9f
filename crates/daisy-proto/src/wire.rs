use bincode::Options as _;
use serde::{Deserialize, Serialize};

use crate::{MethodId, SessionId, MAX_FRAME_BYTES};

/// Error codes produced by the runtime itself (handlers pick their own codes).
pub mod codes {
    /// Locally generated failures: connection teardown, undecodable replies.
    pub const LOCAL: i32 = 0;
    /// The callee refused to run the handler because its concurrency limit was reached.
    pub const OVERLOADED: i32 = -1;
    /// The handler succeeded but its reply could not be serialized into a frame.
    pub const REPLY_ENCODING_FAILED: i32 = -2;
    /// The handler panicked or was cancelled before producing a reply.
    pub const HANDLER_FAILED: i32 = -3;
}

/// Shared bincode configuration for envelopes and payloads.
///
/// Varint integers, a length limit equal to the frame ceiling, and trailing bytes rejected.
pub(crate) fn bincode_options() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_limit(MAX_FRAME_BYTES as u64)
}

/// Failure block carried by a response.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct PackError {
    pub failed: bool,
    pub code: i32,
    pub message: String,
}

/// The structure that actually crosses the wire.
///
/// `kind` is the method id on requests and `0` on responses. Nothing outside this module sees
/// that overload: everything else works with [`Envelope`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Pack {
    pub session: i32,
    #[serde(rename = "type")]
    pub kind: i32,
    pub data: Vec<u8>,
    pub error: Option<PackError>,
}

/// Borrowed twin of [`Pack`]; serializes to the same bytes.
#[derive(Serialize)]
pub(crate) struct PackRef<'a> {
    pub session: i32,
    #[serde(rename = "type")]
    pub kind: i32,
    pub data: &'a [u8],
    pub error: Option<PackErrorRef<'a>>,
}

#[derive(Serialize)]
pub(crate) struct PackErrorRef<'a> {
    pub failed: bool,
    pub code: i32,
    pub message: &'a str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseOutcome {
    Reply(Vec<u8>),
    Failed { code: i32, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Request {
        method: MethodId,
        /// `0` when the caller does not expect a reply.
        session: SessionId,
        payload: Vec<u8>,
    },
    Response {
        session: SessionId,
        outcome: ResponseOutcome,
    },
}

impl Envelope {
    pub fn session(&self) -> SessionId {
        match self {
            Envelope::Request { session, .. } | Envelope::Response { session, .. } => *session,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Request { .. } => "request",
            Envelope::Response { .. } => "response",
        }
    }

    /// Borrow the envelope as the wire struct, without copying its payload.
    pub(crate) fn as_pack(&self) -> PackRef<'_> {
        match self {
            Envelope::Request {
                method,
                session,
                payload,
            } => PackRef {
                session: *session,
                kind: *method,
                data: payload,
                error: None,
            },
            Envelope::Response {
                session,
                outcome: ResponseOutcome::Reply(data),
            } => PackRef {
                session: *session,
                kind: 0,
                data,
                error: None,
            },
            Envelope::Response {
                session,
                outcome: ResponseOutcome::Failed { code, message },
            } => PackRef {
                session: *session,
                kind: 0,
                data: &[],
                error: Some(PackErrorRef {
                    failed: true,
                    code: *code,
                    message,
                }),
            },
        }
    }

    pub(crate) fn from_pack(pack: Pack) -> Self {
        if pack.kind != 0 {
            return Envelope::Request {
                method: pack.kind,
                session: pack.session,
                payload: pack.data,
            };
        }

        let outcome = match pack.error {
            Some(PackError {
                failed: true,
                code,
                message,
            }) => ResponseOutcome::Failed { code, message },
            _ => ResponseOutcome::Reply(pack.data),
        };
        Envelope::Response {
            session: pack.session,
            outcome,
        }
    }
}

pub(crate) fn serialize_pack(pack: &PackRef<'_>) -> Result<Vec<u8>, bincode::Error> {
    bincode_options().serialize(pack)
}

pub(crate) fn deserialize_pack(bytes: &[u8]) -> Result<Pack, bincode::Error> {
    bincode_options().deserialize(bytes)
}
