use std::fmt;

use daisy_proto::protolist::ProtolistError;
use daisy_proto::{FrameError, MethodId};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("protocol error: {message}")]
    Protocol { message: String },

    #[error("frame too large: {len} > {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("encode error: {message}")]
    Encode { message: String },

    #[error("connection closed")]
    ConnectionClosed,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            message: err.to_string(),
        }
    }
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge { len, max } => TransportError::FrameTooLarge { len, max },
            FrameError::Encode { message } => TransportError::Encode { message },
            other => TransportError::Protocol {
                message: other.to_string(),
            },
        }
    }
}

/// Where a [`CallError`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOrigin {
    /// Reported by the remote handler and carried back in the response.
    Remote,
    /// Produced on this side: undecodable reply, connection teardown, or a handler's own error
    /// before it is shipped.
    Local,
}

impl fmt::Display for CallOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOrigin::Remote => f.write_str("rpc"),
            CallOrigin::Local => f.write_str("local"),
        }
    }
}

/// Terminal failure of a single call.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("{origin} error: code:{code}, msg:{message}")]
pub struct CallError {
    pub code: i32,
    pub message: String,
    pub origin: CallOrigin,
}

impl CallError {
    /// An error raised on this side. Handlers return these; the caller sees them as remote.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            origin: CallOrigin::Local,
        }
    }

    pub fn remote(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            origin: CallOrigin::Remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.origin == CallOrigin::Remote
    }
}

/// Errors returned by `call`, `go_call` and `invoke`.
///
/// Everything except `Transport` and `Call` is a local validation failure that never reaches
/// the wire.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("call unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("cannot call method {method}: it has no reply, use invoke instead")]
    NotCallable { method: String },

    #[error("cannot invoke method {method}: it has a reply, use call instead")]
    UseCallInstead { method: String },

    #[error("method {method}: {position} type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        method: String,
        position: &'static str,
        expected: String,
        found: &'static str,
    },

    #[error("method {method}: completion channel has no free slot")]
    CompletionChannelUnavailable { method: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Call(#[from] CallError),
}

/// Errors raised while binding a module's handlers. Callers are expected to abort startup.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("undefined method {qualified_name}")]
    UndefinedMethod { qualified_name: String },

    #[error("method {qualified_name}: {position} mismatch: {detail}")]
    SignatureMismatch {
        qualified_name: String,
        position: &'static str,
        detail: String,
    },

    #[error("repeated method {qualified_name} (id {id})")]
    DuplicateService {
        qualified_name: String,
        id: MethodId,
    },
}

/// Errors raised while building a [`crate::Registry`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("method {qualified_name} has invalid id {id} (ids must be positive)")]
    InvalidId {
        id: MethodId,
        qualified_name: String,
    },

    #[error("repeated method id {id}: {first} and {second}")]
    DuplicateId {
        id: MethodId,
        first: String,
        second: String,
    },

    #[error("repeated qualified name {name}")]
    DuplicateQualifiedName { name: String },

    #[error("repeated call name {name}")]
    DuplicateCallName { name: String },

    #[error(transparent)]
    Protolist(#[from] ProtolistError),
}
