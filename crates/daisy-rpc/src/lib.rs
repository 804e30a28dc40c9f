//! Tokio runtime for the daisy bidirectional RPC protocol.
//!
//! This crate implements:
//! - u16 length-prefixed framing over any `AsyncRead + AsyncWrite` stream
//! - a descriptor registry keyed by id, qualified name and call name
//! - module registration with argument/reply type checking
//! - multiplexed in-flight calls with per-connection session ids
//! - concurrent request handlers bounded by a per-connection limit
//! - symmetric roles: servers can call back into clients over the same connection

mod call;
mod client;
pub mod codec;
mod config;
mod context;
mod descriptor;
mod error;
mod module;
mod registry;
mod server;
mod service;

pub use call::{Call, CallHandle};
pub use client::{Client, ClientBuilder};
pub use config::{
    OverloadPolicy, RpcConfig, UnknownPacketPolicy, DEFAULT_MAX_CONCURRENT_HANDLERS,
    DEFAULT_WRITE_QUEUE_DEPTH,
};
pub use context::{Context, UnknownPacket};
pub use descriptor::Descriptor;
pub use error::{CallError, CallOrigin, RegisterError, RegistryError, RpcError, TransportError};
pub use module::{Module, Registrar};
pub use registry::Registry;
pub use server::Server;
pub use service::{Service, ServiceTable};

pub use daisy_proto::{codes, Message, MethodId, SessionId};

/// Which side of the connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcRole {
    Client,
    Server,
}

impl RpcRole {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcRole::Client => "client",
            RpcRole::Server => "server",
        }
    }
}
