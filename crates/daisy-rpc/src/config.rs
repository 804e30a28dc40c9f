use serde::{Deserialize, Serialize};

use crate::RpcRole;

pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 256;

/// What to do with a request that arrives while every handler slot is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverloadPolicy {
    /// Park the request until a slot frees up. Reading continues meanwhile.
    #[default]
    Queue,
    /// Answer immediately with [`daisy_proto::codes::OVERLOADED`] (or drop a fire-and-forget
    /// request).
    Reject,
}

/// Reaction to a packet the connection cannot route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPacketPolicy {
    Continue,
    Stop,
}

impl UnknownPacketPolicy {
    /// Servers stop serving a misbehaving peer; clients keep going.
    pub fn default_for(role: RpcRole) -> Self {
        match role {
            RpcRole::Server => UnknownPacketPolicy::Stop,
            RpcRole::Client => UnknownPacketPolicy::Continue,
        }
    }
}

/// Per-connection runtime knobs shared by servers and clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RpcConfig {
    /// Upper bound on concurrently running handlers per connection. `0` means unbounded.
    pub max_concurrent_handlers: usize,
    pub overload_policy: OverloadPolicy,
    /// `None` picks the role default (see [`UnknownPacketPolicy::default_for`]).
    pub unknown_packet_policy: Option<UnknownPacketPolicy>,
    /// Frames buffered for the writer task before senders wait.
    pub write_queue_depth: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            overload_policy: OverloadPolicy::default(),
            unknown_packet_policy: None,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
        }
    }
}

impl RpcConfig {
    pub fn unknown_packet_policy_for(&self, role: RpcRole) -> UnknownPacketPolicy {
        self.unknown_packet_policy
            .unwrap_or_else(|| UnknownPacketPolicy::default_for(role))
    }
}
