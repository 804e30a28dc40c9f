//! The demo schema and its message types.

use daisy_rpc::{Message, Registry, RegistryError};
use serde::{Deserialize, Serialize};

pub const PROTOLIST: &str = r#"
debug {
    ping = 1
}

test {
    echo = 2
    strobe:[] = 3       # server -> client notification
}
"#;

pub const DEBUG_PING: &str = "debug.ping";
pub const TEST_ECHO: &str = "test.echo";
pub const TEST_STROBE: &str = "test.strobe";

pub fn registry() -> Result<Registry, RegistryError> {
    Registry::from_protolist(PROTOLIST)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub ping: String,
}

impl Message for Ping {
    const TYPE_NAME: &'static str = "proto.debug.Ping";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub pong: String,
}

impl Message for PingResponse {
    const TYPE_NAME: &'static str = "proto.debug.Ping.Response";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub req: String,
}

impl Message for Echo {
    const TYPE_NAME: &'static str = "proto.test.Echo";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoResponse {
    pub resp: String,
}

impl Message for EchoResponse {
    const TYPE_NAME: &'static str = "proto.test.Echo.Response";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strobe {
    pub msg: String,
}

impl Message for Strobe {
    const TYPE_NAME: &'static str = "proto.test.Strobe";
}
