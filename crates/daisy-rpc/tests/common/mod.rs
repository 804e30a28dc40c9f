#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use daisy_rpc::{
    CallError, Client, Context, Message, Module, Registrar, Registry, RpcConfig, Server,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};

pub const SCHEMA: &str = r#"
# shared by every integration test
debug {
    ping = 1
}
test {
    echo = 2
    strobe:[] = 3
    big = 4
    slow = 5
    fail = 6
    boom = 7
}
"#;

pub fn registry() -> Registry {
    Registry::from_protolist(SCHEMA).unwrap()
}

macro_rules! message {
    ($name:ident, $type_name:literal { $($field:ident: $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $(pub $field: $ty,)*
        }

        impl Message for $name {
            const TYPE_NAME: &'static str = $type_name;
        }
    };
}

message!(Ping, "proto.debug.Ping" { ping: String });
message!(PingResponse, "proto.debug.Ping.Response" { pong: String });
message!(Echo, "proto.test.Echo" { msg: String });
message!(EchoResponse, "proto.test.Echo.Response" { msg: String });
message!(Strobe, "proto.test.Strobe" { msg: String });
message!(Big, "proto.test.Big" { len: u32 });
message!(BigResponse, "proto.test.Big.Response" { data: Vec<u8> });
message!(Slow, "proto.test.Slow" { tag: u32 });
message!(SlowResponse, "proto.test.Slow.Response" { tag: u32 });
message!(Fail, "proto.test.Fail" { code: i32 });
message!(FailResponse, "proto.test.Fail.Response" { unused: bool });
message!(Boom, "proto.test.Boom" { unused: bool });
message!(BoomResponse, "proto.test.Boom.Response" { unused: bool });

pub struct Debug;

impl Debug {
    async fn ping(self: Arc<Self>, _ctx: Context, req: Ping) -> Result<PingResponse, CallError> {
        Ok(PingResponse { pong: req.ping })
    }
}

impl Module for Debug {
    const NAME: &'static str = "Debug";

    fn register(registrar: &mut Registrar<'_, Self>) {
        registrar.call("Ping", Self::ping);
    }
}

/// Server-side test module. `slow` parks until the test adds a permit to `release`.
pub struct Test {
    pub release: Arc<Semaphore>,
}

impl Test {
    async fn echo(self: Arc<Self>, ctx: Context, req: Echo) -> Result<EchoResponse, CallError> {
        ctx.invoke(
            "test.strobe",
            &Strobe {
                msg: format!("recv:{}", req.msg),
            },
        )
        .await
        .map_err(|err| CallError::new(1, err.to_string()))?;
        Ok(EchoResponse { msg: req.msg })
    }

    async fn big(self: Arc<Self>, _ctx: Context, req: Big) -> Result<BigResponse, CallError> {
        Ok(BigResponse {
            data: vec![0xab; req.len as usize],
        })
    }

    async fn slow(self: Arc<Self>, _ctx: Context, req: Slow) -> Result<SlowResponse, CallError> {
        let permit = self
            .release
            .acquire()
            .await
            .map_err(|err| CallError::new(1, err.to_string()))?;
        permit.forget();
        Ok(SlowResponse { tag: req.tag })
    }

    async fn fail(self: Arc<Self>, _ctx: Context, req: Fail) -> Result<FailResponse, CallError> {
        Err(CallError::new(req.code, "requested failure"))
    }

    async fn boom(self: Arc<Self>, _ctx: Context, _req: Boom) -> Result<BoomResponse, CallError> {
        panic!("boom handler panicked on purpose");
    }
}

impl Module for Test {
    const NAME: &'static str = "Test";

    fn register(registrar: &mut Registrar<'_, Self>) {
        registrar
            .call("Echo", Self::echo)
            .call("Big", Self::big)
            .call("Slow", Self::slow)
            .call("Fail", Self::fail)
            .call("Boom", Self::boom);
    }
}

/// Client-side receiver for the server's `test.strobe` invocations.
pub struct Listener {
    pub strobes: mpsc::UnboundedSender<String>,
}

impl Listener {
    async fn strobe(self: Arc<Self>, _ctx: Context, req: Strobe) {
        let _ = self.strobes.send(req.msg);
    }
}

impl Module for Listener {
    const NAME: &'static str = "Test";

    fn register(registrar: &mut Registrar<'_, Self>) {
        registrar.invoke("Strobe", Self::strobe);
    }
}

pub fn server(config: RpcConfig) -> (Server, Arc<Semaphore>) {
    let server = registry().server(config);
    let release = Arc::new(Semaphore::new(0));
    server.register_module(Debug).unwrap();
    server
        .register_module(Test {
            release: release.clone(),
        })
        .unwrap();
    (server, release)
}

/// Route connection logs through the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Bind an ephemeral port and serve in the background.
pub async fn spawn_server(config: RpcConfig) -> (SocketAddr, Arc<Semaphore>) {
    init_tracing();
    let (server, release) = server(config);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.serve(listener).await });
    (addr, release)
}

pub async fn connect(addr: SocketAddr) -> (Client, mpsc::UnboundedReceiver<String>) {
    let (strobes, rx) = mpsc::unbounded_channel();
    let mut builder = registry().client();
    builder.register_module(Listener { strobes }).unwrap();
    let client = builder.connect(addr).await.unwrap();
    (client, rx)
}
