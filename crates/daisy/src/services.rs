use std::sync::Arc;

use daisy_rpc::{codes, CallError, Context, Module, Registrar};
use tokio::sync::mpsc;
use tracing::info;

use crate::schema::{Echo, EchoResponse, Ping, PingResponse, Strobe, TEST_STROBE};

/// `debug.ping`: answers with the same string.
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

/// Server half of the `test` module.
pub struct Test;

impl Test {
    async fn echo(self: Arc<Self>, ctx: Context, req: Echo) -> Result<EchoResponse, CallError> {
        info!(req = %req.req, "echo");
        ctx.invoke(
            TEST_STROBE,
            &Strobe {
                msg: format!("recv:{}", req.req),
            },
        )
        .await
        .map_err(|err| CallError::new(codes::LOCAL, format!("invoke {TEST_STROBE}: {err}")))?;
        Ok(EchoResponse { resp: req.req })
    }
}

impl Module for Test {
    const NAME: &'static str = "Test";

    fn register(registrar: &mut Registrar<'_, Self>) {
        registrar.call("Echo", Self::echo);
    }
}

/// Client half of the `test` module: receives `test.strobe` and forwards the message.
pub struct StrobeListener {
    strobes: mpsc::UnboundedSender<String>,
}

impl StrobeListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (strobes, rx) = mpsc::unbounded_channel();
        (Self { strobes }, rx)
    }

    async fn strobe(self: Arc<Self>, _ctx: Context, req: Strobe) {
        info!(msg = %req.msg, "strobe");
        let _ = self.strobes.send(req.msg);
    }
}

impl Module for StrobeListener {
    const NAME: &'static str = "Test";

    fn register(registrar: &mut Registrar<'_, Self>) {
        registrar.invoke("Strobe", Self::strobe);
    }
}
