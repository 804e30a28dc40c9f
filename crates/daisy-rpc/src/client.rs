use std::sync::Arc;

use daisy_proto::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::info;

use crate::{
    Call, CallHandle, Context, Module, RegisterError, Registry, RpcConfig, RpcError, RpcRole,
    ServiceTable, TransportError,
};

/// Collects the modules a client serves to its peer, then connects.
pub struct ClientBuilder {
    registry: Registry,
    services: Arc<ServiceTable>,
    config: RpcConfig,
}

impl ClientBuilder {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            services: Arc::new(ServiceTable::new()),
            config: RpcConfig::default(),
        }
    }

    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind `module`'s handlers so the server can call them on this connection.
    pub fn register_module<M: Module>(&mut self, module: M) -> Result<&mut Self, RegisterError> {
        let added = self
            .services
            .register_module(&self.registry, Arc::new(module))?;
        info!(module = M::NAME, services = added, "registered module");
        Ok(self)
    }

    pub async fn connect<A: ToSocketAddrs>(self, addr: A) -> Result<Client, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        info!(peer = ?peer, "connected");
        Ok(self.start(stream, peer))
    }

    /// Run the client protocol over an existing stream. Must be called within a Tokio runtime.
    pub fn attach<S>(self, stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.start(stream, None)
    }

    fn start<S>(self, stream: S, peer: Option<std::net::SocketAddr>) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let context = Context::start(
            stream,
            RpcRole::Client,
            peer,
            self.registry.clone(),
            self.services.clone(),
            &self.config,
        );
        Client {
            context,
            registry: self.registry,
            services: self.services,
        }
    }
}

/// The connecting side of a connection. Operations forward to the underlying [`Context`].
pub struct Client {
    context: Context,
    registry: Registry,
    services: Arc<ServiceTable>,
}

impl Client {
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Bind more handlers on a live connection.
    pub fn register_module<M: Module>(&self, module: M) -> Result<(), RegisterError> {
        let added = self
            .services
            .register_module(&self.registry, Arc::new(module))?;
        info!(module = M::NAME, services = added, "registered module");
        Ok(())
    }

    pub async fn call<A: Message, R: Message>(
        &self,
        method: &str,
        argument: &A,
    ) -> Result<R, RpcError> {
        self.context.call(method, argument).await
    }

    pub async fn go_call<A: Message, R: Message>(
        &self,
        method: &str,
        argument: A,
        done: &mpsc::Sender<Call<A, R>>,
    ) -> Result<CallHandle, RpcError> {
        self.context.go_call(method, argument, done).await
    }

    pub async fn invoke<A: Message>(&self, method: &str, argument: &A) -> Result<(), RpcError> {
        self.context.invoke(method, argument).await
    }

    pub fn close(&self) {
        self.context.close();
    }

    pub fn is_closed(&self) -> bool {
        self.context.is_closed()
    }

    pub async fn closed(&self) {
        self.context.closed().await
    }
}
