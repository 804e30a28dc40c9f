use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{Context, Module, RegisterError, Registry, RpcConfig, RpcRole, ServiceTable, TransportError};

/// Pause after a transient accept failure (for example file descriptor exhaustion).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Accepts connections and serves the registered modules on each of them.
///
/// Every accepted connection gets its own [`Context`] sharing this server's service table.
#[derive(Clone)]
pub struct Server {
    registry: Registry,
    services: Arc<ServiceTable>,
    config: RpcConfig,
}

impl Server {
    pub fn new(registry: Registry, config: RpcConfig) -> Self {
        Self {
            registry,
            services: Arc::new(ServiceTable::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    /// Bind `module`'s handlers. Connections accepted afterwards (and already running ones)
    /// see the new services.
    pub fn register_module<M: Module>(&self, module: M) -> Result<(), RegisterError> {
        let added = self
            .services
            .register_module(&self.registry, Arc::new(module))?;
        info!(module = M::NAME, services = added, "registered module");
        Ok(())
    }

    /// Serve a single already-established stream.
    pub fn serve_stream<S>(&self, stream: S, peer: Option<SocketAddr>) -> Context
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Context::start(
            stream,
            RpcRole::Server,
            peer,
            self.registry.clone(),
            self.services.clone(),
            &self.config,
        )
    }

    /// Accept connections until a non-transient accept error occurs.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves. Connections already accepted keep running.
    pub async fn serve_with_shutdown<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "accepting connections");
        }
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("stopped accepting connections");
                    return Ok(());
                }
                res = listener.accept() => match res {
                    Ok((stream, peer)) => {
                        if let Err(err) = stream.set_nodelay(true) {
                            warn!(%peer, error = %err, "failed to set TCP_NODELAY");
                        }
                        info!(%peer, "accepted connection");
                        self.serve_stream(stream, Some(peer));
                    }
                    Err(err) if is_transient_accept_error(&err) => {
                        warn!(error = %err, "accept failed; retrying");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed; stopping");
                        return Err(err.into());
                    }
                },
            }
        }
    }
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    // EMFILE / ENFILE share these values on Linux and macOS.
    const ENFILE: i32 = 23;
    const EMFILE: i32 = 24;

    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || (cfg!(unix) && matches!(err.raw_os_error(), Some(ENFILE | EMFILE)))
}
