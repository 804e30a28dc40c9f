use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use daisy_proto::{codes, decode_message, encode_message, Message, MessageError, MethodId};
use parking_lot::RwLock;

use crate::module::{Module, Registrar};
use crate::{CallError, Context, Descriptor, RegisterError, Registry};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What a handler produced, before it is turned into a response envelope.
pub(crate) enum HandlerOutcome {
    NoReply,
    Reply(Vec<u8>),
    Failed(CallError),
}

/// A decoded request bound to its handler, waiting for a connection context.
pub(crate) type PreparedHandler = Box<dyn FnOnce(Context) -> BoxFuture<HandlerOutcome> + Send>;

type Binder = Box<dyn Fn(&[u8]) -> Result<PreparedHandler, MessageError> + Send + Sync>;

/// A descriptor bound to a handler on a concrete module instance.
pub struct Service {
    descriptor: Arc<Descriptor>,
    module: &'static str,
    binder: Binder,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("method", &self.descriptor.qualified_name())
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// Decode a request payload into the handler's argument type.
    pub(crate) fn prepare(&self, payload: &[u8]) -> Result<PreparedHandler, MessageError> {
        (self.binder)(payload)
    }

    pub(crate) fn for_call<M, A, R, F, Fut>(
        descriptor: Arc<Descriptor>,
        receiver: Arc<M>,
        handler: F,
    ) -> Self
    where
        M: Module,
        A: Message,
        R: Message,
        F: Fn(Arc<M>, Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CallError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let binder: Binder = Box::new(move |payload: &[u8]| -> Result<PreparedHandler, MessageError> {
            let argument: A = decode_message(payload)?;
            let receiver = receiver.clone();
            let handler = handler.clone();
            let prepared: PreparedHandler = Box::new(move |ctx: Context| -> BoxFuture<HandlerOutcome> {
                Box::pin(async move {
                    match (*handler)(receiver, ctx, argument).await {
                        Ok(reply) => match encode_message(&reply) {
                            Ok(bytes) => HandlerOutcome::Reply(bytes),
                            Err(err) => HandlerOutcome::Failed(CallError::new(
                                codes::REPLY_ENCODING_FAILED,
                                err.to_string(),
                            )),
                        },
                        Err(err) => HandlerOutcome::Failed(err),
                    }
                })
            });
            Ok(prepared)
        });
        Self {
            descriptor,
            module: M::NAME,
            binder,
        }
    }

    pub(crate) fn for_invoke<M, A, F, Fut>(
        descriptor: Arc<Descriptor>,
        receiver: Arc<M>,
        handler: F,
    ) -> Self
    where
        M: Module,
        A: Message,
        F: Fn(Arc<M>, Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let binder: Binder = Box::new(move |payload: &[u8]| -> Result<PreparedHandler, MessageError> {
            let argument: A = decode_message(payload)?;
            let receiver = receiver.clone();
            let handler = handler.clone();
            let prepared: PreparedHandler = Box::new(move |ctx: Context| -> BoxFuture<HandlerOutcome> {
                Box::pin(async move {
                    (*handler)(receiver, ctx, argument).await;
                    HandlerOutcome::NoReply
                })
            });
            Ok(prepared)
        });
        Self {
            descriptor,
            module: M::NAME,
            binder,
        }
    }
}

/// Method id to service map, shared by every connection of a server (or by one client).
///
/// Reads happen on every inbound request; writes only when a module registers.
#[derive(Debug, Default)]
pub struct ServiceTable {
    services: RwLock<HashMap<MethodId, Arc<Service>>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind every handler `M` declares. Either all of them are added or none are.
    ///
    /// Returns the number of services added.
    pub fn register_module<M: Module>(
        &self,
        registry: &Registry,
        receiver: Arc<M>,
    ) -> Result<usize, RegisterError> {
        let mut registrar = Registrar::new(registry, receiver);
        M::register(&mut registrar);
        let services = registrar.finish()?;

        let mut table = self.services.write();
        let mut batch = HashMap::with_capacity(services.len());
        for service in services {
            let id = service.descriptor().id();
            if table.contains_key(&id) || batch.contains_key(&id) {
                return Err(RegisterError::DuplicateService {
                    qualified_name: service.descriptor().qualified_name().to_string(),
                    id,
                });
            }
            batch.insert(id, Arc::new(service));
        }

        let added = batch.len();
        for (id, service) in batch {
            tracing::debug!(
                method = service.descriptor().qualified_name(),
                id,
                "registered service"
            );
            table.insert(id, service);
        }
        Ok(added)
    }

    pub fn get(&self, id: MethodId) -> Option<Arc<Service>> {
        self.services.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
