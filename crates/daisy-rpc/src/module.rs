use std::future::Future;
use std::sync::Arc;

use daisy_proto::Message;

use crate::service::Service;
use crate::{CallError, Context, Descriptor, RegisterError, Registry};

/// A group of handlers that registers under one module name.
///
/// ```ignore
/// struct Debug;
///
/// impl Debug {
///     async fn ping(self: Arc<Self>, _ctx: Context, req: Ping) -> Result<PingResponse, CallError> {
///         Ok(PingResponse { pong: req.ping })
///     }
/// }
///
/// impl Module for Debug {
///     const NAME: &'static str = "Debug";
///
///     fn register(registrar: &mut Registrar<'_, Self>) {
///         registrar.call("Ping", Self::ping);
///     }
/// }
/// ```
pub trait Module: Send + Sync + Sized + 'static {
    /// Matched against the first half of each descriptor's qualified name.
    const NAME: &'static str;

    fn register(registrar: &mut Registrar<'_, Self>);
}

/// Collects and validates a module's handlers against the registry.
///
/// The first failure is kept and every later declaration is ignored; the whole module is then
/// rejected.
pub struct Registrar<'r, M: Module> {
    registry: &'r Registry,
    receiver: Arc<M>,
    services: Vec<Service>,
    error: Option<RegisterError>,
}

impl<'r, M: Module> Registrar<'r, M> {
    pub(crate) fn new(registry: &'r Registry, receiver: Arc<M>) -> Self {
        Self {
            registry,
            receiver,
            services: Vec::new(),
            error: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Bind a request/reply handler to `M::NAME.method`.
    pub fn call<A, R, F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        A: Message,
        R: Message,
        F: Fn(Arc<M>, Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, CallError>> + Send + 'static,
    {
        let Some(descriptor) = self.lookup(method) else {
            return self;
        };
        let checked = match descriptor.reply_type() {
            None => Err(mismatch(
                &descriptor,
                "return",
                "handler returns a reply but the method declares none; bind it with `invoke`"
                    .to_string(),
            )),
            Some(_) if !descriptor.accepts_argument::<A>() => Err(argument_mismatch::<A>(&descriptor)),
            Some(expected) if !descriptor.returns_reply::<R>() => Err(mismatch(
                &descriptor,
                "reply",
                format!("expected {expected}, found {}", R::TYPE_NAME),
            )),
            Some(_) => Ok(()),
        };
        match checked {
            Ok(()) => self.services.push(Service::for_call(
                descriptor,
                self.receiver.clone(),
                handler,
            )),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Bind a fire-and-forget handler to `M::NAME.method`.
    pub fn invoke<A, F, Fut>(&mut self, method: &str, handler: F) -> &mut Self
    where
        A: Message,
        F: Fn(Arc<M>, Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(descriptor) = self.lookup(method) else {
            return self;
        };
        let checked = if let Some(reply) = descriptor.reply_type() {
            Err(mismatch(
                &descriptor,
                "reply",
                format!("method replies with {reply}; bind it with `call`"),
            ))
        } else if !descriptor.accepts_argument::<A>() {
            Err(argument_mismatch::<A>(&descriptor))
        } else {
            Ok(())
        };
        match checked {
            Ok(()) => self.services.push(Service::for_invoke(
                descriptor,
                self.receiver.clone(),
                handler,
            )),
            Err(err) => self.error = Some(err),
        }
        self
    }

    fn lookup(&mut self, method: &str) -> Option<Arc<Descriptor>> {
        if self.error.is_some() {
            return None;
        }
        let qualified_name = format!("{}.{method}", M::NAME);
        match self.registry.by_qualified_name(&qualified_name) {
            Some(descriptor) => Some(descriptor.clone()),
            None => {
                self.error = Some(RegisterError::UndefinedMethod { qualified_name });
                None
            }
        }
    }

    pub(crate) fn finish(self) -> Result<Vec<Service>, RegisterError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.services),
        }
    }
}

fn mismatch(descriptor: &Descriptor, position: &'static str, detail: String) -> RegisterError {
    RegisterError::SignatureMismatch {
        qualified_name: descriptor.qualified_name().to_string(),
        position,
        detail,
    }
}

fn argument_mismatch<A: Message>(descriptor: &Descriptor) -> RegisterError {
    mismatch(
        descriptor,
        "argument",
        format!(
            "expected {}, found {}",
            descriptor.argument_type(),
            A::TYPE_NAME
        ),
    )
}
