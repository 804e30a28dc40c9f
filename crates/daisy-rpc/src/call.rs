use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use daisy_proto::{codes, decode_message, Message, SessionId};
use parking_lot::Mutex;

use crate::{CallError, Descriptor};

/// A finished `go_call`, delivered on the caller's completion channel.
#[derive(Debug)]
pub struct Call<A, R> {
    pub descriptor: Arc<Descriptor>,
    pub session: SessionId,
    pub argument: A,
    pub result: Result<R, CallError>,
}

impl<A, R> Call<A, R> {
    pub fn error(&self) -> Option<&CallError> {
        self.result.as_ref().err()
    }

    pub fn into_reply(self) -> Result<R, CallError> {
        self.result
    }
}

/// Identifies an in-flight `go_call`; its completion arrives as a [`Call`].
#[derive(Debug, Clone)]
pub struct CallHandle {
    descriptor: Arc<Descriptor>,
    session: SessionId,
}

impl CallHandle {
    pub(crate) fn new(descriptor: Arc<Descriptor>, session: SessionId) -> Self {
        Self {
            descriptor,
            session,
        }
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

pub(crate) enum Completion {
    Reply(Vec<u8>),
    Failed(CallError),
}

impl Completion {
    pub(crate) fn into_reply<R: Message>(self) -> Result<R, CallError> {
        match self {
            Completion::Reply(bytes) => decode_message(&bytes)
                .map_err(|err| CallError::new(codes::LOCAL, err.to_string())),
            Completion::Failed(err) => Err(err),
        }
    }
}

type Completer = Box<dyn FnOnce(SessionId, Completion) + Send>;

/// An outstanding call as seen by the session table. Consuming `complete` is the only way to
/// resolve it, which makes double completion unrepresentable.
pub(crate) struct PendingCall {
    descriptor: Arc<Descriptor>,
    completer: Completer,
}

impl PendingCall {
    pub(crate) fn new(
        descriptor: Arc<Descriptor>,
        completer: impl FnOnce(SessionId, Completion) + Send + 'static,
    ) -> Self {
        Self {
            descriptor,
            completer: Box::new(completer),
        }
    }

    pub(crate) fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub(crate) fn complete(self, session: SessionId, completion: Completion) {
        (self.completer)(session, completion)
    }
}

/// Outstanding calls keyed by session id. `None` once the connection is closed.
pub(crate) struct SessionTable {
    next: AtomicI32,
    calls: Mutex<Option<HashMap<SessionId, PendingCall>>>,
}

impl SessionTable {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicI32::new(1),
            calls: Mutex::new(Some(HashMap::new())),
        }
    }

    fn next_candidate(&self) -> SessionId {
        // Wraps back to 1: session 0 means "no reply expected" and negatives are never issued.
        match self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current >= SessionId::MAX { 1 } else { current + 1 })
            }) {
            Ok(prev) | Err(prev) => prev,
        }
    }

    /// Store `call` under a fresh session id. Hands the call back if the table is closed.
    pub(crate) fn register(&self, call: PendingCall) -> Result<SessionId, PendingCall> {
        let mut guard = self.calls.lock();
        let Some(calls) = guard.as_mut() else {
            return Err(call);
        };
        loop {
            let session = self.next_candidate();
            if !calls.contains_key(&session) {
                calls.insert(session, call);
                return Ok(session);
            }
        }
    }

    pub(crate) fn take(&self, session: SessionId) -> Option<PendingCall> {
        self.calls.lock().as_mut()?.remove(&session)
    }

    /// Close the table and hand back everything still outstanding. Later calls return nothing.
    pub(crate) fn drain(&self) -> Vec<(SessionId, PendingCall)> {
        match self.calls.lock().take() {
            Some(calls) => calls.into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().as_ref().map_or(0, HashMap::len)
    }
}
