use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use daisy_proto::{
    codes, encode_message, Envelope, Message, MessageError, MethodId, ResponseOutcome, SessionId,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, AcquireError, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn, Instrument};

use crate::call::{Completion, PendingCall, SessionTable};
use crate::service::{HandlerOutcome, ServiceTable};
use crate::{
    codec, Call, CallError, CallHandle, Descriptor, OverloadPolicy, Registry, RpcConfig, RpcError,
    RpcRole, TransportError, UnknownPacketPolicy,
};

/// A packet the connection could not route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownPacket {
    /// A response whose session matches no outstanding call.
    UnsolicitedResponse { session: SessionId },
    /// A request for a method this side never registered.
    UnknownMethod { method: MethodId, session: SessionId },
    /// A request whose payload does not decode as the handler's argument type.
    UndecodableArgument {
        method: MethodId,
        session: SessionId,
        message: String,
    },
}

impl fmt::Display for UnknownPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownPacket::UnsolicitedResponse { session } => {
                write!(f, "response for unknown session {session}")
            }
            UnknownPacket::UnknownMethod { method, session } => {
                write!(f, "request for unknown method {method} (session {session})")
            }
            UnknownPacket::UndecodableArgument {
                method,
                session,
                message,
            } => write!(
                f,
                "undecodable argument for method {method} (session {session}): {message}"
            ),
        }
    }
}

/// One live connection. Both sides of the protocol use the same type: every context can issue
/// calls to its peer and serve the peer's calls.
///
/// Clones share the connection. Handlers receive a clone so they can call back into the peer.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    role: RpcRole,
    peer: Option<SocketAddr>,
    registry: Registry,
    services: Arc<ServiceTable>,
    unknown_packet_policy: UnknownPacketPolicy,
    overload_policy: OverloadPolicy,
    handler_slots: Option<Arc<Semaphore>>,
    sessions: SessionTable,
    tx: mpsc::Sender<Bytes>,
    shutdown_tx: watch::Sender<bool>,
    closed: Mutex<Option<TransportError>>,
    span: tracing::Span,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("role", &self.inner.role)
            .field("peer", &self.inner.peer)
            .field("closed", &self.close_reason())
            .finish_non_exhaustive()
    }
}

enum HandlerSlot {
    Unbounded,
    Held(OwnedSemaphorePermit),
    Queued(Arc<Semaphore>),
}

impl HandlerSlot {
    async fn wait(self) -> Result<Option<OwnedSemaphorePermit>, AcquireError> {
        match self {
            HandlerSlot::Unbounded => Ok(None),
            HandlerSlot::Held(permit) => Ok(Some(permit)),
            HandlerSlot::Queued(slots) => slots.acquire_owned().await.map(Some),
        }
    }
}

impl Context {
    /// Spawn the read and write loops for `stream`. Must be called within a Tokio runtime.
    pub(crate) fn start<S>(
        stream: S,
        role: RpcRole,
        peer: Option<SocketAddr>,
        registry: Registry,
        services: Arc<ServiceTable>,
        config: &RpcConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel::<Bytes>(config.write_queue_depth.max(1));
        let handler_slots = (config.max_concurrent_handlers > 0).then(|| {
            Arc::new(Semaphore::new(
                config.max_concurrent_handlers.min(Semaphore::MAX_PERMITS),
            ))
        });
        let span = tracing::info_span!(
            "daisy.connection",
            role = role.as_str(),
            peer = %DisplayPeer(peer),
        );

        let ctx = Context {
            inner: Arc::new(Inner {
                role,
                peer,
                registry,
                services,
                unknown_packet_policy: config.unknown_packet_policy_for(role),
                overload_policy: config.overload_policy,
                handler_slots,
                sessions: SessionTable::new(),
                tx,
                shutdown_tx,
                closed: Mutex::new(None),
                span: span.clone(),
            }),
        };

        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(
            run_reader(read_half, ctx.clone(), shutdown_rx.clone()).instrument(span.clone()),
        );
        tokio::spawn(run_writer(write_half, ctx.clone(), shutdown_rx, rx).instrument(span));
        ctx
    }

    pub fn role(&self) -> RpcRole {
        self.inner.role
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Call `method` and wait for its reply.
    pub async fn call<A: Message, R: Message>(
        &self,
        method: &str,
        argument: &A,
    ) -> Result<R, RpcError> {
        let descriptor = self.resolve(method)?;
        descriptor.check_call::<A, R>()?;
        let payload = encode_argument(argument)?;

        let (tx, rx) = oneshot::channel();
        let pending = PendingCall::new(descriptor.clone(), move |_, completion: Completion| {
            let _ = tx.send(completion.into_reply::<R>());
        });
        let session = self.issue(&descriptor, payload, pending).await?;
        debug!(method, session, "call issued");

        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::ConnectionClosed.into()),
        }
    }

    /// Issue `method` without waiting. The finished [`Call`] is sent on `done`.
    ///
    /// A slot on `done` is reserved up front, so the completion can always be delivered; if the
    /// channel is full or closed the call is refused before anything is sent.
    pub async fn go_call<A: Message, R: Message>(
        &self,
        method: &str,
        argument: A,
        done: &mpsc::Sender<Call<A, R>>,
    ) -> Result<CallHandle, RpcError> {
        let descriptor = self.resolve(method)?;
        descriptor.check_call::<A, R>()?;
        let payload = encode_argument(&argument)?;

        let permit = done.clone().try_reserve_owned().map_err(|_| {
            RpcError::CompletionChannelUnavailable {
                method: method.to_string(),
            }
        })?;
        let call_descriptor = descriptor.clone();
        let pending = PendingCall::new(descriptor.clone(), move |session, completion: Completion| {
            permit.send(Call {
                descriptor: call_descriptor,
                session,
                argument,
                result: completion.into_reply::<R>(),
            });
        });
        let session = self.issue(&descriptor, payload, pending).await?;
        debug!(method, session, "call issued");
        Ok(CallHandle::new(descriptor, session))
    }

    /// Fire-and-forget: send `method` with session `0` and return once it is queued.
    pub async fn invoke<A: Message>(&self, method: &str, argument: &A) -> Result<(), RpcError> {
        let descriptor = self.resolve(method)?;
        descriptor.check_invoke::<A>()?;
        let payload = encode_argument(argument)?;
        self.send(&Envelope::Request {
            method: descriptor.id(),
            session: 0,
            payload,
        })
        .await?;
        Ok(())
    }

    /// Close the connection. Idempotent; outstanding calls fail with a local error.
    pub fn close(&self) {
        self.close_with(TransportError::ConnectionClosed);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.lock().is_some()
    }

    /// Why the connection closed, if it has.
    pub fn close_reason(&self) -> Option<TransportError> {
        self.inner.closed.lock().clone()
    }

    /// Resolve once the connection has closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.shutdown_tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub(crate) fn close_with(&self, err: TransportError) {
        {
            let mut closed = self.inner.closed.lock();
            if closed.is_some() {
                return;
            }
            *closed = Some(err.clone());
        }

        let _enter = self.inner.span.enter();
        let pending = self.inner.sessions.drain();
        info!(pending = pending.len(), reason = %err, "connection closed");
        let message = format!("connection down: {err}");
        for (session, call) in pending {
            call.complete(
                session,
                Completion::Failed(CallError::new(codes::LOCAL, message.clone())),
            );
        }

        self.inner.shutdown_tx.send_replace(true);
    }

    fn resolve(&self, method: &str) -> Result<Arc<Descriptor>, RpcError> {
        self.inner
            .registry
            .by_call_name(method)
            .cloned()
            .ok_or_else(|| RpcError::UnknownMethod {
                method: method.to_string(),
            })
    }

    /// Register `pending`, then queue its request. Nothing stays registered if queuing fails.
    ///
    /// If teardown drained the call while its request was waiting for the writer, the call has
    /// already been completed with the teardown error, so the session is returned as issued.
    async fn issue(
        &self,
        descriptor: &Descriptor,
        payload: Vec<u8>,
        pending: PendingCall,
    ) -> Result<SessionId, TransportError> {
        let session = self
            .inner
            .sessions
            .register(pending)
            .map_err(|_| TransportError::ConnectionClosed)?;
        let request = Envelope::Request {
            method: descriptor.id(),
            session,
            payload,
        };
        if let Err(err) = self.send(&request).await {
            if self.inner.sessions.take(session).is_some() {
                return Err(err);
            }
            debug!(session, "call completed by teardown before its request was queued");
        }
        Ok(session)
    }

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let frame = codec::encode(envelope)?;
        tokio::select! {
            sent = self.inner.tx.send(frame) => sent.map_err(|_| TransportError::ConnectionClosed),
            _ = self.closed() => Err(TransportError::ConnectionClosed),
        }
    }

    fn dispatch_response(
        &self,
        session: SessionId,
        outcome: ResponseOutcome,
    ) -> Result<(), UnknownPacket> {
        let Some(pending) = self.inner.sessions.take(session) else {
            return Err(UnknownPacket::UnsolicitedResponse { session });
        };
        debug!(method = pending.descriptor().call_name(), session, "response");
        let completion = match outcome {
            ResponseOutcome::Reply(data) => Completion::Reply(data),
            ResponseOutcome::Failed { code, message } => {
                Completion::Failed(CallError::remote(code, message))
            }
        };
        pending.complete(session, completion);
        Ok(())
    }

    fn dispatch_request(
        &self,
        method: MethodId,
        session: SessionId,
        payload: Vec<u8>,
    ) -> Result<(), UnknownPacket> {
        let service = self
            .inner
            .services
            .get(method)
            .ok_or(UnknownPacket::UnknownMethod { method, session })?;
        let descriptor = service.descriptor().clone();
        let handler = service
            .prepare(&payload)
            .map_err(|err| UnknownPacket::UndecodableArgument {
                method,
                session,
                message: err.to_string(),
            })?;

        let Some(slot) = self.reserve_handler_slot() else {
            warn!(
                method = descriptor.call_name(),
                session, "handler limit reached; rejecting request"
            );
            let ctx = self.clone();
            tokio::spawn(
                async move {
                    let outcome = HandlerOutcome::Failed(CallError::new(
                        codes::OVERLOADED,
                        "too many concurrent requests",
                    ));
                    ctx.respond(&descriptor, session, outcome).await;
                }
                .instrument(self.inner.span.clone()),
            );
            return Ok(());
        };

        debug!(method = descriptor.call_name(), session, "request");
        let ctx = self.clone();
        tokio::spawn(
            async move {
                let Ok(_permit) = slot.wait().await else {
                    return;
                };
                if ctx.is_closed() {
                    return;
                }
                // Run the handler as its own task so a panic becomes an error reply.
                let outcome = match tokio::spawn(handler(ctx.clone()).in_current_span()).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        warn!(method = descriptor.call_name(), session, error = %err, "handler failed");
                        HandlerOutcome::Failed(CallError::new(
                            codes::HANDLER_FAILED,
                            format!("handler for {} failed", descriptor.call_name()),
                        ))
                    }
                };
                ctx.respond(&descriptor, session, outcome).await;
            }
            .instrument(self.inner.span.clone()),
        );
        Ok(())
    }

    fn reserve_handler_slot(&self) -> Option<HandlerSlot> {
        let Some(slots) = &self.inner.handler_slots else {
            return Some(HandlerSlot::Unbounded);
        };
        match slots.clone().try_acquire_owned() {
            Ok(permit) => Some(HandlerSlot::Held(permit)),
            Err(_) => match self.inner.overload_policy {
                OverloadPolicy::Queue => Some(HandlerSlot::Queued(slots.clone())),
                OverloadPolicy::Reject => None,
            },
        }
    }

    async fn respond(&self, descriptor: &Descriptor, session: SessionId, outcome: HandlerOutcome) {
        if !descriptor.has_reply() {
            return;
        }
        let outcome = match outcome {
            HandlerOutcome::NoReply => return,
            HandlerOutcome::Reply(data) => ResponseOutcome::Reply(data),
            HandlerOutcome::Failed(err) => ResponseOutcome::Failed {
                code: err.code,
                message: err.message,
            },
        };
        if session == 0 {
            debug!(
                method = descriptor.call_name(),
                "discarding reply to a request sent without a session"
            );
            return;
        }

        let result = match self.send(&Envelope::Response { session, outcome }).await {
            Err(TransportError::FrameTooLarge { len, max }) => {
                warn!(
                    method = descriptor.call_name(),
                    session, len, max, "reply exceeds frame limit; answering with an error"
                );
                let fallback = Envelope::Response {
                    session,
                    outcome: ResponseOutcome::Failed {
                        code: codes::REPLY_ENCODING_FAILED,
                        message: format!("reply frame too large: {len} > {max}"),
                    },
                };
                self.send(&fallback).await
            }
            other => other,
        };
        match result {
            Ok(()) => {}
            Err(TransportError::ConnectionClosed) => {
                debug!(session, "connection closed before reply was sent");
            }
            Err(err) => warn!(session, error = %err, "failed to send reply"),
        }
    }
}

fn encode_argument<A: Message>(argument: &A) -> Result<Vec<u8>, TransportError> {
    encode_message(argument).map_err(|err| match err {
        MessageError::TooLarge { len, max, .. } => TransportError::FrameTooLarge {
            len: usize::try_from(len).unwrap_or(usize::MAX),
            max,
        },
        other => TransportError::Encode {
            message: other.to_string(),
        },
    })
}

struct DisplayPeer(Option<SocketAddr>);

impl fmt::Display for DisplayPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr}"),
            None => f.write_str("-"),
        }
    }
}

async fn run_writer<W: AsyncWrite + Unpin>(
    mut w: W,
    ctx: Context,
    mut shutdown_rx: watch::Receiver<bool>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    if let Err(err) = codec::write_loop(&mut w, &mut rx, &mut shutdown_rx).await {
        warn!(error = %err, "write failed; closing connection");
        ctx.close_with(err);
    }
    let _ = w.shutdown().await;
}

async fn run_reader<R: AsyncRead + Unpin>(
    mut r: R,
    ctx: Context,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let read = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            read = codec::read_envelope(&mut r) => read,
        };

        let envelope = match read {
            Ok(envelope) => envelope,
            Err(err) => {
                if ctx.is_closed() {
                    break;
                }
                match &err {
                    TransportError::Io { message } if message == codec::PEER_CLOSED => {
                        info!("peer closed connection");
                    }
                    _ => warn!(error = %err, "read failed; closing connection"),
                }
                ctx.close_with(err);
                break;
            }
        };

        let dispatched = match envelope {
            Envelope::Request {
                method,
                session,
                payload,
            } => ctx.dispatch_request(method, session, payload),
            Envelope::Response { session, outcome } => ctx.dispatch_response(session, outcome),
        };

        if let Err(packet) = dispatched {
            match ctx.inner.unknown_packet_policy {
                UnknownPacketPolicy::Continue => warn!(%packet, "ignoring unknown packet"),
                UnknownPacketPolicy::Stop => {
                    warn!(%packet, "unknown packet; closing connection");
                    ctx.close_with(TransportError::Protocol {
                        message: format!("unknown packet: {packet}"),
                    });
                    break;
                }
            }
        }
    }
}
