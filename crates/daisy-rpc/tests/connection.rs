mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::*;
use daisy_proto::{encode_message, Envelope, ResponseOutcome, MAX_FRAME_BYTES};
use daisy_rpc::{codec, codes, CallOrigin, OverloadPolicy, RpcConfig, RpcError, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn ping_round_trips() {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, _strobes) = connect(addr).await;

    let reply: PingResponse = timeout(
        WAIT,
        client.call(
            "debug.ping",
            &Ping {
                ping: "hello".into(),
            },
        ),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply.pong, "hello");
    assert_eq!(client.context().pending_calls(), 0);

    client.close();
}

#[tokio::test]
async fn server_calls_back_into_client_while_serving_a_request() {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, mut strobes) = connect(addr).await;

    let reply: EchoResponse = timeout(
        WAIT,
        client.call("test.echo", &Echo { msg: "hi".into() }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply.msg, "hi");

    let strobe = timeout(WAIT, strobes.recv()).await.unwrap().unwrap();
    assert_eq!(strobe, "recv:hi");

    client.close();
}

/// Send `bogus` to a fresh server connection and expect the server to hang up.
async fn assert_server_hangs_up_on(bogus: Envelope) {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&codec::encode(&bogus).unwrap()).await.unwrap();

    let mut buf = [0u8; 16];
    let read = timeout(WAIT, raw.read(&mut buf)).await.unwrap();
    match read {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("expected the server to close the connection, got {n} bytes"),
    }
}

#[tokio::test]
async fn server_stops_serving_after_unsolicited_response() {
    assert_server_hangs_up_on(Envelope::Response {
        session: 42,
        outcome: ResponseOutcome::Reply(Vec::new()),
    })
    .await;
}

#[tokio::test]
async fn server_stops_serving_after_request_for_unknown_method() {
    assert_server_hangs_up_on(Envelope::Request {
        method: 99,
        session: 7,
        payload: Vec::new(),
    })
    .await;
}

#[tokio::test]
async fn server_stops_serving_after_undecodable_argument() {
    assert_server_hangs_up_on(Envelope::Request {
        method: 1,
        session: 7,
        payload: vec![0xff; 3],
    })
    .await;
}

#[tokio::test]
async fn client_ignores_unknown_and_undecodable_requests() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake_server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let unknown = Envelope::Request {
            method: 99,
            session: 5,
            payload: Vec::new(),
        };
        let undecodable = Envelope::Request {
            method: 3,
            session: 0,
            payload: vec![0xff; 3],
        };
        for bogus in [unknown, undecodable] {
            stream
                .write_all(&codec::encode(&bogus).unwrap())
                .await
                .unwrap();
        }

        let request = codec::read_envelope(&mut stream).await.unwrap();
        let Envelope::Request { session, .. } = request else {
            panic!("expected a request, got {request:?}");
        };
        let reply = encode_message(&PingResponse {
            pong: "pong".into(),
        })
        .unwrap();
        let response = Envelope::Response {
            session,
            outcome: ResponseOutcome::Reply(reply),
        };
        stream
            .write_all(&codec::encode(&response).unwrap())
            .await
            .unwrap();
        stream
    });

    let (client, mut strobes) = connect(addr).await;
    let reply: PingResponse = timeout(
        WAIT,
        client.call("debug.ping", &Ping { ping: "?".into() }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply.pong, "pong");
    assert!(!client.is_closed());
    assert!(strobes.try_recv().is_err());

    let _stream = fake_server.await.unwrap();
    client.close();
}

#[tokio::test]
async fn client_keeps_serving_after_unsolicited_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake_server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let bogus = Envelope::Response {
            session: 42,
            outcome: ResponseOutcome::Reply(Vec::new()),
        };
        stream
            .write_all(&codec::encode(&bogus).unwrap())
            .await
            .unwrap();

        let request = codec::read_envelope(&mut stream).await.unwrap();
        let Envelope::Request {
            method, session, ..
        } = request
        else {
            panic!("expected a request, got {request:?}");
        };
        assert_eq!(method, 1);
        let reply = encode_message(&PingResponse {
            pong: "still here".into(),
        })
        .unwrap();
        let response = Envelope::Response {
            session,
            outcome: ResponseOutcome::Reply(reply),
        };
        stream
            .write_all(&codec::encode(&response).unwrap())
            .await
            .unwrap();
        stream
    });

    let (client, _strobes) = connect(addr).await;
    let reply: PingResponse = timeout(
        WAIT,
        client.call("debug.ping", &Ping { ping: "?".into() }),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(reply.pong, "still here");
    assert!(!client.is_closed());

    let _stream = fake_server.await.unwrap();
    client.close();
}

#[tokio::test]
async fn responses_may_arrive_out_of_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake_server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut requests = Vec::new();
        for _ in 0..2 {
            match codec::read_envelope(&mut stream).await.unwrap() {
                Envelope::Request {
                    session, payload, ..
                } => requests.push((session, payload)),
                other => panic!("expected a request, got {other:?}"),
            }
        }
        for (session, payload) in requests.into_iter().rev() {
            let ping: Ping = daisy_proto::decode_message(&payload).unwrap();
            let reply = encode_message(&PingResponse { pong: ping.ping }).unwrap();
            let response = Envelope::Response {
                session,
                outcome: ResponseOutcome::Reply(reply),
            };
            stream
                .write_all(&codec::encode(&response).unwrap())
                .await
                .unwrap();
        }
        stream
    });

    let (client, _strobes) = connect(addr).await;
    let ping_one = Ping { ping: "one".into() };
    let ping_two = Ping { ping: "two".into() };
    let (first, second) = tokio::join!(
        client.call::<_, PingResponse>("debug.ping", &ping_one),
        client.call::<_, PingResponse>("debug.ping", &ping_two),
    );
    assert_eq!(first.unwrap().pong, "one");
    assert_eq!(second.unwrap().pong, "two");

    let _stream = fake_server.await.unwrap();
    client.close();
}

#[tokio::test]
async fn concurrent_calls_get_unique_sessions_and_matching_replies() {
    const CALLS: usize = 200;

    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, _strobes) = connect(addr).await;
    let (done_tx, mut done_rx) = mpsc::channel(CALLS);

    let mut sessions = HashSet::new();
    for i in 0..CALLS {
        let handle = client
            .go_call::<Ping, PingResponse>(
                "debug.ping",
                Ping {
                    ping: i.to_string(),
                },
                &done_tx,
            )
            .await
            .unwrap();
        assert!(handle.session() > 0);
        assert!(sessions.insert(handle.session()));
    }

    let mut completed = HashSet::new();
    for _ in 0..CALLS {
        let call = timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
        assert!(sessions.contains(&call.session));
        assert!(completed.insert(call.session));
        let reply = call.result.unwrap();
        assert_eq!(reply.pong, call.argument.ping);
    }
    assert_eq!(client.context().pending_calls(), 0);

    // Teardown after every reply arrived must not complete anything a second time.
    client.close();
    client.closed().await;
    assert!(done_rx.try_recv().is_err());
}

#[tokio::test]
async fn closing_fails_every_outstanding_call_exactly_once() {
    const CALLS: usize = 10;

    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, _strobes) = connect(addr).await;
    let (done_tx, mut done_rx) = mpsc::channel(CALLS);

    for tag in 0..CALLS as u32 {
        client
            .go_call::<Slow, SlowResponse>("test.slow", Slow { tag }, &done_tx)
            .await
            .unwrap();
    }
    assert_eq!(client.context().pending_calls(), CALLS);

    client.close();

    let mut tags = HashSet::new();
    for _ in 0..CALLS {
        let call = timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
        let err = call.error().cloned().unwrap();
        assert_eq!(err.code, codes::LOCAL);
        assert_eq!(err.origin, CallOrigin::Local);
        assert!(
            err.message.starts_with("connection down:"),
            "unexpected message: {}",
            err.message
        );
        assert!(tags.insert(call.argument.tag));
    }
    assert_eq!(client.context().pending_calls(), 0);
    assert!(done_rx.try_recv().is_err());
}

#[tokio::test]
async fn close_is_idempotent_and_later_calls_fail() {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, _strobes) = connect(addr).await;

    client.close();
    client.close();
    timeout(WAIT, client.closed()).await.unwrap();
    assert_eq!(
        client.context().close_reason(),
        Some(TransportError::ConnectionClosed)
    );

    let err = client
        .call::<_, PingResponse>("debug.ping", &Ping::default())
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Transport(TransportError::ConnectionClosed));
}

#[tokio::test]
async fn peer_disconnect_fails_outstanding_calls() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let fake_server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = codec::read_envelope(&mut stream).await.unwrap();
        drop(stream);
    });

    let (client, _strobes) = connect(addr).await;
    let err = timeout(
        WAIT,
        client.call::<_, PingResponse>("debug.ping", &Ping::default()),
    )
    .await
    .unwrap()
    .unwrap_err();
    match err {
        RpcError::Call(err) => {
            assert_eq!(err.code, codes::LOCAL);
            assert!(!err.is_remote());
        }
        other => panic!("expected a local call error, got {other:?}"),
    }
    fake_server.await.unwrap();
    timeout(WAIT, client.closed()).await.unwrap();
}

#[tokio::test]
async fn handler_errors_travel_back_as_remote_errors() {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, _strobes) = connect(addr).await;

    let err = client
        .call::<_, FailResponse>("test.fail", &Fail { code: 7 })
        .await
        .unwrap_err();
    match err {
        RpcError::Call(err) => {
            assert!(err.is_remote());
            assert_eq!(err.code, 7);
            assert_eq!(err.message, "requested failure");
        }
        other => panic!("expected a remote call error, got {other:?}"),
    }

    let err = client
        .call::<_, BoomResponse>("test.boom", &Boom::default())
        .await
        .unwrap_err();
    match err {
        RpcError::Call(err) => assert_eq!(err.code, codes::HANDLER_FAILED),
        other => panic!("expected a remote call error, got {other:?}"),
    }

    // The connection survives both failures.
    let reply: PingResponse = client
        .call("debug.ping", &Ping { ping: "ok".into() })
        .await
        .unwrap();
    assert_eq!(reply.pong, "ok");
    client.close();
}

#[tokio::test]
async fn oversized_replies_become_error_responses() {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, _strobes) = connect(addr).await;

    // Too large for the payload encoder itself.
    let err = client
        .call::<_, BigResponse>(
            "test.big",
            &Big {
                len: MAX_FRAME_BYTES as u32 + 10,
            },
        )
        .await
        .unwrap_err();
    match err {
        RpcError::Call(err) => assert_eq!(err.code, codes::REPLY_ENCODING_FAILED),
        other => panic!("expected a remote call error, got {other:?}"),
    }

    // Fits as a payload but not once wrapped in a response envelope.
    let err = client
        .call::<_, BigResponse>(
            "test.big",
            &Big {
                len: MAX_FRAME_BYTES as u32 - 4,
            },
        )
        .await
        .unwrap_err();
    match err {
        RpcError::Call(err) => assert_eq!(err.code, codes::REPLY_ENCODING_FAILED),
        other => panic!("expected a remote call error, got {other:?}"),
    }

    let reply: BigResponse = client.call("test.big", &Big { len: 1024 }).await.unwrap();
    assert_eq!(reply.data.len(), 1024);
    client.close();
}

#[tokio::test]
async fn oversized_request_fails_locally_and_leaves_no_pending_call() {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let (client, mut strobes) = connect(addr).await;

    let err = client
        .call::<_, EchoResponse>(
            "test.echo",
            &Echo {
                msg: "x".repeat(MAX_FRAME_BYTES + 1),
            },
        )
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            RpcError::Transport(TransportError::FrameTooLarge { .. })
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(client.context().pending_calls(), 0);

    let reply: EchoResponse = client
        .call("test.echo", &Echo { msg: "small".into() })
        .await
        .unwrap();
    assert_eq!(reply.msg, "small");
    assert_eq!(
        timeout(WAIT, strobes.recv()).await.unwrap().unwrap(),
        "recv:small"
    );
    client.close();
}

#[tokio::test]
async fn reply_to_sessionless_request_is_discarded() {
    let (addr, _release) = spawn_server(RpcConfig::default()).await;
    let mut raw = TcpStream::connect(addr).await.unwrap();

    for (session, ping) in [(0, "dropped"), (5, "kept")] {
        let request = Envelope::Request {
            method: 1,
            session,
            payload: encode_message(&Ping { ping: ping.into() }).unwrap(),
        };
        raw.write_all(&codec::encode(&request).unwrap())
            .await
            .unwrap();
    }

    let response = timeout(WAIT, codec::read_envelope(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let Envelope::Response {
        session,
        outcome: ResponseOutcome::Reply(data),
    } = response
    else {
        panic!("expected a reply, got {response:?}");
    };
    assert_eq!(session, 5);
    let reply: PingResponse = daisy_proto::decode_message(&data).unwrap();
    assert_eq!(reply.pong, "kept");
}

#[tokio::test]
async fn reject_policy_answers_overloaded() {
    let config = RpcConfig {
        max_concurrent_handlers: 1,
        overload_policy: OverloadPolicy::Reject,
        ..RpcConfig::default()
    };
    let (addr, release) = spawn_server(config).await;
    let (client, _strobes) = connect(addr).await;
    let (done_tx, mut done_rx) = mpsc::channel(1);

    client
        .go_call::<Slow, SlowResponse>("test.slow", Slow { tag: 1 }, &done_tx)
        .await
        .unwrap();

    let err = timeout(
        WAIT,
        client.call::<_, PingResponse>("debug.ping", &Ping::default()),
    )
    .await
    .unwrap()
    .unwrap_err();
    match err {
        RpcError::Call(err) => {
            assert!(err.is_remote());
            assert_eq!(err.code, codes::OVERLOADED);
        }
        other => panic!("expected an overload error, got {other:?}"),
    }

    release.add_permits(1);
    let call = timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
    assert_eq!(call.result.unwrap().tag, 1);
    client.close();
}

#[tokio::test]
async fn queue_policy_defers_requests_until_a_slot_frees() {
    let config = RpcConfig {
        max_concurrent_handlers: 1,
        overload_policy: OverloadPolicy::Queue,
        ..RpcConfig::default()
    };
    let (addr, release) = spawn_server(config).await;
    let (client, _strobes) = connect(addr).await;
    let (slow_tx, mut slow_rx) = mpsc::channel(1);
    let (ping_tx, mut ping_rx) = mpsc::channel(1);

    client
        .go_call::<Slow, SlowResponse>("test.slow", Slow { tag: 1 }, &slow_tx)
        .await
        .unwrap();
    client
        .go_call::<Ping, PingResponse>("debug.ping", Ping { ping: "queued".into() }, &ping_tx)
        .await
        .unwrap();

    assert!(
        timeout(Duration::from_millis(200), ping_rx.recv())
            .await
            .is_err(),
        "ping ran while the only handler slot was busy"
    );

    release.add_permits(1);
    let slow = timeout(WAIT, slow_rx.recv()).await.unwrap().unwrap();
    assert_eq!(slow.result.unwrap().tag, 1);
    let ping = timeout(WAIT, ping_rx.recv()).await.unwrap().unwrap();
    assert_eq!(ping.result.unwrap().pong, "queued");
    client.close();
}

#[tokio::test]
async fn serve_with_shutdown_returns_when_signalled() {
    let (server, _release) = server(RpcConfig::default());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let serving = tokio::spawn(async move {
        server
            .serve_with_shutdown(listener, async {
                let _ = stop_rx.await;
            })
            .await
    });
    stop_tx.send(()).unwrap();
    timeout(WAIT, serving).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn close_releases_callers_stuck_behind_a_peer_that_stopped_reading() {
    let config = RpcConfig {
        write_queue_depth: 1,
        ..RpcConfig::default()
    };
    // The peer end is kept alive but never read, so the writer stalls once the pipe fills.
    let (client_io, mut peer) = tokio::io::duplex(8);
    let client = registry().client().config(config).attach(client_io);

    let ctx = client.context().clone();
    let flood = tokio::spawn(async move {
        loop {
            let strobe = Strobe {
                msg: "x".repeat(64),
            };
            if let Err(err) = ctx.invoke("test.strobe", &strobe).await {
                return err;
            }
        }
    });

    let ctx = client.context().clone();
    let stuck_call = tokio::spawn(async move {
        ctx.call::<Ping, PingResponse>("debug.ping", &Ping { ping: "a".into() })
            .await
    });
    let (done_tx, mut done_rx) = mpsc::channel(1);
    let ctx = client.context().clone();
    let stuck_go_call = tokio::spawn(async move {
        ctx.go_call::<Ping, PingResponse>("debug.ping", Ping { ping: "b".into() }, &done_tx)
            .await
    });

    timeout(WAIT, async {
        while client.context().pending_calls() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(!flood.is_finished());

    client.close();

    match timeout(WAIT, flood).await.unwrap().unwrap() {
        RpcError::Transport(TransportError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {other:?}"),
    }

    // A registered call that never reached the wire fails through its completion, not twice.
    match timeout(WAIT, stuck_call).await.unwrap().unwrap() {
        Err(RpcError::Call(err)) => {
            assert_eq!(err.code, codes::LOCAL);
            assert!(
                err.message.starts_with("connection down:"),
                "unexpected message: {}",
                err.message
            );
        }
        other => panic!("expected a connection-down call error, got {other:?}"),
    }
    let handle = timeout(WAIT, stuck_go_call).await.unwrap().unwrap().unwrap();
    let call = timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
    assert_eq!(call.session, handle.session());
    assert_eq!(call.error().map(|err| err.code), Some(codes::LOCAL));
    assert!(done_rx.try_recv().is_err());

    // The writer gave up on the stalled frame and shut the stream down.
    let mut drained = Vec::new();
    timeout(WAIT, peer.read_to_end(&mut drained))
        .await
        .unwrap()
        .unwrap();
}
