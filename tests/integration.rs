//! Integration tests for plugin-rpc.
//!
//! Two engines talk to each other over real connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lsp_types::{Position, Range, Url};
use plugin_rpc::codec::{Object, UriComponents};
use plugin_rpc::transport::{channel_pair, StreamConnection};
use plugin_rpc::{
    create_proxy_identifier, Actor, CancellationToken, HandlerError, ProxyIdentifier, RpcError,
    RpcProtocol, Value,
};

const ECHO: ProxyIdentifier = create_proxy_identifier("echo");

fn echo_actor() -> Actor {
    Actor::new().method("$ping", |args, _ctx| async move { Ok(args[0].clone()) })
}

/// Server with the echo actor, and a bare client, over channels.
fn echo_pair() -> (RpcProtocol, RpcProtocol) {
    let (left, right) = channel_pair();
    let server = RpcProtocol::builder().actor(&ECHO, echo_actor()).start(left);
    (server, RpcProtocol::new(right))
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("completed in time")
}

#[tokio::test]
async fn test_echo_end_to_end() {
    let (_server, client) = echo_pair();
    let echo = client.get_proxy(&ECHO);

    let reply = within(echo.call("$ping", vec!["hello".into()])).await.unwrap();
    assert_eq!(reply.as_str(), Some("hello"));

    let cyclic = Object::new();
    cyclic.insert("name", "root");
    cyclic.insert("self", cyclic.clone());
    let reply = within(echo.call("$ping", vec![cyclic.clone().into()])).await.unwrap();

    assert!(reply.get("self").ptr_eq(&reply));
    assert_eq!(reply.get("name").as_str(), Some("root"));
    assert!(!reply.ptr_eq(&Value::from(cyclic)));
}

#[tokio::test]
async fn test_cyclic_reply_is_freed_after_use() {
    let (_server, client) = echo_pair();

    let node = Object::new();
    node.insert("name", "ring");
    let next = Object::new();
    next.insert("back", node.clone());
    node.insert("next", next);

    let reply = within(client.get_proxy(&ECHO).call("$ping", vec![node.into()]))
        .await
        .unwrap();
    assert!(reply.get("next").get("back").ptr_eq(&reply));

    let weak = reply.as_object().unwrap().downgrade();
    drop(reply);
    assert!(!weak.is_alive());
}

#[tokio::test]
async fn test_shared_structure_survives() {
    let (_server, client) = echo_pair();

    let shared = Object::new();
    shared.insert("n", 1);
    let outer = Object::new();
    outer.insert("a", shared.clone());
    outer.insert("b", shared);

    let reply = within(client.get_proxy(&ECHO).call("$ping", vec![outer.into()]))
        .await
        .unwrap();
    assert!(reply.get("a").ptr_eq(&reply.get("b")));
    assert_eq!(reply.get("b").get("n").as_i64(), Some(1));
}

#[tokio::test]
async fn test_domain_values_round_trip() {
    let (_server, client) = echo_pair();
    let echo = client.get_proxy(&ECHO);

    let url = Url::parse("file:///home/user/a.txt").unwrap();
    let reply = within(echo.call("$ping", vec![url.clone().into()])).await.unwrap();
    assert_eq!(reply.as_uri(), Some(&url));

    let foreign = UriComponents::parse("untitled:Untitled-1");
    let reply = within(echo.call("$ping", vec![foreign.clone().into()])).await.unwrap();
    assert_eq!(reply.as_foreign_uri(), Some(&foreign));

    let range = Range::new(Position::new(0, 1), Position::new(2, 3));
    let reply = within(echo.call("$ping", vec![range.into()])).await.unwrap();
    assert_eq!(reply.as_range(), Some(&range));
}

#[tokio::test]
async fn test_typed_range_result_arrives_as_range() {
    let (left, right) = channel_pair();
    let actor = Actor::new().typed_method("$selection", |_args: Vec<i64>, _ctx| async move {
        Ok::<_, HandlerError>(Range::new(Position::new(1, 2), Position::new(3, 4)))
    });
    let _server = RpcProtocol::builder().actor(&ECHO, actor).start(left);
    let client = RpcProtocol::new(right);
    let selection = client.get_proxy(&ECHO).method("$selection").unwrap();

    let reply = within(selection.call(vec![])).await.unwrap();
    assert_eq!(
        reply.as_range(),
        Some(&Range::new(Position::new(1, 2), Position::new(3, 4)))
    );

    let typed: Range = within(selection.call_as(vec![])).await.unwrap();
    assert_eq!(typed.end, Position::new(3, 4));
}

#[tokio::test]
async fn test_unknown_actor_and_method() {
    let (_server, client) = echo_pair();

    let missing = create_proxy_identifier("missing");
    match within(client.get_proxy(&missing).call("$ping", vec![])).await {
        Err(RpcError::Remote(err)) => assert!(err.message.contains("Unknown actor")),
        other => panic!("unexpected {:?}", other),
    }

    match within(client.get_proxy(&ECHO).call("$pong", vec![])).await {
        Err(RpcError::Remote(err)) => assert!(err.message.contains("Unknown method")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_handler_errors_cross_the_wire() {
    let (left, right) = channel_pair();
    let actor = Actor::new()
        .method("$throw", |_args, _ctx| async move {
            Err(HandlerError::new("RangeError", "too big"))
        })
        .method("$reject", |_args, _ctx| async move { Err(HandlerError::reject(42)) })
        .method("$panic", |_args, _ctx| async move {
            if true {
                panic!("handler exploded");
            }
            Ok(Value::Undefined)
        });
    let _server = RpcProtocol::builder().actor(&ECHO, actor).start(left);
    let client = RpcProtocol::new(right);
    let proxy = client.get_proxy(&ECHO);

    match within(proxy.call("$throw", vec![])).await {
        Err(RpcError::Remote(err)) => {
            assert_eq!(err.name, "RangeError");
            assert_eq!(err.message, "too big");
            assert_eq!(err.to_string(), "RangeError: too big");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(within(proxy.call("$reject", vec![])).await, Err(RpcError::Rejected)));
    match within(proxy.call("$panic", vec![])).await {
        Err(RpcError::Remote(err)) => assert_eq!(err.message, "handler exploded"),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_absent_result_stays_absent() {
    let (left, right) = channel_pair();
    let actor = Actor::new()
        .method("$nothing", |_args, _ctx| async { Ok(Value::Undefined) })
        .method("$null", |_args, _ctx| async { Ok(Value::Null) });
    let _server = RpcProtocol::builder().actor(&ECHO, actor).start(left);
    let client = RpcProtocol::new(right);
    let proxy = client.get_proxy(&ECHO);

    assert!(within(proxy.call("$nothing", vec![])).await.unwrap().is_undefined());
    assert!(within(proxy.call("$null", vec![])).await.unwrap().is_null());
}

#[tokio::test]
async fn test_cancellation_reaches_the_handler() {
    let (left, right) = channel_pair();
    let observed = Arc::new(AtomicUsize::new(0));
    let seen = observed.clone();
    let actor = Actor::new().method("$slow", move |_args, ctx| {
        let seen = seen.clone();
        async move {
            tokio::select! {
                _ = ctx.cancelled() => {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::canceled())
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(Value::Undefined),
            }
        }
    });
    let server = RpcProtocol::builder().actor(&ECHO, actor).start(left);
    let client = RpcProtocol::new(right);

    let token = CancellationToken::new();
    let call = client.get_proxy(&ECHO).call_with_token("$slow", vec![], &token);
    while server.in_flight_invocations() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    token.cancel();

    match within(call).await {
        Err(RpcError::Remote(err)) => assert_eq!(err.name, "Canceled"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(observed.load(Ordering::SeqCst), 1);
    assert_eq!(server.in_flight_invocations(), 0);
}

#[tokio::test]
async fn test_pre_cancelled_call_never_reaches_peer() {
    let (left, right) = channel_pair();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let actor = Actor::new().method("$count", move |_args, _ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(Value::Undefined) }
    });
    let _server = RpcProtocol::builder().actor(&ECHO, actor).start(left);
    let client = RpcProtocol::new(right);
    let proxy = client.get_proxy(&ECHO);

    let token = CancellationToken::new();
    token.cancel();
    let result = proxy.call_with_token("$count", vec![], &token).await;
    assert!(matches!(result, Err(RpcError::Canceled)));

    within(proxy.call("$count", vec![])).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_calls_settle_independently() {
    let (left, right) = channel_pair();
    let actor = Actor::new().typed_method("$delay", |(ms, tag): (u64, String), _ctx| async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok::<_, HandlerError>(tag)
    });
    let _server = RpcProtocol::builder().actor(&ECHO, actor).start(left);
    let client = RpcProtocol::new(right);
    let delay = client.get_proxy(&ECHO).method("$delay").unwrap();

    let slow = delay.call_as::<String>(vec![200.into(), "slow".into()]);
    let fast = delay.call_as::<String>(vec![10.into(), "fast".into()]);
    assert_eq!(client.pending_calls(), 2);

    let (slow, fast) = within(async { tokio::join!(slow, fast) }).await;
    assert_eq!(slow.unwrap(), "slow");
    assert_eq!(fast.unwrap(), "fast");
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_bidirectional_calls() {
    let (left, right) = channel_pair();
    let main_side = RpcProtocol::builder().actor(&ECHO, echo_actor()).start(left);

    // The host side answers by calling back into the main side.
    let host_side = RpcProtocol::new(right);
    let back = host_side.get_proxy(&ECHO);
    let relay = create_proxy_identifier("relay");
    host_side.set(
        &relay,
        Actor::new().method("$relay", move |args, _ctx| {
            let back = back.clone();
            async move { back.call("$ping", args).await.map_err(HandlerError::from) }
        }),
    );

    let reply = within(main_side.get_proxy(&relay).call("$relay", vec!["round trip".into()]))
        .await
        .unwrap();
    assert_eq!(reply.as_str(), Some("round trip"));
}

#[tokio::test]
async fn test_host_id_routing() {
    let (left, right) = channel_pair();
    let _server = RpcProtocol::builder()
        .actor(&ECHO, echo_actor())
        .remote_host_id("host-1")
        .start(left);
    let client = RpcProtocol::builder().remote_host_id("host-1").start(right);

    let reply = within(client.get_proxy(&ECHO).call("$ping", vec![5.into()]))
        .await
        .unwrap();
    assert_eq!(reply.as_i64(), Some(5));
    assert_eq!(client.remote_host_id(), Some("host-1"));
}

#[tokio::test]
async fn test_stream_transport() {
    let (main_stream, host_stream) = tokio::io::duplex(256);
    let _host = RpcProtocol::builder()
        .actor(&ECHO, echo_actor())
        .start(StreamConnection::new(host_stream));
    let main = RpcProtocol::new(StreamConnection::new(main_stream));
    let echo = main.get_proxy(&ECHO);

    let big = "x".repeat(10_000);
    let calls: Vec<_> = (0..20)
        .map(|i| echo.call("$ping", vec![format!("{}-{}", i, big).into()]))
        .collect();
    for (i, call) in calls.into_iter().enumerate() {
        let reply = within(call).await.unwrap();
        assert!(reply.as_str().unwrap().starts_with(&format!("{}-", i)));
    }
}

#[tokio::test]
async fn test_peer_shutdown_is_observed() {
    let (left, right) = channel_pair();
    let client = RpcProtocol::new(right);
    let pending = client.get_proxy(&ECHO).call("$ping", vec![]);
    drop(left);

    assert!(matches!(within(pending).await, Err(RpcError::ConnectionClosed)));
    within(client.wait_for_shutdown()).await;
}

#[tokio::test]
async fn test_dispose_leaves_pending_calls_alone() {
    let (left, right) = channel_pair();
    let actor = Actor::new().method("$never", |_args, ctx| async move {
        ctx.cancelled().await;
        Ok(Value::Undefined)
    });
    let _server = RpcProtocol::builder().actor(&ECHO, actor).start(left);
    let client = RpcProtocol::new(right);

    let pending = client.get_proxy(&ECHO).call("$never", vec![]);
    client.dispose();

    assert!(matches!(
        client.get_proxy(&ECHO).call("$never", vec![]).await,
        Err(RpcError::Canceled)
    ));
    assert_eq!(client.pending_calls(), 1);
    let waited = tokio::time::timeout(Duration::from_millis(50), pending).await;
    assert!(waited.is_err());
}
