//! Echo - two engines talking over an in-process byte stream.
//!
//! This example demonstrates:
//! - Registering an actor with raw and typed methods
//! - Calling it through a proxy from the other side
//! - Sending a cyclic payload and getting the cycle back
//! - Cancelling a long-running call
//!
//! # Running
//!
//! ```text
//! RUST_LOG=plugin_rpc=debug cargo run --example echo
//! ```

use std::time::Duration;

use plugin_rpc::codec::Object;
use plugin_rpc::transport::StreamConnection;
use plugin_rpc::{
    create_proxy_identifier, Actor, CancellationToken, HandlerError, ProxyIdentifier, RpcProtocol,
    Value,
};

const ECHO: ProxyIdentifier = create_proxy_identifier("echo");

fn echo_actor() -> Actor {
    Actor::new()
        .method("$ping", |args, _ctx| async move {
            Ok(args.into_iter().next().unwrap_or_default())
        })
        .typed_method("$shout", |(text,): (String,), _ctx| async move {
            Ok::<_, HandlerError>(text.to_uppercase())
        })
        .method("$sleep", |_args, ctx| async move {
            tokio::select! {
                _ = ctx.cancelled() => Err(HandlerError::canceled()),
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(Value::from("woke up")),
            }
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let (main_side, host_side) = tokio::io::duplex(64 * 1024);
    let _host = RpcProtocol::builder()
        .actor(&ECHO, echo_actor())
        .start(StreamConnection::new(host_side));
    let main = RpcProtocol::new(StreamConnection::new(main_side));

    let echo = main.get_proxy(&ECHO);

    let reply = echo.call("$ping", vec!["hello".into()]).await?;
    println!("$ping(\"hello\") -> {:?}", reply);

    let shout = echo.method("$shout").ok_or("no stub")?;
    let loud: String = shout.call_as(vec!["quiet please".into()]).await?;
    println!("$shout -> {}", loud);

    let node = Object::new();
    node.insert("name", "loop");
    node.insert("self", node.clone());
    let reply = echo.call("$ping", vec![node.into()]).await?;
    println!(
        "cyclic reply keeps its cycle: {}",
        reply.get("self").ptr_eq(&reply)
    );

    let token = CancellationToken::new();
    let sleeping = echo.call_with_token("$sleep", vec![], &token);
    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    match sleeping.await {
        Err(e) => println!("$sleep after cancel -> {}", e),
        Ok(v) => println!("$sleep finished anyway -> {:?}", v),
    }

    Ok(())
}
