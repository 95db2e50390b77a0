//! Loopback session demo
//!
//! Run with: cargo run --example loopback [SERVER]
//!
//! Drives a client against the in-memory broker with a scripted server that
//! answers every request:
//!
//! - A correlated request (`createAuthCode`) answered to its waiter
//! - A token-only `getInfo` whose answer shows up on the update stream
//! - A public deals feed frame on the deals stream
//! - A server-side connection drop followed by the background reconnect
//!
//! SERVER is `cw2`/`eu` (default) or `cw3`/`ru`.
//!
//! Set `RUST_LOG=cwapi_rs=debug` to see the session internals.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use cwapi_rs::broker::{Delivery, MemoryBroker, PublishedFrame};
use cwapi_rs::protocol::request::CreateAuthCode;
use cwapi_rs::protocol::{Action, Category, Request, RequestPayload};
use cwapi_rs::registry::CategoryUpdate;
use cwapi_rs::session::ConnectionState;
use cwapi_rs::{Client, ClientConfig, ServerVariant};

/// Scripted server side: one answer per request
fn answer(inbound: &str, frame: &PublishedFrame) -> Vec<(String, Delivery)> {
    let Ok(request) = serde_json::from_slice::<Value>(&frame.body) else {
        return Vec::new();
    };

    let body = match request["action"].as_str() {
        Some("getInfo") => json!({
            "action": "getInfo",
            "result": "Ok",
            "payload": { "balance": 120 },
        }),
        Some("createAuthCode") => json!({
            "action": "createAuthCode",
            "result": "Ok",
            "payload": { "userId": request["payload"]["userId"] },
        }),
        _ => json!({ "action": "unknownMethod", "result": "BadRequest", "payload": null }),
    };

    vec![(inbound.to_string(), Delivery::new(inbound, body.to_string()))]
}

fn auth_code_request(user_id: i64) -> Request {
    Request::new(RequestPayload::CreateAuthCode(CreateAuthCode { user_id }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cwapi_rs=info".parse()?)
                .add_directive("loopback=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let server = args
        .get(1)
        .map(|name| ServerVariant::from_name_lossy(name))
        .unwrap_or_default();

    let config = ClientConfig::new("demo", "secret")
        .server(server)
        .category(Category::Deals);

    let broker = MemoryBroker::new();
    let inbound = config.names().inbound_queue().to_string();
    broker.set_responder(move |frame| answer(&inbound, frame));

    let client = Client::connect(Arc::new(broker.clone()), config).await?;
    println!("Connected to {} as {}", server, client.config().user);

    let mut updates = client.subscribe_updates()?;
    let mut deals = client.subscribe(Category::Deals).await?;

    let printer = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            println!("update:  {} ({:?})", update.action, update.result);
        }
    });
    let deal_printer = tokio::spawn(async move {
        while let Ok(update) = deals.recv().await {
            match update {
                CategoryUpdate::Feed(value) => println!("deal:    {}", value),
                CategoryUpdate::Response(response) => println!("deal:    {}", response.action),
            }
        }
    });

    // Correlated request
    let response = client.request(42, &auth_code_request(42)).await?;
    println!(
        "request: {} for user {:?} -> {:?}",
        response.action,
        response.correlation_key(),
        response.result
    );

    // No correlation key: the answer lands on the update stream
    client
        .publish(&Request::token_only(Action::GetInfo, "demo-token"))
        .await?;

    // Public feed
    let names = client.names();
    broker.deliver(
        &names.feed_queue(Category::Deals),
        &names.feed_routing_key(Category::Deals),
        json!({ "item": "Thread", "qty": 12, "price": 3, "sellerName": "Bob" }).to_string(),
    );

    // Server-side drop, recovered in the background
    let mut state = client.watch_state();
    broker.drop_connections("CONNECTION_FORCED - broker restart");
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Connected && broker.dial_count() > 1),
    )
    .await??;
    println!("reconnected, live connections: {}", broker.live_connections());

    let response = client.request(43, &auth_code_request(43)).await?;
    println!("request: {} after reconnect -> {:?}", response.action, response.result);

    client.close().await?;
    printer.await?;
    deal_printer.await?;

    println!("{:#?}", client.stats());
    Ok(())
}
