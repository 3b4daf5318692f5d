//! Chat-room push server
//!
//! Run with:
//!   cargo run --example push_server
//!   cargo run --example push_server -- 127.0.0.1:9000
//!
//! Then in one terminal:
//!   curl -N 'http://localhost:8080/rooms?room=lobby&room=dev&init=/stats' -H 'Accept: application/json'
//! and in another:
//!   curl -X POST http://localhost:8080/rooms/lobby -d '{"from":"ann","text":"hi"}'

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use restream::http::{Response, StatusCode};
use restream::pubsub::{self, Broker};
use restream::server::{Endpoint, Router, Server, ServerConfig};
use restream::stream::StreamConfig;

#[derive(Debug, Deserialize, Serialize)]
struct ChatMessage {
    from: String,
    text: String,
}

fn build_router(broker: &Arc<Broker<Value>>) -> Router {
    let publisher = Arc::clone(broker);
    let admin = Arc::clone(broker);
    let stats = Arc::clone(broker);

    Router::new()
        .route(
            "GET",
            "/rooms",
            Endpoint::stream(|req, _| {
                let rooms: Vec<String> = req.query_all("room").map(str::to_string).collect();
                if rooms.is_empty() {
                    return Err(Response::text(
                        StatusCode::BAD_REQUEST,
                        "at least one ?room= is required",
                    ));
                }
                Ok(rooms)
            }),
        )
        .route(
            "GET",
            "/rooms/:room",
            Endpoint::stream(|_, params| {
                Ok(vec![params.get("room").unwrap_or_default().to_string()])
            }),
        )
        .route(
            "POST",
            "/rooms/:room",
            Endpoint::handler(move |req, params| {
                let room = params.get("room").unwrap_or_default();
                let message: ChatMessage = match serde_json::from_slice(&req.body) {
                    Ok(message) => message,
                    Err(e) => return Response::text(StatusCode::BAD_REQUEST, e.to_string()),
                };
                let value = match serde_json::to_value(&message) {
                    Ok(value) => value,
                    Err(e) => {
                        return Response::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                    }
                };

                let delivered = publisher.publish(room, value);
                Response::text(StatusCode::ACCEPTED, format!("delivered to {}", delivered))
            }),
        )
        .route(
            "DELETE",
            "/rooms/:room",
            Endpoint::handler(move |_, params| {
                let room = params.get("room").unwrap_or_default();
                let dropped = admin.disconnect(room);
                Response::text(StatusCode::OK, format!("disconnected {}", dropped))
            }),
        )
        .route(
            "GET",
            "/stats",
            Endpoint::handler(move |_, _| {
                let body = serde_json::json!({
                    "topics": stats.topic_count(),
                    "patterns": stats.pattern_count(),
                    "max_per_topic": stats.max_per_key(),
                });
                Response::new(StatusCode::OK).body(body.to_string(), "application/json")
            }),
        )
}

/// Log every published message through a pattern subscription
fn spawn_audit_log(broker: &Arc<Broker<Value>>) -> Result<(), pubsub::PubsubError> {
    let (sink, mut rx) = pubsub::channel::<Value>(64);
    broker.psubscribe("*", &sink)?;

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            tracing::info!(message = %message, "Published");
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr: SocketAddr = match std::env::args().nth(1) {
        Some(addr) => addr.parse()?,
        None => SocketAddr::from(([0, 0, 0, 0], 8080)),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("restream=debug".parse()?)
                .add_directive("push_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig::default().bind(bind_addr).stream(
        StreamConfig::default()
            .max_subscribers_per_topic(100)
            .sink_capacity(32),
    );
    let broker = Arc::new(Broker::new(config.stream.max_subscribers_per_topic));
    spawn_audit_log(&broker)?;

    println!("Starting push server on {}", config.bind_addr);
    println!();
    println!("=== Listen ===");
    println!("curl -N 'http://localhost:{}/rooms?room=lobby'", bind_addr.port());
    println!();
    println!("=== Talk ===");
    println!(
        "curl -X POST http://localhost:{}/rooms/lobby -d '{{\"from\":\"ann\",\"text\":\"hi\"}}'",
        bind_addr.port()
    );
    println!();

    let server = Server::new(config, build_router(&broker), broker);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    Ok(())
}
