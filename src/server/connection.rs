//! Per-connection request handling
//!
//! Reads one request, routes it, then either answers and closes or hands the
//! socket to a stream dispatcher. Non-streaming connections are never kept
//! alive.
//!
//! A stream request may name `?init=<target>` any number of times. Each target
//! is answered by the GET handler it routes to, and every 200 answer is
//! written as a frame ahead of the first published message.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{Compressors, Marshallers};
use crate::error::{Error, Result};
use crate::http::{Headers, Request, Response, StatusCode};
use crate::pubsub::Broker;
use crate::server::config::ServerConfig;
use crate::server::exchange::Exchange;
use crate::server::router::{Endpoint, Params, RouteMatch, Router, TopicResolver};
use crate::stream::{Dispatcher, StreamConnection};

/// State shared by every connection of one server
#[derive(Clone)]
pub(crate) struct Shared {
    pub config: ServerConfig,
    pub router: Arc<Router>,
    pub broker: Arc<Broker<Value>>,
    pub marshallers: Arc<Marshallers>,
    pub compressors: Arc<Compressors>,
}

pub(crate) struct Connection<T> {
    id: u64,
    socket: T,
    peer_addr: Option<SocketAddr>,
    shared: Shared,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u64, socket: T, peer_addr: Option<SocketAddr>, shared: Shared) -> Self {
        Self {
            id,
            socket,
            peer_addr,
            shared,
        }
    }

    pub async fn run(self) -> Result<()> {
        let Connection {
            id,
            mut socket,
            peer_addr,
            shared,
        } = self;

        let limits = shared.config.request_limits();
        let read = tokio::time::timeout(
            shared.config.request_timeout,
            Request::read_from(&mut socket, &limits),
        )
        .await;

        let mut request = match read {
            Ok(Ok(Some(request))) => request,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => {
                if let Some(status) = e.status() {
                    let mut exchange = Exchange::new(Request::new("GET", "/"), socket);
                    exchange.respond(&Response::text(status, e.to_string())).await?;
                }
                return Err(e.into());
            }
            Err(_elapsed) => {
                let mut exchange = Exchange::new(Request::new("GET", "/"), socket);
                exchange
                    .respond(&Response::status(StatusCode::REQUEST_TIMEOUT))
                    .await?;
                return Err(Error::BadRequest("request head timed out".to_string()));
            }
        };
        request.peer_addr = peer_addr;

        tracing::debug!(
            connection_id = id,
            method = %request.method,
            target = %request.target,
            "Request"
        );

        let mut exchange = Exchange::new(request, socket);
        let routed = shared
            .router
            .resolve(exchange.request().effective_method(), &exchange.request().path);

        match routed {
            RouteMatch::Found(Endpoint::Handler(handler), params) => {
                let response = handler(exchange.request(), &params);
                exchange.respond(&response).await
            }
            RouteMatch::Found(Endpoint::Stream(resolver), params) => {
                serve_stream(id, exchange, &shared, &**resolver, params).await
            }
            RouteMatch::NotFound => {
                exchange
                    .respond(&Response::status(StatusCode::NOT_FOUND))
                    .await
            }
            RouteMatch::MethodNotAllowed(allowed) => {
                let response = Response::status(StatusCode::METHOD_NOT_ALLOWED)
                    .header("Allow", allowed.join(", "));
                exchange.respond(&response).await
            }
        }
    }
}

async fn serve_stream<T>(
    id: u64,
    mut exchange: Exchange<T>,
    shared: &Shared,
    resolver: &TopicResolver,
    params: Params,
) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let topics = match resolver(exchange.request(), &params) {
        Ok(topics) => topics,
        Err(response) => return exchange.respond(&response).await,
    };

    let mut dispatcher = Dispatcher::new(id, Arc::clone(&shared.broker), shared.config.stream.clone());
    if let Err(e) = dispatcher.subscribe(&topics) {
        let status = match e {
            Error::Pubsub(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        return exchange.respond(&Response::text(status, e.to_string())).await;
    }

    let snapshot = initial_values(exchange.request(), shared);

    let marshaller = shared
        .marshallers
        .negotiate(exchange.request().header("Accept"));
    let compressor = shared
        .compressors
        .negotiate(exchange.request().header("Accept-Encoding"));

    let transport = match exchange.hijack() {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!(connection_id = id, error = %e, "Hijack failed");
            return exchange
                .respond(&Response::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
                .await;
        }
    };

    let mut connection = StreamConnection::new(transport, marshaller, &shared.config.stream);
    if let Some(compressor) = compressor {
        connection = connection.with_compressor(compressor.as_ref())?;
    }

    tracing::debug!(
        connection_id = id,
        topics = ?dispatcher.topics(),
        init_frames = snapshot.len(),
        mime = %connection.headers().get("Content-Type").unwrap_or_default(),
        "Streaming"
    );

    for value in &snapshot {
        if let Err(e) = connection.write_value(value).await {
            tracing::debug!(connection_id = id, error = %e, "Initial frame failed");
            let _ = connection.close().await;
            return Err(e);
        }
    }

    dispatcher.stream(connection).await
}

/// Values answered by the GET handlers behind every `?init=` target.
///
/// Targets that route nowhere, route to another stream, or answer with
/// anything but 200 are skipped.
fn initial_values(request: &Request, shared: &Shared) -> Vec<Value> {
    request
        .query_all("init")
        .filter_map(|target| {
            let mut lookup = Request::new("GET", target);
            lookup.headers = request.headers.clone();
            lookup.peer_addr = request.peer_addr;

            let response = match shared.router.resolve("GET", &lookup.path) {
                RouteMatch::Found(Endpoint::Handler(handler), params) => handler(&lookup, &params),
                _ => {
                    tracing::debug!(init_target = %target, "Initial target has no GET handler");
                    return None;
                }
            };
            if response.status != StatusCode::OK {
                tracing::debug!(
                    init_target = %target,
                    status = %response.status,
                    "Initial target skipped"
                );
                return None;
            }

            decode_body(&response.headers, &response.body, &shared.marshallers)
        })
        .collect()
}

fn decode_body(headers: &Headers, body: &[u8], marshallers: &Marshallers) -> Option<Value> {
    let marshaller = headers
        .get("Content-Type")
        .and_then(|mime| marshallers.get(mime))
        .unwrap_or_else(|| marshallers.default_marshaller());
    // Text responses end with a newline that is not part of the value
    let body = body.strip_suffix(b"\n").unwrap_or(body);

    match marshaller.unmarshal(body) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "Initial value could not be decoded");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn shared(router: Router) -> Shared {
        Shared {
            config: ServerConfig::default(),
            router: Arc::new(router),
            broker: Arc::new(Broker::unbounded()),
            marshallers: Arc::new(Marshallers::new()),
            compressors: Arc::new(Compressors::new()),
        }
    }

    async fn exchange(shared: Shared, raw: &[u8]) -> String {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(raw).await.unwrap();

        let _ = Connection::new(1, server, None, shared).run().await;

        let mut wire = String::new();
        client.read_to_string(&mut wire).await.unwrap();
        wire
    }

    #[tokio::test]
    async fn test_handler_sees_body() {
        let router = Router::new().route(
            "POST",
            "/echo/:name",
            Endpoint::handler(|req, params| {
                let text = format!("{}:{}", params.get("name").unwrap_or_default(), String::from_utf8_lossy(&req.body));
                Response::text(StatusCode::OK, text)
            }),
        );

        let wire = exchange(
            shared(router),
            b"POST /echo/ann HTTP/1.1\r\nContent-Length: 2\r\n\r\nhi",
        )
        .await;
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.ends_with("\r\n\r\nann:hi\n"));
    }

    #[tokio::test]
    async fn test_method_override() {
        let router = Router::new().route(
            "DELETE",
            "/items/:id",
            Endpoint::handler(|_, _| Response::new(StatusCode::NO_CONTENT)),
        );

        let wire = exchange(shared(router), b"POST /items/1?_method=DELETE HTTP/1.1\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 204 No Content\r\n"));
    }

    #[tokio::test]
    async fn test_not_found_and_not_allowed() {
        let router = Router::new().route("POST", "/publish/:topic", Endpoint::handler(|_, _| Response::new(StatusCode::NO_CONTENT)));
        let shared = shared(router);

        let wire = exchange(shared.clone(), b"GET /nowhere HTTP/1.1\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));

        let wire = exchange(shared, b"GET /publish/1 HTTP/1.1\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(wire.contains("Allow: POST\r\n"));
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let wire = exchange(shared(Router::new()), b"HELLO\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn test_resolver_rejection() {
        let router = Router::new().route(
            "GET",
            "/watch",
            Endpoint::stream(|req, _| {
                let rooms: Vec<String> = req.query_all("room").map(str::to_string).collect();
                if rooms.is_empty() {
                    Err(Response::text(StatusCode::BAD_REQUEST, "room is required"))
                } else {
                    Ok(rooms)
                }
            }),
        );

        let wire = exchange(shared(router), b"GET /watch HTTP/1.1\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(wire.ends_with("room is required\n"));
    }

    #[tokio::test]
    async fn test_stream_over_capacity() {
        let router = Router::new().route(
            "GET",
            "/watch/:topic",
            Endpoint::stream(|_, params| Ok(vec![params.get("topic").unwrap_or_default().to_string()])),
        );
        let mut shared = shared(router);
        shared.broker = Arc::new(Broker::new(1));

        let (holder, _rx) = crate::pubsub::channel(1);
        shared.broker.subscribe("full", &holder).unwrap();

        let wire = exchange(shared.clone(), b"GET /watch/full HTTP/1.1\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(wire.ends_with("Subscription limit reached for: full\n"));
        assert_eq!(shared.broker.subscriber_count("full"), 1);
    }

    async fn read_until(client: &mut tokio::io::DuplexStream, needle: &str) -> String {
        let mut out = Vec::new();
        let mut chunk = [0u8; 512];
        while !String::from_utf8_lossy(&out).contains(needle) {
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0, "stream closed before {:?}", needle);
            out.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_init_frames_precede_published_ones() {
        let router = Router::new()
            .route(
                "GET",
                "/watch/:topic",
                Endpoint::stream(|_, params| Ok(vec![params.get("topic").unwrap_or_default().to_string()])),
            )
            .route(
                "GET",
                "/history/:topic",
                Endpoint::handler(|req, params| {
                    let body = serde_json::json!({
                        "topic": params.get("topic"),
                        "since": req.query_param("since"),
                        "accept": req.header("Accept"),
                    });
                    Response::new(StatusCode::OK).body(body.to_string(), "application/json")
                }),
            )
            .route("GET", "/motd", Endpoint::handler(|_, _| Response::text(StatusCode::OK, "welcome")))
            .route(
                "GET",
                "/broken",
                Endpoint::handler(|_, _| Response::status(StatusCode::INTERNAL_SERVER_ERROR)),
            );
        let shared = shared(router);
        let broker = Arc::clone(&shared.broker);

        let (mut client, server) = tokio::io::duplex(4096);
        client
            .write_all(
                b"GET /watch/news?init=/history/news%3Fsince%3D5&init=/missing&init=/broken&init=/watch/x&init=/motd HTTP/1.1\r\n\
                  Accept: application/json\r\n\r\n",
            )
            .await
            .unwrap();
        let task = tokio::spawn(Connection::new(7, server, None, shared).run());

        let mut wire = read_until(&mut client, "\"welcome\"\n").await;
        assert_eq!(broker.subscriber_count("news"), 1);
        assert_eq!(broker.subscriber_count("x"), 0);

        broker.publish("news", Value::from("live"));
        assert_eq!(broker.disconnect("news"), 1);
        let mut rest = String::new();
        client.read_to_string(&mut rest).await.unwrap();
        wire.push_str(&rest);

        let (head, body) = wire.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(
            body,
            "{\"topic\":\"news\",\"since\":\"5\",\"accept\":\"application/json\"}\n\
             \"welcome\"\n\
             \"live\"\n"
        );
        assert!(task.await.unwrap().is_ok());
        assert_eq!(broker.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_requires_http1() {
        let router = Router::new().route(
            "GET",
            "/watch/:topic",
            Endpoint::stream(|_, params| Ok(vec![params.get("topic").unwrap_or_default().to_string()])),
        );
        let shared = shared(router);

        let wire = exchange(shared.clone(), b"GET /watch/a HTTP/2.0\r\n\r\n").await;
        assert!(wire.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(wire.contains("Connection does not support hijacking"));
        assert_eq!(shared.broker.topic_count(), 0);
    }
}
