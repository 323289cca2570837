//! HTTP server for receiving WebSub hub requests.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use warp::http::StatusCode;
use warp::Filter;

use crate::error::CallbackServerError;
use crate::handler::{CallbackHandler, CallbackReply, ContentDelivery, QueryError, VerificationQuery};
use crate::router::CallbackRouter;

/// Settings for the callback server.
#[derive(Debug, Clone)]
pub struct CallbackServerConfig {
    /// Address to bind on
    /// Default: 0.0.0.0
    pub bind_ip: IpAddr,

    /// Range of ports to try, inclusive. `(0, 0)` lets the OS pick.
    /// Default: (3400, 3500)
    pub port_range: (u16, u16),

    /// Externally reachable base URL hubs should call back to, for servers
    /// behind a proxy or NAT. When unset it is derived from the local address.
    pub public_base_url: Option<String>,

    /// Largest content distribution body accepted
    /// Default: 4 MiB
    pub max_body_bytes: u64,
}

impl Default for CallbackServerConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_range: (3400, 3500),
            public_base_url: None,
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

impl CallbackServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into());
        self
    }

    pub fn with_max_body_bytes(mut self, bytes: u64) -> Self {
        self.max_body_bytes = bytes;
        self
    }
}

/// HTTP callback server for WebSub subscribers.
///
/// The server exposes two routes under its base URL, both keyed by the
/// callback token in the single path segment:
///
/// - `GET /{callback}?hub.mode=...`: verification of intent. A successful
///   handshake answers 200 with the challenge as the verbatim body.
/// - `POST /{callback}`: content distribution. Answered with 2xx whenever the
///   callback is known, independent of what the handler does with the body.
///
/// Unknown callbacks get 404, malformed verification queries get 400.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use callback_server::{
///     CallbackHandler, CallbackReply, CallbackServer, CallbackServerConfig,
///     ContentDelivery, VerificationQuery,
/// };
///
/// struct Echo;
///
/// #[async_trait]
/// impl CallbackHandler for Echo {
///     async fn verify(&self, _callback: &str, query: VerificationQuery) -> CallbackReply {
///         query.challenge.map(CallbackReply::Challenge).unwrap_or(CallbackReply::Accepted)
///     }
///     async fn deliver(&self, _callback: &str, _delivery: ContentDelivery) -> CallbackReply {
///         CallbackReply::Accepted
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let server = CallbackServer::start(CallbackServerConfig::default(), Arc::new(Echo))
///         .await
///         .expect("Failed to start callback server");
///
///     server.router().register("token".to_string()).await;
///     println!("Callback URL: {}", server.callback_url("token"));
/// }
/// ```
pub struct CallbackServer {
    /// The port the server is bound to
    port: u16,
    /// Base URL hubs use to reach this server, without a trailing slash
    base_url: String,
    router: Arc<CallbackRouter>,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind and start the server.
    ///
    /// Tries each port of the configured range in order and keeps the first
    /// one that binds. The base URL is the configured public URL if present,
    /// otherwise `http://<ip>:<port>` with the bind address, or the detected
    /// outbound interface address when binding to all interfaces.
    pub async fn start(
        config: CallbackServerConfig,
        handler: Arc<dyn CallbackHandler>,
    ) -> Result<Self, CallbackServerError> {
        let (start, end) = config.port_range;
        if start > end {
            return Err(CallbackServerError::InvalidPortRange { start, end });
        }

        let router = Arc::new(CallbackRouter::new(handler));
        let routes = Self::routes(router.clone(), config.max_body_bytes);

        for port in start..=end {
            let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
            let signal = async move {
                shutdown_rx.recv().await;
            };
            let addr = SocketAddr::new(config.bind_ip, port);
            match warp::serve(routes.clone()).try_bind_with_graceful_shutdown(addr, signal) {
                Ok((addr, server)) => {
                    return Self::finish_start(config, router, addr, server, shutdown_tx);
                }
                Err(e) => {
                    tracing::trace!(port, error = %e, "callback port unavailable");
                }
            }
        }

        Err(CallbackServerError::NoAvailablePort { start, end })
    }

    fn finish_start(
        config: CallbackServerConfig,
        router: Arc<CallbackRouter>,
        addr: SocketAddr,
        server: impl std::future::Future<Output = ()> + Send + 'static,
        shutdown_tx: mpsc::Sender<()>,
    ) -> Result<Self, CallbackServerError> {
        let base_url = match config.public_base_url {
            Some(url) => Self::normalize_base_url(&url)?,
            None => {
                let ip = if addr.ip().is_unspecified() {
                    Self::detect_local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
                } else {
                    addr.ip()
                };
                match ip {
                    IpAddr::V4(v4) => format!("http://{v4}:{}", addr.port()),
                    IpAddr::V6(v6) => format!("http://[{v6}]:{}", addr.port()),
                }
            }
        };

        let server_handle = tokio::spawn(server);
        tracing::info!(%addr, base_url = %base_url, "callback server listening");

        Ok(Self {
            port: addr.port(),
            base_url,
            router,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Base URL hubs use to reach this server, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The absolute URL a hub should call for `callback`.
    pub fn callback_url(&self, callback: &str) -> String {
        format!("{}/{}", self.base_url, callback)
    }

    /// Get the port the server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The router used to register and unregister callback tokens.
    pub fn router(&self) -> &Arc<CallbackRouter> {
        &self.router
    }

    /// Shutdown the callback server gracefully.
    ///
    /// Sends the shutdown signal and waits for in-flight requests to finish.
    pub async fn shutdown(mut self) -> Result<(), CallbackServerError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            handle
                .await
                .map_err(|e| CallbackServerError::Shutdown(e.to_string()))?;
        }

        Ok(())
    }

    fn normalize_base_url(raw: &str) -> Result<String, CallbackServerError> {
        let url = url::Url::parse(raw)
            .map_err(|e| CallbackServerError::InvalidBaseUrl(format!("{raw}: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CallbackServerError::InvalidBaseUrl(format!(
                "{raw}: scheme must be http or https"
            )));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(CallbackServerError::InvalidBaseUrl(format!(
                "{raw}: must not carry a query or fragment"
            )));
        }
        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    /// Detect the local IP address for callback URLs.
    ///
    /// This uses a UDP socket connection to determine the local IP address
    /// that would be used for outbound connections. No data is actually sent.
    fn detect_local_ip() -> Option<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        let local_addr = socket.local_addr().ok()?;
        Some(local_addr.ip())
    }

    /// Build the warp filter tree for the two callback routes.
    fn routes(
        router: Arc<CallbackRouter>,
        max_body_bytes: u64,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone + Send + Sync + 'static
    {
        let verify_route = warp::get()
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::query::<HashMap<String, String>>())
            .and_then({
                let router = router.clone();
                move |callback: String, params: HashMap<String, String>| {
                    let router = router.clone();
                    async move {
                        let query = VerificationQuery::from_params(&params).map_err(|e| {
                            tracing::debug!(%callback, error = %e, "malformed verification request");
                            warp::reject::custom(InvalidVerificationQuery(e))
                        })?;
                        let reply = router.route_verification(&callback, query).await;
                        Ok::<_, warp::Rejection>(into_response(reply))
                    }
                }
            });

        let content_route = warp::post()
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::header::headers_cloned())
            .and(limited_body(max_body_bytes))
            .and_then({
                let router = router.clone();
                move |callback: String, headers: warp::http::HeaderMap, body: bytes::Bytes| {
                    let router = router.clone();
                    async move {
                        let delivery = delivery_from_parts(&headers, body);
                        tracing::debug!(
                            %callback,
                            bytes = delivery.body.len(),
                            signed = delivery.signature.is_some(),
                            "content distribution received"
                        );
                        let reply = router.route_content(&callback, delivery).await;
                        Ok::<_, warp::Rejection>(into_response(reply))
                    }
                }
            });

        verify_route.or(content_route).recover(handle_rejection)
    }
}

/// Body filter capped at `max_bytes`.
///
/// A declared `Content-Length` over the cap is refused before reading. Chunked
/// bodies have no length up front, so they are read until the cap is crossed.
fn limited_body(
    max_bytes: u64,
) -> impl Filter<Extract = (bytes::Bytes,), Error = warp::Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and(warp::body::stream())
        .and_then(move |declared: Option<u64>, stream| async move {
            if declared.map_or(false, |len| len > max_bytes) {
                return Err(warp::reject::custom(BodyTooLarge));
            }
            read_capped(stream, max_bytes).await
        })
}

async fn read_capped<S, B>(stream: S, max_bytes: u64) -> Result<bytes::Bytes, warp::Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    let mut stream = Box::pin(stream);
    let mut body = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let mut chunk = chunk.map_err(|e| {
            tracing::debug!(error = %e, "failed to read content body");
            warp::reject::custom(UnreadableBody)
        })?;
        if (body.len() + chunk.remaining()) as u64 > max_bytes {
            return Err(warp::reject::custom(BodyTooLarge));
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let n = part.len();
            body.extend_from_slice(part);
            chunk.advance(n);
        }
    }
    Ok(body.freeze())
}

fn header_str(headers: &warp::http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn delivery_from_parts(headers: &warp::http::HeaderMap, body: bytes::Bytes) -> ContentDelivery {
    let links = headers
        .get_all("link")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect();

    ContentDelivery {
        signature: header_str(headers, "x-hub-signature"),
        content_type: header_str(headers, "content-type"),
        links,
        body,
    }
}

fn into_response(reply: CallbackReply) -> warp::reply::Response {
    use warp::Reply;

    match reply {
        CallbackReply::Challenge(challenge) => warp::reply::with_status(
            warp::reply::with_header(challenge, "content-type", "text/plain"),
            StatusCode::OK,
        )
        .into_response(),
        CallbackReply::Accepted => warp::reply::with_status("", StatusCode::OK).into_response(),
        CallbackReply::NotFound => {
            warp::reply::with_status("Subscription not found", StatusCode::NOT_FOUND).into_response()
        }
        CallbackReply::Failed => {
            warp::reply::with_status("", StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// Custom rejection for verification queries that cannot be decoded.
#[derive(Debug)]
struct InvalidVerificationQuery(QueryError);

impl warp::reject::Reject for InvalidVerificationQuery {}

#[derive(Debug)]
struct BodyTooLarge;

impl warp::reject::Reject for BodyTooLarge {}

#[derive(Debug)]
struct UnreadableBody;

impl warp::reject::Reject for UnreadableBody {}

/// Handle rejections and convert them to HTTP responses.
async fn handle_rejection(
    err: warp::Rejection,
) -> Result<warp::reply::Response, std::convert::Infallible> {
    use warp::Reply;

    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Subscription not found".to_string())
    } else if let Some(InvalidVerificationQuery(e)) = err.find::<InvalidVerificationQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string".to_string())
    } else if err.find::<BodyTooLarge>().is_some()
        || err.find::<warp::reject::PayloadTooLarge>().is_some()
    {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Length required".to_string())
    } else if err.find::<UnreadableBody>().is_some()
        || err.find::<warp::reject::InvalidHeader>().is_some()
    {
        (StatusCode::BAD_REQUEST, "Malformed request body".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        tracing::warn!(rejection = ?err, "unhandled callback rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(message, code).into_response())
}
