// src/proxy.rs

//! Build-aware reverse proxy with browser live reload.
//!
//! Three routes are served on the listen address:
//!
//! - `/_devloop/refresh.js`: a script that opens the signalling socket and
//!   reloads the page when it closes.
//! - `/_devloop/refresh.ws`: a WebSocket that stays silent until a build
//!   starts, then sends `"2"` and closes.
//! - everything else: held until the coordinator is idle and the origin
//!   accepts connections, then forwarded unchanged.
//!
//! A request arriving while a build fails is held until a later build
//! succeeds; there is no timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reqwest::Url;
use reqwest::redirect::Policy;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::ProxyConfig;
use crate::engine::{BuildCoordinator, BuildState};
use crate::errors::{DevloopError, Result};

pub const REFRESH_SCRIPT_PATH: &str = "/_devloop/refresh.js";
pub const REFRESH_SOCKET_PATH: &str = "/_devloop/refresh.ws";
pub const RELOAD_PROTOCOL: &str = "reloadprotocol";

/// Payload sent on the signalling socket right before it closes.
pub const RELOAD_MARKER: &str = "2";

/// Pause between connection attempts while the origin is starting.
pub const ORIGIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

const REFRESH_SCRIPT: &str = r#"(function () {
  var socket = new WebSocket("ws://" + location.host + "/_devloop/refresh.ws", "reloadprotocol");
  socket.onclose = function () { location.reload(); };
})();
"#;

/// Headers that describe one connection rather than the message.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// One listen address forwarding to one origin.
#[derive(Debug, Clone)]
pub struct HttpProxy {
    listen: String,
    target: Url,
    coordinator: Arc<BuildCoordinator>,
}

#[derive(Clone)]
struct ProxyState {
    coordinator: Arc<BuildCoordinator>,
    target: Url,
    origin: String,
    client: reqwest::Client,
}

impl HttpProxy {
    pub fn new(
        listen: impl Into<String>,
        target: &str,
        coordinator: Arc<BuildCoordinator>,
    ) -> Result<Self> {
        let target = Url::parse(target).map_err(|err| {
            DevloopError::ConfigError(format!("invalid proxy target '{target}': {err}"))
        })?;
        if target.host_str().is_none() {
            return Err(DevloopError::ConfigError(format!(
                "proxy target '{target}' has no host"
            )));
        }
        Ok(Self {
            listen: listen.into(),
            target,
            coordinator,
        })
    }

    pub fn from_config(cfg: &ProxyConfig, coordinator: Arc<BuildCoordinator>) -> Result<Self> {
        Self::new(cfg.listen.clone(), &cfg.target, coordinator)
    }

    /// The address to bind; `:port` means every interface.
    pub fn listen_address(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }

    fn router(&self) -> Result<Router> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .no_proxy()
            .build()
            .map_err(|err| DevloopError::Other(err.into()))?;

        let state = ProxyState {
            coordinator: Arc::clone(&self.coordinator),
            origin: origin_address(&self.target),
            target: self.target.clone(),
            client,
        };

        Ok(Router::new()
            .route(REFRESH_SCRIPT_PATH, get(refresh_script))
            .route(REFRESH_SOCKET_PATH, get(refresh_socket))
            .fallback(forward)
            .with_state(state))
    }

    /// Bind the listen address and serve in the background.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn start(&self) -> Result<SocketAddr> {
        let app = self.router()?;
        let listener = TcpListener::bind(self.listen_address()).await?;
        let local = listener.local_addr()?;

        info!(listen = %local, target = %self.target, "http proxy started");

        tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(err) = axum::serve(listener, service).await {
                error!(error = %err, "http proxy stopped");
            }
        });

        Ok(local)
    }
}

async fn refresh_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        REFRESH_SCRIPT,
    )
}

async fn refresh_socket(State(state): State<ProxyState>, ws: WebSocketUpgrade) -> Response {
    ws.protocols([RELOAD_PROTOCOL])
        .on_upgrade(move |socket| signal_reload(socket, state.coordinator))
}

async fn signal_reload(mut socket: WebSocket, coordinator: Arc<BuildCoordinator>) {
    coordinator.wait_for_state(BuildState::Compiling).await;
    debug!("signalling reload");
    // The browser reloads on close; a failed send closes just the same.
    let _ = socket.send(Message::Text(RELOAD_MARKER.into())).await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn forward(
    State(state): State<ProxyState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    state.coordinator.wait_for_state(BuildState::Idle).await;
    wait_for_origin(&state.origin).await;

    match proxy_request(&state, peer, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "proxy request failed");
            (StatusCode::BAD_GATEWAY, format!("devloop proxy error: {err}")).into_response()
        }
    }
}

async fn proxy_request(
    state: &ProxyState,
    peer: SocketAddr,
    request: Request,
) -> anyhow::Result<Response> {
    let (parts, body) = request.into_parts();
    let url = upstream_url(&state.target, parts.uri.path(), parts.uri.query());

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    append_forwarded_for(&mut headers, peer);

    let body = axum::body::to_bytes(body, usize::MAX).await?;
    debug!(method = %parts.method, url = %url, "forwarding");

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Poll until the origin accepts a TCP connection.
async fn wait_for_origin(origin: &str) {
    loop {
        match TcpStream::connect(origin).await {
            Ok(_) => return,
            Err(err) => {
                debug!(origin, error = %err, "origin not accepting connections yet");
                tokio::time::sleep(ORIGIN_POLL_INTERVAL).await;
            }
        }
    }
}

fn origin_address(target: &Url) -> String {
    let host = target.host_str().unwrap_or("127.0.0.1");
    let port = target.port_or_known_default().unwrap_or(80);
    format!("{host}:{port}")
}

/// Join the target's base path with the request path and keep the query.
fn upstream_url(target: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = target.clone();
    let base = target.path().trim_end_matches('/');
    url.set_path(&format!("{base}{path}"));
    url.set_query(query);
    url
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are connection-scoped too.
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let name = HeaderName::from_static("x-forwarded-for");
    let value = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {}", peer.ip()),
        None => peer.ip().to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(listen: &str, target: &str) -> HttpProxy {
        HttpProxy::new(listen, target, Arc::new(BuildCoordinator::new())).unwrap()
    }

    #[test]
    fn bare_port_listens_on_every_interface() {
        assert_eq!(
            proxy(":1984", "http://127.0.0.1:3000").listen_address(),
            "0.0.0.0:1984"
        );
        assert_eq!(
            proxy("127.0.0.1:8080", "http://127.0.0.1:3000").listen_address(),
            "127.0.0.1:8080"
        );
    }

    #[test]
    fn origin_address_uses_default_port() {
        assert_eq!(
            origin_address(&Url::parse("http://localhost/app").unwrap()),
            "localhost:80"
        );
        assert_eq!(
            origin_address(&Url::parse("http://127.0.0.1:3000").unwrap()),
            "127.0.0.1:3000"
        );
    }

    #[test]
    fn upstream_url_joins_paths_and_keeps_query() {
        let root = Url::parse("http://127.0.0.1:3000").unwrap();
        assert_eq!(
            upstream_url(&root, "/a/b", Some("x=1")).as_str(),
            "http://127.0.0.1:3000/a/b?x=1"
        );
        let based = Url::parse("http://127.0.0.1:3000/api/").unwrap();
        assert_eq!(
            upstream_url(&based, "/users", None).as_str(),
            "http://127.0.0.1:3000/api/users"
        );
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::HOST, HeaderValue::from_static("example.test"));
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::HOST));
    }

    #[test]
    fn forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.2:5555".parse().unwrap();
        append_forwarded_for(&mut headers, peer);
        append_forwarded_for(&mut headers, peer);
        assert_eq!(headers["x-forwarded-for"], "10.0.0.2, 10.0.0.2");
    }
}
