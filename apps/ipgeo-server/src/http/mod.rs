//! Streamable HTTP transport: one MCP connection per `mcp-session-id`.

pub mod reaper;
pub mod session;
pub mod shutdown;

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt as _;
use ipgeo_mcp::{
    JsonRpcMessage, JsonRpcResponse, McpHandler, McpServerConfig, encode_sse_event,
    is_initialize_request,
};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{Instrument as _, Span, error, field, info, info_span, warn};

use crate::stdio::protocol_error;
use reaper::spawn_reaper;
use session::{PendingSession, SessionStore};
use shutdown::{Phase, ShutdownCoordinator, ShutdownReport, shutdown_signal};

pub const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub addr: SocketAddr,
    pub path: String,
    pub session_ttl: Duration,
    pub reap_interval: Duration,
    pub sse_keep_alive: Duration,
}

#[derive(Clone)]
pub struct HttpState {
    cfg: Arc<McpServerConfig>,
    handler: Arc<dyn McpHandler>,
    store: SessionStore,
    coordinator: Arc<ShutdownCoordinator>,
    sse_keep_alive: Duration,
}

impl HttpState {
    pub fn new(
        cfg: Arc<McpServerConfig>,
        handler: Arc<dyn McpHandler>,
        store: SessionStore,
        sse_keep_alive: Duration,
    ) -> Self {
        let coordinator = Arc::new(ShutdownCoordinator::new(store.clone()));
        Self {
            cfg,
            handler,
            store,
            coordinator,
            sse_keep_alive,
        }
    }

    fn accepting_sessions(&self) -> bool {
        self.coordinator.phase() == Phase::Running
    }
}

pub fn router(path: &str, st: HttpState) -> Router {
    Router::new()
        .route("/", get(health))
        .route(path, post(http_post).get(http_get).delete(http_delete))
        .layer(TraceLayer::new_for_http())
        .with_state(st)
}

/// Serve until a shutdown signal arrives, then close every session and drain connections.
pub async fn serve_http(
    opts: HttpOptions,
    cfg: Arc<McpServerConfig>,
    handler: Arc<dyn McpHandler>,
) -> anyhow::Result<()> {
    if !opts.path.starts_with('/') || opts.path == "/" {
        anyhow::bail!("http path must start with '/' and must not be the root: {}", opts.path);
    }

    let st = HttpState::new(cfg, handler, SessionStore::default(), opts.sse_keep_alive);
    let listener = tokio::net::TcpListener::bind(opts.addr)
        .await
        .with_context(|| format!("bind {}", opts.addr))?;
    info!(
        addr = %opts.addr,
        path = %opts.path,
        session_ttl_secs = opts.session_ttl.as_secs(),
        reap_interval_secs = opts.reap_interval.as_secs(),
        "starting MCP HTTP server"
    );

    let report = serve_until(listener, &opts, st, shutdown_signal()).await?;
    info!(closed = report.closed, failed = report.failed, "sessions closed");
    Ok(())
}

/// Serve on `listener` until `signal` resolves. Sessions are closed before the listener
/// drains, and once more afterwards for any that were opened while it drained.
async fn serve_until<F>(
    listener: tokio::net::TcpListener,
    opts: &HttpOptions,
    st: HttpState,
    signal: F,
) -> anyhow::Result<ShutdownReport>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store = st.store.clone();
    let coordinator = st.coordinator.clone();
    let app = router(&opts.path, st);
    let reaper = spawn_reaper(store.clone(), opts.session_ttl, opts.reap_interval);

    let first = Arc::new(std::sync::Mutex::new(ShutdownReport::default()));
    let shutdown = {
        let coordinator = coordinator.clone();
        let first = first.clone();
        async move {
            signal.await;
            if let Some(report) = coordinator.shutdown().await {
                *first.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = report;
            }
        }
    };
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("http server");
    reaper.abort();

    // Also runs when serve failed so no session outlives the process.
    let mut stragglers = ShutdownReport::default();
    if !store.is_empty().await {
        stragglers = coordinator.close_all().await;
        warn!(
            closed = stragglers.closed,
            failed = stragglers.failed,
            "closed sessions opened during drain"
        );
    }
    served?;

    let first = *first.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    info!(phase = ?coordinator.phase(), "http server stopped");
    Ok(ShutdownReport {
        closed: first.closed + stragglers.closed,
        failed: first.failed + stragglers.failed,
    })
}

async fn health() -> &'static str {
    "ipgeo-mcp ok"
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyMode {
    Json,
    Sse,
}

async fn http_post(State(st): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    let span = request_span("POST", &headers);
    async move {
        if let Err(resp) = check_common_headers(&headers) {
            return resp;
        }
        if let Some(ct) = header_str(&headers, CONTENT_TYPE.as_str())
            && media_type(ct) != "application/json"
        {
            return router_error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                -32000,
                "Unsupported Media Type: Content-Type must be application/json",
            );
        }
        let Some(mode) = negotiate_reply(&headers) else {
            return router_error(
                StatusCode::NOT_ACCEPTABLE,
                -32000,
                "Not Acceptable: client must accept application/json or text/event-stream",
            );
        };

        let msg = match decode_body(&body) {
            Ok(m) => m,
            Err(resp) => return jsonrpc_reply(StatusCode::BAD_REQUEST, &resp, ReplyMode::Json, None),
        };

        match header_str(&headers, SESSION_HEADER) {
            Some(sid) => post_to_session(&st, sid, msg, mode).await,
            None if is_initialize_request(&msg) => open_session(&st, msg, mode).await,
            None => missing_session(),
        }
    }
    .instrument(span)
    .await
}

async fn post_to_session(st: &HttpState, sid: &str, msg: JsonRpcMessage, mode: ReplyMode) -> Response {
    Span::current().record("session_id", sid);
    let Some(session) = st.store.get(sid).await else {
        return session_not_found();
    };
    session.touch();
    match session.handle(msg).await {
        Err(_) => session_not_found(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Ok(Some(resp)) => jsonrpc_reply(StatusCode::OK, &resp, mode, Some(sid)),
    }
}

async fn open_session(st: &HttpState, msg: JsonRpcMessage, mode: ReplyMode) -> Response {
    if !st.accepting_sessions() {
        return shutting_down();
    }
    let mut pending = PendingSession::new(st.cfg.clone(), st.handler.clone());
    let resp = pending.handshake(msg).await;
    let protocol_version = pending.protocol_version().map(str::to_string);

    match pending.publish(&st.store).await {
        Ok(session) => {
            // Teardown flips the phase before it snapshots the store, so a session published
            // after that snapshot is seen here and withdrawn.
            if !st.accepting_sessions() {
                if let Some(s) = st.store.remove(session.id()).await
                    && let Err(e) = s.close()
                {
                    warn!(session_id = %s.id(), error = %e, "session close failed");
                }
                return shutting_down();
            }
            Span::current().record("session_id", session.id());
            info!(
                session_id = %session.id(),
                protocol_version = protocol_version.as_deref().unwrap_or_default(),
                "session opened"
            );
            match resp {
                Some(r) => jsonrpc_reply(StatusCode::OK, &r, mode, Some(session.id())),
                None => StatusCode::ACCEPTED.into_response(),
            }
        }
        Err(e) => {
            warn!(error = %e, "initialize failed; no session created");
            match resp {
                Some(r) => jsonrpc_reply(StatusCode::BAD_REQUEST, &r, mode, None),
                None => router_error(StatusCode::INTERNAL_SERVER_ERROR, -32603, "Internal error"),
            }
        }
    }
}

async fn http_get(State(st): State<HttpState>, headers: HeaderMap) -> Response {
    let span = request_span("GET", &headers);
    async move {
        if let Err(resp) = check_common_headers(&headers) {
            return resp;
        }
        let Some(sid) = header_str(&headers, SESSION_HEADER) else {
            return missing_session();
        };
        if !accepts(&headers, "text/event-stream") {
            return router_error(
                StatusCode::NOT_ACCEPTABLE,
                -32000,
                "Not Acceptable: client must accept text/event-stream",
            );
        }
        Span::current().record("session_id", sid);
        let Some(session) = st.store.get(sid).await else {
            return session_not_found();
        };
        if session.is_closed() {
            return session_not_found();
        }
        session.touch();
        let Some(guard) = session.open_stream() else {
            return router_error(
                StatusCode::CONFLICT,
                -32000,
                "Conflict: only one SSE stream is allowed per session",
            );
        };

        // No server-initiated messages are sent; the stream carries keep-alives until close.
        let mut closed = session.closed_signal();
        let events = futures::stream::once(async move {
            let _guard = guard;
            let _ = closed.wait_for(|c| *c).await;
            None::<Result<Event, Infallible>>
        })
        .filter_map(futures::future::ready);

        let mut resp = Sse::new(events)
            .keep_alive(KeepAlive::new().interval(st.sse_keep_alive))
            .into_response();
        if let Ok(v) = HeaderValue::from_str(sid) {
            resp.headers_mut().insert(SESSION_HEADER, v);
        }
        resp
    }
    .instrument(span)
    .await
}

async fn http_delete(State(st): State<HttpState>, headers: HeaderMap) -> Response {
    let span = request_span("DELETE", &headers);
    async move {
        if let Err(resp) = check_common_headers(&headers) {
            return resp;
        }
        let Some(sid) = header_str(&headers, SESSION_HEADER) else {
            return missing_session();
        };
        Span::current().record("session_id", sid);
        let Some(session) = st.store.remove(sid).await else {
            return session_not_found();
        };
        if let Err(e) = session.close() {
            warn!(session_id = %sid, error = %e, "session close failed");
        }
        info!(session_id = %sid, "session terminated by client");
        StatusCode::OK.into_response()
    }
    .instrument(span)
    .await
}

fn request_span(method: &'static str, headers: &HeaderMap) -> Span {
    let span = info_span!("mcp.http", http.method = method, session_id = field::Empty);
    ipgeo_otel::link_remote_parent(&span, headers);
    span
}

/// Origin and protocol-version checks shared by every method.
fn check_common_headers(headers: &HeaderMap) -> Result<(), Response> {
    if let Err(msg) = validate_origin(headers) {
        return Err(router_error(StatusCode::FORBIDDEN, -32000, msg));
    }
    if let Some(v) = header_str(headers, PROTOCOL_VERSION_HEADER)
        && v.trim().is_empty()
    {
        return Err(router_error(
            StatusCode::BAD_REQUEST,
            -32000,
            "Bad Request: invalid mcp-protocol-version header",
        ));
    }
    Ok(())
}

fn decode_body(body: &str) -> Result<JsonRpcMessage, JsonRpcResponse> {
    let val: Value = serde_json::from_str(body)
        .map_err(|e| protocol_error(-32700, "Parse error", Some(e.to_string())))?;
    if val.is_array() {
        return Err(protocol_error(-32600, "batching not supported", None));
    }
    serde_json::from_value(val)
        .map_err(|e| protocol_error(-32600, "Invalid Request", Some(e.to_string())))
}

fn validate_origin(headers: &HeaderMap) -> Result<(), &'static str> {
    let Some(origin) = header_str(headers, "origin").filter(|s| !s.trim().is_empty()) else {
        return Ok(());
    };

    let u = url::Url::parse(origin).map_err(|_| "Forbidden: invalid origin")?;
    let host = u.host().ok_or("Forbidden: invalid origin")?;
    let is_loopback = match host {
        url::Host::Domain(d) => d.eq_ignore_ascii_case("localhost"),
        url::Host::Ipv4(ip) => ip.is_loopback(),
        url::Host::Ipv6(ip) => ip.is_loopback(),
    };
    if !is_loopback {
        return Err("Forbidden: origin not allowed");
    }
    Ok(())
}

fn media_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn accepted_types(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(media_type)
        .filter(|t| !t.is_empty())
        .collect()
}

fn accepts(headers: &HeaderMap, wanted: &str) -> bool {
    let (kind, _) = wanted.split_once('/').unwrap_or((wanted, ""));
    let kind_wildcard = format!("{kind}/*");
    accepted_types(headers)
        .iter()
        .any(|t| t == wanted || t == "*/*" || *t == kind_wildcard)
}

/// JSON unless the client only takes event streams. `None` when it takes neither.
fn negotiate_reply(headers: &HeaderMap) -> Option<ReplyMode> {
    if accepted_types(headers).is_empty() || accepts(headers, "application/json") {
        Some(ReplyMode::Json)
    } else if accepts(headers, "text/event-stream") {
        Some(ReplyMode::Sse)
    } else {
        None
    }
}

fn router_error(status: StatusCode, code: i64, message: &str) -> Response {
    jsonrpc_reply(status, &protocol_error(code, message, None), ReplyMode::Json, None)
}

fn missing_session() -> Response {
    router_error(
        StatusCode::BAD_REQUEST,
        -32000,
        "Bad Request: No valid session ID provided",
    )
}

fn session_not_found() -> Response {
    router_error(StatusCode::NOT_FOUND, -32001, "Session not found")
}

fn shutting_down() -> Response {
    router_error(
        StatusCode::SERVICE_UNAVAILABLE,
        -32000,
        "Service Unavailable: server is shutting down",
    )
}

fn jsonrpc_reply(
    status: StatusCode,
    resp: &JsonRpcResponse,
    mode: ReplyMode,
    session_id: Option<&str>,
) -> Response {
    let json = match serde_json::to_string(resp) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "serialize jsonrpc response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut builder = Response::builder().status(status);
    let body = match mode {
        ReplyMode::Json => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            json
        }
        ReplyMode::Sse => {
            builder = builder
                .header(CONTENT_TYPE, "text/event-stream")
                .header(CACHE_CONTROL, "no-cache");
            encode_sse_event(Some("message"), &json)
        }
    };

    if let Some(sid) = session_id
        && let Ok(v) = HeaderValue::from_str(sid)
    {
        builder = builder.header(SESSION_HEADER, v);
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}
