//! `BoardcastServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRef, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use boardcast_hub::{Hub, serve_connection};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{AuthManager, Authenticated};
use crate::config::ServerConfig;
use crate::errors::ApiError;
use crate::health::{self, HealthResponse};
use crate::metrics::{self as server_metrics, AUTH_ATTEMPTS_TOTAL};
use crate::shutdown::ShutdownCoordinator;

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub owning content and connections.
    pub hub: Arc<Hub>,
    /// Password check and cookie key.
    pub auth: Arc<AuthManager>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Max inbound WebSocket message size.
    pub max_message_size: usize,
}

impl FromRef<AppState> for Arc<AuthManager> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.auth)
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.auth.key().clone()
    }
}

/// The boardcast HTTP server.
pub struct BoardcastServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    auth: Arc<AuthManager>,
    metrics: PrometheusHandle,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl BoardcastServer {
    /// Create a new server around an initialized hub.
    pub fn new(
        config: ServerConfig,
        hub: Arc<Hub>,
        auth: AuthManager,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            config,
            hub,
            auth: Arc::new(auth),
            metrics,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            auth: Arc::clone(&self.auth),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/", get(index_handler))
            .route("/auth", post(auth_handler))
            .route("/logout", post(logout_handler))
            .route("/ws", get(ws_handler))
            .route("/content", get(content_handler))
            .route("/save", post(save_handler))
            .route("/restore", post(restore_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve in a background task.
    ///
    /// Returns the bound address and the server task. The task finishes once
    /// the shutdown token is cancelled and in-flight requests complete.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "http server failed");
            }
            info!("http server stopped");
        });

        info!(%addr, "boardcast listening");
        Ok((addr, handle))
    }

    /// Get the hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Deserialize)]
struct AuthRequest {
    password: String,
}

/// GET /
async fn index_handler() -> Html<String> {
    Html(INDEX_HTML.replace("{{VERSION}}", env!("CARGO_PKG_VERSION")))
}

/// POST /auth
async fn auth_handler(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<(SignedCookieJar, &'static str), ApiError> {
    let request: AuthRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest)?;
    if !state.auth.verify(request.password).await? {
        counter!(AUTH_ATTEMPTS_TOTAL, "result" => "rejected").increment(1);
        warn!("login rejected");
        return Err(ApiError::InvalidPassword);
    }
    counter!(AUTH_ATTEMPTS_TOTAL, "result" => "ok").increment(1);
    info!("login accepted");
    Ok((jar.add(AuthManager::session_cookie()), "authenticated"))
}

/// POST /logout
async fn logout_handler(jar: SignedCookieJar) -> (SignedCookieJar, &'static str) {
    (jar.remove(AuthManager::removal_cookie()), "logged out")
}

/// GET /ws
async fn ws_handler(
    _auth: Authenticated,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| serve_connection(hub, socket))
}

/// GET /content
async fn content_handler(
    _auth: Authenticated,
    State(state): State<AppState>,
) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.hub.content().to_string(),
    )
}

/// POST /save
async fn save_handler(
    _auth: Authenticated,
    State(state): State<AppState>,
) -> Result<&'static str, ApiError> {
    let _ = state.hub.save_snapshot().await.map_err(ApiError::Save)?;
    Ok("saved")
}

/// POST /restore
async fn restore_handler(
    _auth: Authenticated,
    State(state): State<AppState>,
) -> Result<&'static str, ApiError> {
    let _ = state.hub.restore_snapshot().await.map_err(ApiError::Restore)?;
    Ok("restored")
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
        state.hub.dropped_broadcasts(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        server_metrics::render(&state.metrics),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use boardcast_hub::{HubConfig, SnapshotManager};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    const PASSWORD: &str = "letmein";

    fn make_server(dir: &tempfile::TempDir) -> BoardcastServer {
        let hub = Arc::new(Hub::new(
            HubConfig::default(),
            SnapshotManager::new(dir.path().join("board.txt")),
        ));
        let auth = AuthManager::with_cost(PASSWORD, 4).unwrap();
        let handle = PrometheusBuilder::new().build_recorder().handle();
        BoardcastServer::new(ServerConfig::default(), hub, auth, handle)
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Log in and return the `name=value` cookie pair.
    async fn login(app: &Router) -> String {
        let body = format!(r#"{{"password":"{PASSWORD}"}}"#);
        let resp = app.clone().oneshot(post("/auth", &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_owned();
        cookie.split(';').next().unwrap().to_owned()
    }

    #[tokio::test]
    async fn index_serves_page() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_text(resp).await;
        assert!(page.contains("/ws"));
        assert!(page.contains(env!("CARGO_PKG_VERSION")));
        assert!(!page.contains("{{VERSION}}"));
    }

    #[tokio::test]
    async fn index_has_preview_theme_and_divider() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let page = body_text(resp).await;
        for needle in [
            "marked.parse",
            "DOMPurify.sanitize",
            "id=\"preview\"",
            "id=\"divider\"",
            "id=\"theme\"",
            "localStorage.setItem('theme'",
        ] {
            assert!(page.contains(needle), "page is missing {needle}");
        }
    }

    #[tokio::test]
    async fn auth_accepts_correct_password() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let body = format!(r#"{{"password":"{PASSWORD}"}}"#);
        let resp = app.oneshot(post("/auth", &body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_owned();
        assert!(cookie.starts_with("boardcast-session="));
        assert!(cookie.contains("HttpOnly"));
        assert_eq!(body_text(resp).await, "authenticated");
    }

    #[tokio::test]
    async fn auth_rejects_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let resp = app
            .oneshot(post("/auth", r#"{"password":"nope"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_text(resp).await, "Invalid password");
    }

    #[tokio::test]
    async fn auth_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        for body in ["not json", "{}", r#"{"password":42}"#] {
            let resp = app.clone().oneshot(post("/auth", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body:?}");
        }
    }

    #[tokio::test]
    async fn post_only_routes_reject_get() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        for uri in ["/auth", "/logout", "/save", "/restore"] {
            let resp = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED, "{uri}");
        }
    }

    #[tokio::test]
    async fn protected_routes_require_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let requests = [
            Request::get("/content").body(Body::empty()).unwrap(),
            Request::get("/ws").body(Body::empty()).unwrap(),
            post("/save", ""),
            post("/restore", ""),
        ];
        for req in requests {
            let uri = req.uri().clone();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn forged_cookie_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let resp = app
            .oneshot(get_with_cookie("/content", "boardcast-session=authenticated"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn content_returns_plain_text_after_login() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(&dir);
        let app = server.router();
        let cookie = login(&app).await;

        let _ = server.hub().ingest(&"someone".into(), "shared text");
        let resp = app
            .oneshot(get_with_cookie("/content", &cookie))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(resp).await, "shared text");
    }

    #[tokio::test]
    async fn save_and_restore_through_http() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(&dir);
        let app = server.router();
        let cookie = login(&app).await;
        let with_cookie = |uri: &str| {
            Request::post(uri)
                .header(header::COOKIE, cookie.as_str())
                .body(Body::empty())
                .unwrap()
        };

        let _ = server.hub().ingest(&"a".into(), "keep me");
        let resp = app.clone().oneshot(with_cookie("/save")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let saved = std::fs::read_to_string(dir.path().join("board.txt")).unwrap();
        assert_eq!(saved, "keep me");

        let _ = server.hub().ingest(&"a".into(), "scratch");
        let resp = app.clone().oneshot(with_cookie("/restore")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&*server.hub().content(), "keep me");
    }

    #[tokio::test]
    async fn restore_without_snapshot_is_500() {
        let dir = tempfile::tempdir().unwrap();
        let server = make_server(&dir);
        let app = server.router();
        let cookie = login(&app).await;
        let _ = server.hub().ingest(&"a".into(), "live");

        let req = Request::post("/restore")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&*server.hub().content(), "live");
    }

    #[tokio::test]
    async fn logout_clears_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let cookie = login(&app).await;
        let req = Request::post("/logout")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let removal = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_owned();
        assert!(removal.starts_with("boardcast-session="));
        assert!(removal.contains("Max-Age=0"));
        assert_eq!(body_text(resp).await, "logged out");
    }

    #[tokio::test]
    async fn health_endpoint_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_is_public() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_server(&dir).router();
        let resp = app
            .oneshot(Request::get("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
