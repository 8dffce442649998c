//! HTTP surface: one POST endpoint, three operations.
//!
//! The dispatcher routes on the `opr` query parameter: `c` connect,
//! `h` heartbeat, `s` sync, anything else 400. Handlers translate the
//! router's error taxonomy onto wire statuses:
//!
//! | Error                      | Status |
//! |----------------------------|--------|
//! | `Unauthorized`             | 401    |
//! | `InvalidTotp`, `Malformed` | 400    |
//! | `UnknownSubject`           | 500    |
//! | anything else              | 500    |
//!
//! The connect operation answers JSON; heartbeat and sync answer plain
//! text. Request bodies are decoded by hand so a parse failure produces
//! a 400 carrying the decoder's message instead of a transport-level
//! rejection.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::info;

use crate::addr::normalize_rest_path;
use crate::error::RouterError;
use crate::router::ServiceRouter;
use crate::wire::{ConnectRequest, HeartbeatRequest, SyncRequest};

/// Query discriminator shared by all three operations.
#[derive(Debug, Deserialize)]
struct OprQuery {
    #[serde(default)]
    opr: String,
}

/// Builds the axum router exposing the service endpoint under
/// `rest_path` (normalized before mounting).
pub fn http_router(router: Arc<ServiceRouter>, rest_path: &str) -> Router {
    let path = normalize_rest_path(rest_path);
    Router::new().route(&path, post(dispatch)).with_state(router)
}

/// Serves the endpoint on an already-bound listener until `shutdown` is
/// notified. Binding is left to the caller so ephemeral ports can be
/// inspected before the server runs.
pub async fn serve_on(
    listener: TcpListener,
    router: Arc<ServiceRouter>,
    rest_path: &str,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    let device = router.device_uuid().to_string();
    let app = http_router(router, rest_path);
    if let Ok(addr) = listener.local_addr() {
        info!(device = %device, %addr, "service endpoint listening");
    }
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.notified().await })
    .await
}

/// Binds `addr` and serves the endpoint until `shutdown` is notified.
pub async fn serve(
    router: Arc<ServiceRouter>,
    addr: SocketAddr,
    rest_path: &str,
    shutdown: Arc<Notify>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, router, rest_path, shutdown).await
}

// ════════════════════════════════════════════════════════════════════════
// DISPATCH
// ════════════════════════════════════════════════════════════════════════

async fn dispatch(
    State(router): State<Arc<ServiceRouter>>,
    ConnectInfo(source): ConnectInfo<SocketAddr>,
    Query(query): Query<OprQuery>,
    body: Bytes,
) -> Response {
    match query.opr.as_str() {
        "c" => connect_op(&router, source, &body),
        "h" => heartbeat_op(&router, source, &body),
        "s" => sync_op(&router, &body),
        _ => (StatusCode::BAD_REQUEST, "400 - Bad Request").into_response(),
    }
}

fn connect_op(router: &ServiceRouter, source: SocketAddr, body: &[u8]) -> Response {
    let request: ConnectRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match router.handle_connect(source, &request) {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(err) => error_response(err),
    }
}

fn heartbeat_op(router: &ServiceRouter, source: SocketAddr, body: &[u8]) -> Response {
    let request: HeartbeatRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match router.handle_heartbeat(source, &request) {
        Ok(reflection) => (StatusCode::OK, reflection).into_response(),
        Err(err) => error_response(err),
    }
}

fn sync_op(router: &ServiceRouter, body: &[u8]) -> Response {
    let request: SyncRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match router.handle_sync(&request) {
        Ok(address) => (StatusCode::OK, address).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: RouterError) -> Response {
    let status = match err {
        RouterError::Unauthorized => StatusCode::UNAUTHORIZED,
        RouterError::InvalidTotp | RouterError::Malformed(_) => StatusCode::BAD_REQUEST,
        RouterError::UnknownSubject(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;
    use crate::totp;
    use crate::wire::ConnectResponse;

    async fn spawn_endpoint(router: Arc<ServiceRouter>) -> (SocketAddr, Arc<Notify>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = Arc::new(Notify::new());
        tokio::spawn(serve_on(
            listener,
            router,
            "/ddns",
            Arc::clone(&shutdown),
        ));
        (addr, shutdown)
    }

    fn validated_router(uuid: &str) -> Arc<ServiceRouter> {
        let r = ServiceRouter::new(RouterConfig::new(uuid)).expect("router");
        r.set_validator(Arc::new(|user, pass| user == "user" && pass == "123456"));
        r
    }

    #[tokio::test]
    async fn test_unknown_operation_is_bad_request() {
        let (addr, shutdown) = spawn_endpoint(validated_router("device-a")).await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/ddns?opr=z"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status().as_u16(), 400);
        shutdown.notify_one();
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (addr, shutdown) = spawn_endpoint(validated_router("device-a")).await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/ddns?opr=c"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status().as_u16(), 400);
        shutdown.notify_one();
    }

    #[tokio::test]
    async fn test_connect_issues_secret_and_reflects_source() {
        let router = validated_router("device-a");
        let (addr, shutdown) = spawn_endpoint(Arc::clone(&router)).await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/ddns?opr=c"))
            .json(&serde_json::json!({
                "NodeUUID": "device-b",
                "Username": "user",
                "Password": "123456",
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status().as_u16(), 200);
        let payload: ConnectResponse = resp.json().await.expect("payload");
        assert_eq!(payload.totp_secret.len(), 8);
        assert!(payload.reflection_ip.starts_with("127.0.0.1:"));
        assert!(router.has_session("device-b"));
        shutdown.notify_one();
    }

    #[tokio::test]
    async fn test_connect_wrong_password_is_unauthorized() {
        let (addr, shutdown) = spawn_endpoint(validated_router("device-a")).await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/ddns?opr=c"))
            .json(&serde_json::json!({
                "NodeUUID": "device-b",
                "Username": "user",
                "Password": "wrong",
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status().as_u16(), 401);
        shutdown.notify_one();
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_peer_is_unauthorized() {
        let (addr, shutdown) = spawn_endpoint(validated_router("device-a")).await;
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/ddns?opr=h"))
            .json(&serde_json::json!({
                "NodeUUID": "stranger",
                "TOTP": "123456",
                "IPADDR": "",
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status().as_u16(), 401);
        shutdown.notify_one();
    }

    #[tokio::test]
    async fn test_sync_unknown_subject_is_server_error() {
        let router = validated_router("device-a");
        router
            .table
            .write()
            .replace_issued_secret("device-b", "JBSWY3DP".to_string());
        let (addr, shutdown) = spawn_endpoint(router).await;
        let code = totp::code_at("JBSWY3DP", crate::now_unix()).expect("code");
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/ddns?opr=s"))
            .json(&serde_json::json!({
                "NodeUUID": "device-b",
                "TOTP": code,
                "AskingUUID": "nobody",
            }))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status().as_u16(), 500);
        shutdown.notify_one();
    }
}
