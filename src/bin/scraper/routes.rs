use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::routing::post;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tabflow::{Action, Engine, ScreenshotRecord};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::dashboard::DASHBOARD_HTML;
use crate::files::{FileError, ScreenshotStore, content_type};

pub struct AppState {
    pub engine: Engine,
    pub store: ScreenshotStore,
    pub events: broadcast::Sender<ScreenshotRecord>,
    pub started: Instant,
}

type Shared = Arc<AppState>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/executar", post(execute_handler))
        .route(
            "/screenshots",
            get(list_handler).delete(delete_all_handler),
        )
        .route("/screenshots/{filename}", get(file_handler))
        .route("/health", get(health_handler))
        .route("/debug", get(dashboard_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .fallback(not_found_handler)
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn status_handler() -> Json<Value> {
    Json(json!({
        "status": "online",
        "service": "tabflow scraper",
        "timestamp": now(),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "execute": "POST /executar",
            "screenshots": "GET /screenshots",
            "screenshot": "GET /screenshots/{filename}",
            "deleteScreenshots": "DELETE /screenshots",
            "health": "GET /health",
            "debug": "GET /debug",
            "events": "GET /events",
        },
    }))
}

/// Validated `POST /executar` body.
fn parse_request(body: Value) -> Result<(String, Vec<Action>), &'static str> {
    let url = match body.get("url").and_then(Value::as_str) {
        Some(url) if !url.trim().is_empty() => url.to_string(),
        _ => return Err("Field 'url' is required"),
    };
    let actions = match body.get("actions") {
        Some(actions @ Value::Array(_)) => actions.clone(),
        _ => return Err("Field 'actions' must be an array"),
    };
    let actions: Vec<Action> =
        serde_json::from_value(actions).map_err(|_| "Field 'actions' contains an invalid action")?;
    Ok((url, actions))
}

async fn execute_handler(
    State(state): State<Shared>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Rejected request body");
            return error_body(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    let (url, actions) = match parse_request(body) {
        Ok(request) => request,
        Err(message) => return error_body(StatusCode::BAD_REQUEST, message),
    };

    info!(%url, actions = actions.len(), "POST /executar");
    match state.engine.run(&url, &actions).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(failure) => {
            error!(error = %failure, "Run failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Error executing actions",
                    "details": failure.message,
                    "action": failure.action,
                    "screenshots": failure.screenshots,
                })),
            )
                .into_response()
        }
    }
}

async fn list_handler(State(state): State<Shared>) -> Response {
    match state.store.list().await {
        Ok(files) => Json(json!({ "total": files.len(), "screenshots": files })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list screenshots");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list screenshots")
        }
    }
}

async fn delete_all_handler(State(state): State<Shared>) -> Response {
    match state.store.delete_all().await {
        Ok(result) => {
            info!(deleted = result.deleted, total = result.total, "Screenshots deleted");
            Json(json!({
                "message": format!("{} screenshots deleted", result.deleted),
                "deleted": result.deleted,
                "total": result.total,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to delete screenshots");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete screenshots")
        }
    }
}

async fn file_handler(State(state): State<Shared>, Path(filename): Path<String>) -> Response {
    match state.store.read(&filename).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&filename))], bytes).into_response(),
        Err(e @ FileError::NotFound) => error_body(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ (FileError::InvalidName | FileError::Unsupported)) => {
            error_body(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(FileError::Io(e)) => {
            error!(file = %filename, error = %e, "Failed to read screenshot");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read screenshot")
        }
    }
}

async fn health_handler(State(state): State<Shared>) -> Response {
    match state.store.stats().await {
        Ok(stats) => Json(json!({
            "status": "healthy",
            "timestamp": now(),
            "uptime": state.started.elapsed().as_secs_f64(),
            "screenshots": stats,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Health check failed")
        }
    }
}

async fn dashboard_handler() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn sse_handler(
    State(state): State<Shared>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(
        |result: Result<ScreenshotRecord, _>| match result {
            Ok(record) => Event::default()
                .event("screenshot")
                .json_data(&record)
                .ok()
                .map(Ok::<_, Infallible>),
            Err(_) => None,
        },
    );
    Sse::new(stream)
}

async fn not_found_handler(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Route not found",
            "path": uri.path(),
            "timestamp": now(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tabflow::EngineConfig;
    use tabflow::Launcher;
    use tabflow::driver::DriverRef;
    use tower::ServiceExt;

    struct NoBrowser;

    #[async_trait]
    impl Launcher for NoBrowser {
        async fn launch(&self) -> anyhow::Result<DriverRef> {
            anyhow::bail!("chrome not installed")
        }
    }

    fn app(dir: &std::path::Path) -> Router {
        let (events, _) = broadcast::channel(4);
        let config = EngineConfig {
            screenshots_dir: dir.to_path_buf(),
            ..EngineConfig::default()
        };
        router(AppState {
            engine: Engine::new(Arc::new(NoBrowser), config),
            store: ScreenshotStore::new(dir),
            events,
            started: Instant::now(),
        })
    }

    async fn send(app: Router, method: Method, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: Router, method: Method, uri: &str, body: Body) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn status_lists_endpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = send_json(app(tmp.path()), Method::GET, "/", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "online");
        assert_eq!(body["endpoints"]["execute"], "POST /executar");
    }

    #[tokio::test]
    async fn execute_validates_the_body() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = send_json(
            app(tmp.path()),
            Method::POST,
            "/executar",
            Body::from(r#"{"actions":[]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Field 'url' is required");

        let (status, body) = send_json(
            app(tmp.path()),
            Method::POST,
            "/executar",
            Body::from(r#"{"url":"https://example.test","actions":{}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Field 'actions' must be an array");
    }

    #[tokio::test]
    async fn launch_failure_is_a_server_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = send_json(
            app(tmp.path()),
            Method::POST,
            "/executar",
            Body::from(r#"{"url":"https://example.test","actions":[{"type":"wait","seconds":1}]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Error executing actions");
        assert!(body["details"].as_str().unwrap().contains("chrome not installed"));
        assert_eq!(body["screenshots"], json!([]));
    }

    #[tokio::test]
    async fn screenshots_are_listed_served_and_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("x.png"), b"png-bytes").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"text").unwrap();

        let (status, body) =
            send_json(app(tmp.path()), Method::GET, "/screenshots", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["screenshots"][0]["url"], "/screenshots/x.png");

        let (status, bytes) =
            send(app(tmp.path()), Method::GET, "/screenshots/x.png", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"png-bytes");

        let (status, _) =
            send_json(app(tmp.path()), Method::GET, "/screenshots/y.png", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            send_json(app(tmp.path()), Method::GET, "/screenshots/notes.txt", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            send_json(app(tmp.path()), Method::DELETE, "/screenshots", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "1 screenshots deleted");
        assert!(!tmp.path().join("x.png").exists());
    }

    #[tokio::test]
    async fn health_reports_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = send_json(app(tmp.path()), Method::GET, "/health", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["screenshots"]["count"], 0);
        assert_eq!(body["screenshots"]["directoryExists"], true);
    }

    #[tokio::test]
    async fn unknown_routes_echo_the_path() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) =
            send_json(app(tmp.path()), Method::GET, "/nope", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["path"], "/nope");
    }
}
