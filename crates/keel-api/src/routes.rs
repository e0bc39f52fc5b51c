use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use keel_core::config::SyncRole;
use keel_core::db::{Database, LibSqlSnapshotStore};
use keel_core::storage::{MemorySnapshotStore, SnapshotStore};
use keel_core::sync::{CollectionPush, SnapshotService, SyncLogEntry};
use keel_core::{CollectionKind, EventBus, Snapshot};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;

/// Full snapshots can be large; the axum default of 2 MB is too small.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    service: Arc<SnapshotService>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, service: Arc<SnapshotService>) -> Self {
        Self {
            config,
            service,
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the authoritative store named by the config, in memory when no
    /// database path is set.
    pub async fn from_config(config: Arc<AppConfig>) -> keel_core::Result<Self> {
        let store: Arc<dyn SnapshotStore> = match &config.database_path {
            Some(path) => {
                let db = Database::open(path).await?;
                tracing::info!(path = %path.display(), "Opened snapshot database");
                Arc::new(LibSqlSnapshotStore::new(Arc::new(db)))
            }
            None => {
                tracing::warn!("KEEL_API_DATABASE_PATH not set, data is kept in memory only");
                Arc::new(MemorySnapshotStore::new())
            }
        };
        let service = SnapshotService::new(store, EventBus::default())
            .with_log_capacity(config.sync_log_capacity);
        Ok(Self::new(config, Arc::new(service)))
    }

    fn ensure_enabled(&self) -> Result<(), AppError> {
        if self.config.sync_enabled {
            Ok(())
        } else {
            Err(AppError::SyncDisabled)
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Record the outcome of a write for `/sync-status`.
    fn remember<T>(&self, result: keel_core::Result<T>) -> Result<T, AppError> {
        let mut last_error = self
            .last_error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match result {
            Ok(value) => {
                *last_error = None;
                Ok(value)
            }
            Err(error) => {
                *last_error = Some(error.to_string());
                Err(error.into())
            }
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sync-status", get(sync_status))
        .route("/sync-log", get(sync_log))
        .route("/sync", get(get_snapshot).put(put_snapshot))
        .route(
            "/sync/{collection}",
            get(get_collection).put(put_collection).post(post_record),
        )
        .route("/sync/{collection}/{id}", put(put_record).delete(delete_record))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

/// Address of the peer that issued a request: the first `X-Forwarded-For`
/// hop when present, else the socket address.
pub struct Origin(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Origin {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(Self(
            forwarded
                .or(peer)
                .unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    /// Last accepted write, epoch milliseconds
    last: Option<i64>,
    error: Option<String>,
    enabled: bool,
}

async fn sync_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        last: state
            .service
            .last_accepted()
            .map(|time| time.timestamp_millis()),
        error: state.last_error(),
        enabled: state.config.sync_enabled,
    })
}

async fn sync_log(State(state): State<AppState>) -> Result<Json<Vec<SyncLogEntry>>, AppError> {
    if state.config.role != SyncRole::Server {
        return Err(AppError::not_found("sync log is only kept in the server role"));
    }
    Ok(Json(state.service.sync_log()))
}

fn ok() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

fn parse_body<T: serde::de::DeserializeOwned>(
    body: Result<Json<Value>, JsonRejection>,
) -> Result<T, AppError> {
    let Json(body) = body?;
    serde_json::from_value(body).map_err(|error| AppError::BadRequest(error.to_string()))
}

async fn get_snapshot(State(state): State<AppState>) -> Result<Json<Snapshot>, AppError> {
    state.ensure_enabled()?;
    Ok(Json(state.service.snapshot().await?))
}

async fn put_snapshot(
    State(state): State<AppState>,
    Origin(origin): Origin,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.ensure_enabled()?;
    let snapshot: Snapshot = parse_body(body)?;
    let report = state.remember(state.service.accept_snapshot(snapshot, &origin).await)?;
    tracing::info!(
        endpoint = "put_snapshot",
        %origin,
        records = report.records,
        removed = report.removed,
        "Accepted snapshot push"
    );
    Ok(ok())
}

async fn get_collection(
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> Result<Json<Vec<Value>>, AppError> {
    state.ensure_enabled()?;
    let kind: CollectionKind = collection.parse()?;
    Ok(Json(state.service.collection(kind).await?))
}

async fn put_collection(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Origin(origin): Origin,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.ensure_enabled()?;
    let kind: CollectionKind = collection.parse()?;
    let push: CollectionPush = parse_body(body)?;
    state.remember(state.service.accept_collection(kind, push, &origin).await)?;
    Ok(ok())
}

async fn post_record(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Origin(origin): Origin,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.ensure_enabled()?;
    let kind: CollectionKind = collection.parse()?;
    let Json(record) = body?;
    let stored = state.remember(state.service.upsert_record(kind, record, &origin, "POST").await)?;
    Ok(Json(stored))
}

async fn put_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Origin(origin): Origin,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    state.ensure_enabled()?;
    let kind: CollectionKind = collection.parse()?;
    let Json(mut record) = body?;
    let Some(object) = record.as_object_mut() else {
        return Err(AppError::BadRequest("record must be a JSON object".to_string()));
    };
    match object.get("id").and_then(Value::as_str) {
        Some(body_id) if body_id != id => {
            return Err(AppError::BadRequest(format!(
                "record id {body_id} does not match path id {id}"
            )));
        }
        Some(_) => {}
        None => {
            object.insert("id".to_string(), Value::String(id));
        }
    }
    let stored = state.remember(state.service.upsert_record(kind, record, &origin, "PUT").await)?;
    Ok(Json(stored))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Origin(origin): Origin,
) -> Result<Json<Value>, AppError> {
    state.ensure_enabled()?;
    let kind: CollectionKind = collection.parse()?;
    state.remember(state.service.delete_record(kind, &id, &origin).await)?;
    Ok(ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn state_with(config: AppConfig) -> AppState {
        let service = SnapshotService::new(Arc::new(MemorySnapshotStore::new()), EventBus::default());
        AppState::new(Arc::new(config), Arc::new(service))
    }

    fn test_state() -> AppState {
        state_with(AppConfig::default())
    }

    async fn send(
        state: &AppState,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "10.0.0.7");
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app_router(state.clone())
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let (status, body) = send(&test_state(), Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn snapshot_push_then_pull_scrubs_private_settings() {
        let state = test_state();
        let push = json!({
            "tasks": [{"id": "t1", "title": "Plan", "updatedAt": "2024-05-01T10:00:00Z"}],
            "settings": {"theme": "dark", "syncServerUrl": "http://peer", "apiKey": "secret"},
        });
        let (status, body) = send(&state, Method::PUT, "/sync", Some(push)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));

        let (status, snapshot) = send(&state, Method::GET, "/sync", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["tasks"][0]["id"], "t1");
        assert_eq!(snapshot["settings"], json!({"theme": "dark"}));

        let (_, log) = send(&state, Method::GET, "/sync-log", None).await;
        assert_eq!(log[0]["originAddress"], "10.0.0.7");
        assert_eq!(log[0]["method"], "PUT");
    }

    #[tokio::test]
    async fn malformed_pushes_are_rejected() {
        let state = test_state();
        let (status, _) = send(&state, Method::PUT, "/sync", Some(json!({"tasks": "nope"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &state,
            Method::PUT,
            "/sync/tasks",
            Some(json!([{"title": "no id"}])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, Method::GET, "/sync/widgets", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, sync_status) = send(&state, Method::GET, "/sync-status", None).await;
        assert!(sync_status["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn collection_push_accepts_array_or_deletions() {
        let state = test_state();
        let (status, _) = send(
            &state,
            Method::PUT,
            "/sync/notes",
            Some(json!([
                {"id": "n1", "updatedAt": "2024-05-01T10:00:00Z"},
                {"id": "n2", "updatedAt": "2024-05-01T10:00:00Z"}
            ])),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &state,
            Method::PUT,
            "/sync/notes",
            Some(json!({
                "records": [],
                "deletions": [{"type": "note", "id": "n1", "deletedAt": "2024-05-02T00:00:00Z"}]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, notes) = send(&state, Method::GET, "/sync/notes", None).await;
        let ids: Vec<&str> = notes
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|note| note["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["n2"]);
    }

    #[tokio::test]
    async fn record_endpoints_upsert_and_delete() {
        let state = test_state();
        let (status, stored) = send(
            &state,
            Method::POST,
            "/sync/tasks",
            Some(json!({"id": "t1", "title": "first"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["title"], "first");

        let (status, stored) = send(
            &state,
            Method::PUT,
            "/sync/tasks/t1",
            Some(json!({"title": "renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["id"], "t1");

        let (status, _) = send(
            &state,
            Method::PUT,
            "/sync/tasks/t1",
            Some(json!({"id": "t2"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&state, Method::DELETE, "/sync/tasks/t1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, tasks) = send(&state, Method::GET, "/sync/tasks", None).await;
        assert_eq!(tasks, json!([]));
    }

    #[tokio::test]
    async fn status_answers_head_and_get() {
        let state = test_state();
        let (status, body) = send(&state, Method::HEAD, "/sync-status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::Null);

        let (_, body) = send(&state, Method::GET, "/sync-status", None).await;
        assert_eq!(body, json!({"last": null, "error": null, "enabled": true}));

        let before = Utc::now().timestamp_millis();
        let (status, _) = send(&state, Method::PUT, "/sync", Some(json!({"tasks": []}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&state, Method::GET, "/sync-status", None).await;
        let last = body["last"].as_i64().unwrap();
        assert!(last >= before);
        assert!(last <= Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn disabled_server_refuses_sync() {
        let state = state_with(AppConfig {
            sync_enabled: false,
            ..AppConfig::default()
        });
        let (status, _) = send(&state, Method::GET, "/sync", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (_, body) = send(&state, Method::GET, "/sync-status", None).await;
        assert_eq!(body["enabled"], false);
    }

    #[tokio::test]
    async fn sync_log_is_hidden_outside_server_role() {
        let state = state_with(AppConfig {
            role: SyncRole::Client,
            ..AppConfig::default()
        });
        let (status, _) = send(&state, Method::GET, "/sync-log", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
