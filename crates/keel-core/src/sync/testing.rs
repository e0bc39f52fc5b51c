//! In-process transport routing requests to a [`SnapshotService`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::server::{CollectionPush, SnapshotService};
use crate::error::Error;
use crate::models::{CollectionKind, Snapshot};
use crate::transport::{Method, Transport, TransportError, TransportRequest, TransportResponse};

pub(crate) struct ServiceTransport {
    service: Arc<SnapshotService>,
    origin: String,
    online: AtomicBool,
    calls: Mutex<Vec<TransportRequest>>,
}

impl ServiceTransport {
    pub(crate) fn new(service: Arc<SnapshotService>, origin: &str) -> Self {
        Self {
            service,
            origin: origin.to_string(),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    async fn route(&self, request: &TransportRequest) -> Result<Value, Error> {
        let segments: Vec<&str> = request
            .path
            .trim_matches('/')
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let body = request.body.clone().unwrap_or(Value::Null);
        let origin = self.origin.as_str();

        match (request.method, segments.as_slice()) {
            (Method::Get | Method::Head, ["sync-status"]) => Ok(json!({"enabled": true})),
            (Method::Get, ["sync"]) => Ok(serde_json::to_value(self.service.snapshot().await?)?),
            (Method::Put, ["sync"]) => {
                let snapshot: Snapshot = serde_json::from_value(body)
                    .map_err(|error| Error::InvalidInput(error.to_string()))?;
                self.service.accept_snapshot(snapshot, origin).await?;
                Ok(json!({"status": "ok"}))
            }
            (method, ["sync", collection, rest @ ..]) => {
                let kind: CollectionKind = collection.parse()?;
                match (method, rest) {
                    (Method::Get, []) => Ok(Value::Array(self.service.collection(kind).await?)),
                    (Method::Put, []) => {
                        let push: CollectionPush = serde_json::from_value(body)
                            .map_err(|error| Error::InvalidInput(error.to_string()))?;
                        self.service.accept_collection(kind, push, origin).await?;
                        Ok(json!({"status": "ok"}))
                    }
                    (Method::Post, []) => self.service.upsert_record(kind, body, origin, "POST").await,
                    (Method::Put, [_id]) => self.service.upsert_record(kind, body, origin, "PUT").await,
                    (Method::Delete, [id]) => {
                        self.service.delete_record(kind, id, origin).await?;
                        Ok(json!({"status": "ok"}))
                    }
                    _ => Err(Error::NotFound(request.path.clone())),
                }
            }
            _ => Err(Error::NotFound(request.path.clone())),
        }
    }
}

#[async_trait]
impl Transport for ServiceTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Network("server unreachable".into()));
        }
        Ok(match self.route(&request).await {
            Ok(body) => TransportResponse::ok(body),
            Err(Error::InvalidInput(message)) => {
                TransportResponse::new(400, json!({"error": message}))
            }
            Err(Error::NotFound(message)) => TransportResponse::new(404, json!({"error": message})),
            Err(error) => TransportResponse::new(500, json!({"error": error.to_string()})),
        })
    }
}
