//! Scripted in-memory backend for pipeline tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::backend::{
    BackendError, BulkPlacementRequest, PlacementRequest, StowageBackend, routes,
};
use crate::model::SuggestionParams;

fn offline(endpoint: &'static str) -> Result<Value, BackendError> {
    Err(transport_error(endpoint))
}

/// Answers each call from a script and records the call sequence.
///
/// `containers` answers are consumed in order; the last one repeats.
/// Single placements answer per item id, defaulting to `{success: true}`.
pub struct FakeBackend {
    containers: Vec<Result<Value, BackendError>>,
    primary: Result<Value, BackendError>,
    legacy: Result<Value, BackendError>,
    bulk: Result<Value, BackendError>,
    single: HashMap<String, Result<Value, BackendError>>,
    calls: Mutex<Vec<String>>,
    container_reads: Mutex<usize>,
    bulk_requests: Mutex<Vec<BulkPlacementRequest>>,
}

impl FakeBackend {
    /// Every endpoint offline except single placement, which succeeds.
    pub fn new() -> Self {
        Self {
            containers: vec![offline(routes::CONTAINERS)],
            primary: offline(routes::PRIMARY_SUGGESTIONS),
            legacy: offline(routes::LEGACY_SUGGESTIONS),
            bulk: offline(routes::BULK_PLACEMENT),
            single: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            container_reads: Mutex::new(0),
            bulk_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_containers(mut self, answer: Result<Value, BackendError>) -> Self {
        self.containers = vec![answer];
        self
    }

    /// Answers for successive inventory reads.
    pub fn with_container_sequence(mut self, answers: Vec<Result<Value, BackendError>>) -> Self {
        self.containers = answers;
        self
    }

    pub fn with_primary(mut self, answer: Result<Value, BackendError>) -> Self {
        self.primary = answer;
        self
    }

    pub fn with_legacy(mut self, answer: Result<Value, BackendError>) -> Self {
        self.legacy = answer;
        self
    }

    pub fn with_bulk(mut self, answer: Result<Value, BackendError>) -> Self {
        self.bulk = answer;
        self
    }

    pub fn with_single(mut self, item_id: &str, answer: Result<Value, BackendError>) -> Self {
        self.single.insert(item_id.to_string(), answer);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bulk_requests(&self) -> Vec<BulkPlacementRequest> {
        self.bulk_requests.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

pub fn transport_error(endpoint: &'static str) -> BackendError {
    BackendError::Transport {
        endpoint,
        message: "connection refused".to_string(),
    }
}

#[async_trait]
impl StowageBackend for FakeBackend {
    async fn containers(&self, cache_bust: Option<u128>) -> Result<Value, BackendError> {
        self.record(if cache_bust.is_some() {
            "containers?cache_bust"
        } else {
            "containers"
        });
        let mut reads = self.container_reads.lock().unwrap();
        let index = (*reads).min(self.containers.len().saturating_sub(1));
        *reads += 1;
        self.containers
            .get(index)
            .cloned()
            .unwrap_or_else(|| offline(routes::CONTAINERS))
    }

    async fn primary_suggestions(&self, _params: &SuggestionParams) -> Result<Value, BackendError> {
        self.record("primary");
        self.primary.clone()
    }

    async fn legacy_suggestions(&self, _params: &SuggestionParams) -> Result<Value, BackendError> {
        self.record("legacy");
        self.legacy.clone()
    }

    async fn place_bulk(&self, request: &BulkPlacementRequest) -> Result<Value, BackendError> {
        self.record("bulk");
        self.bulk_requests.lock().unwrap().push(request.clone());
        self.bulk.clone()
    }

    async fn place_item(&self, request: &PlacementRequest) -> Result<Value, BackendError> {
        self.record(format!("place:{}", request.item_id));
        self.single
            .get(&request.item_id)
            .cloned()
            .unwrap_or_else(|| Ok(json!({"success": true, "message": "placed"})))
    }
}
