//! Client for the external placement backend.
//!
//! Every call the engine makes goes through the [`StowageBackend`] trait. The
//! HTTP implementation returns raw JSON bodies; shape interpretation happens in
//! the stage that owns the payload, so protocol drift never surfaces here as
//! anything but a [`BackendError::Decode`].

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::BackendConfig;
use crate::model::SuggestionParams;

/// Backend routes, relative to the configured base URL.
pub mod routes {
    pub const CONTAINERS: &str = "/api/containers";
    pub const PRIMARY_SUGGESTIONS: &str = "/api/rearrangement/recommendation";
    pub const LEGACY_SUGGESTIONS: &str = "/api/rearrange";
    pub const BULK_PLACEMENT: &str = "/api/placement";
    pub const SINGLE_PLACEMENT: &str = "/api/place";
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    #[error("{endpoint} answered with HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("{endpoint} returned an undecodable body: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

/// Batch placement request (`rearrangement: true` marks it as a move, not an import).
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BulkPlacementRequest {
    pub items: Vec<BulkPlacementItem>,
    pub rearrangement: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BulkPlacementItem {
    pub id: String,
    #[serde(rename = "containerId")]
    pub container_id: String,
    pub auto_position: bool,
}

/// Single-item placement request. Coordinates are left at the origin so the
/// backend chooses the position.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlacementRequest {
    pub item_id: String,
    pub container_id: String,
    pub position_x: f64,
    pub position_y: f64,
    pub position_z: f64,
    pub user_id: String,
}

#[async_trait]
pub trait StowageBackend: Send + Sync {
    /// Inventory read. `cache_bust` is appended as a throwaway query value.
    async fn containers(&self, cache_bust: Option<u128>) -> Result<Value, BackendError>;

    async fn primary_suggestions(&self, params: &SuggestionParams) -> Result<Value, BackendError>;

    async fn legacy_suggestions(&self, params: &SuggestionParams) -> Result<Value, BackendError>;

    async fn place_bulk(&self, request: &BulkPlacementRequest) -> Result<Value, BackendError>;

    async fn place_item(&self, request: &PlacementRequest) -> Result<Value, BackendError>;
}

fn user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    format!("stowage-rearranger/{version} ({os}; {arch})")
}

/// reqwest-backed implementation talking to the real service.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    async fn send(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, BackendError> {
        let response = request
            .send()
            .await
            .map_err(|err| BackendError::Transport {
                endpoint,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unreadable body>"));
            return Err(BackendError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|err| BackendError::Decode {
                endpoint,
                message: err.to_string(),
            })?;
        debug!(endpoint, status = status.as_u16(), "backend call completed");
        Ok(body)
    }
}

#[async_trait]
impl StowageBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn containers(&self, cache_bust: Option<u128>) -> Result<Value, BackendError> {
        let mut request = self.client.get(self.url(routes::CONTAINERS));
        if let Some(stamp) = cache_bust {
            request = request.query(&[("_", stamp.to_string())]);
        }
        self.send(routes::CONTAINERS, request).await
    }

    #[instrument(skip(self))]
    async fn primary_suggestions(&self, params: &SuggestionParams) -> Result<Value, BackendError> {
        let request = self
            .client
            .get(self.url(routes::PRIMARY_SUGGESTIONS))
            .query(params);
        self.send(routes::PRIMARY_SUGGESTIONS, request).await
    }

    #[instrument(skip(self))]
    async fn legacy_suggestions(&self, params: &SuggestionParams) -> Result<Value, BackendError> {
        let request = self
            .client
            .post(self.url(routes::LEGACY_SUGGESTIONS))
            .json(params);
        self.send(routes::LEGACY_SUGGESTIONS, request).await
    }

    #[instrument(skip(self, request), fields(items = request.items.len()))]
    async fn place_bulk(&self, request: &BulkPlacementRequest) -> Result<Value, BackendError> {
        let builder = self
            .client
            .post(self.url(routes::BULK_PLACEMENT))
            .json(request);
        self.send(routes::BULK_PLACEMENT, builder).await
    }

    #[instrument(skip(self, request), fields(item = %request.item_id))]
    async fn place_item(&self, request: &PlacementRequest) -> Result<Value, BackendError> {
        let builder = self
            .client
            .post(self.url(routes::SINGLE_PLACEMENT))
            .json(request);
        self.send(routes::SINGLE_PLACEMENT, builder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::extract::{Json, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("ephemeral port should be available");
        let addr = listener.local_addr().expect("listener has an address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{}", addr)
    }

    fn backend_for(base_url: &str) -> HttpBackend {
        HttpBackend::new(&BackendConfig::new(base_url, Duration::from_secs(5)))
            .expect("client should build")
    }

    fn fake_backend_router() -> Router {
        Router::new()
            .route(
                routes::CONTAINERS,
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    Json(json!({
                        "containers": [{"id": "C1", "capacity": 10, "total_items": 4}],
                        "cache_busted": query.contains_key("_"),
                    }))
                }),
            )
            .route(
                routes::PRIMARY_SUGGESTIONS,
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    Json(json!({ "echo": query }))
                }),
            )
            .route(
                routes::LEGACY_SUGGESTIONS,
                post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "legacy offline") }),
            )
            .route(
                routes::BULK_PLACEMENT,
                post(|Json(body): Json<Value>| async move { Json(json!({ "received": body })) }),
            )
            .route(routes::SINGLE_PLACEMENT, post(|| async { "not json" }))
    }

    #[tokio::test]
    async fn inventory_read_appends_cache_buster_only_when_requested() {
        let backend = backend_for(&serve(fake_backend_router()).await);

        let plain = backend.containers(None).await.expect("inventory read");
        assert_eq!(plain["cache_busted"], json!(false));
        assert_eq!(plain["containers"][0]["id"], json!("C1"));

        let busted = backend.containers(Some(1_700_000_000_000)).await.expect("inventory read");
        assert_eq!(busted["cache_busted"], json!(true));
    }

    #[tokio::test]
    async fn primary_suggestions_send_params_as_query() {
        let backend = backend_for(&serve(fake_backend_router()).await);
        let params = SuggestionParams {
            priority_threshold: 7.5,
            max_movements: 3,
            space_target: 0.5,
        };

        let body = backend.primary_suggestions(&params).await.expect("suggestions");
        assert_eq!(body["echo"]["priority_threshold"], json!("7.5"));
        assert_eq!(body["echo"]["max_movements"], json!("3"));
        assert_eq!(body["echo"]["space_target"], json!("0.5"));
    }

    #[tokio::test]
    async fn bulk_request_uses_backend_field_names() {
        let backend = backend_for(&serve(fake_backend_router()).await);
        let request = BulkPlacementRequest {
            items: vec![BulkPlacementItem {
                id: "I1".to_string(),
                container_id: "C2".to_string(),
                auto_position: true,
            }],
            rearrangement: true,
        };

        let body = backend.place_bulk(&request).await.expect("bulk placement");
        assert_eq!(
            body["received"],
            json!({
                "items": [{"id": "I1", "containerId": "C2", "auto_position": true}],
                "rearrangement": true
            })
        );
    }

    #[tokio::test]
    async fn non_success_status_and_bad_bodies_map_to_errors() {
        let backend = backend_for(&serve(fake_backend_router()).await);

        let err = backend
            .legacy_suggestions(&SuggestionParams::default())
            .await
            .expect_err("legacy endpoint answers 500");
        assert_eq!(
            err,
            BackendError::Status {
                endpoint: routes::LEGACY_SUGGESTIONS,
                status: 500,
                body: "legacy offline".to_string(),
            }
        );

        let request = PlacementRequest {
            item_id: "I1".to_string(),
            container_id: "C2".to_string(),
            position_x: 0.0,
            position_y: 0.0,
            position_z: 0.0,
            user_id: "system".to_string(),
        };
        let err = backend.place_item(&request).await.expect_err("body is not JSON");
        assert!(matches!(err, BackendError::Decode { endpoint: routes::SINGLE_PLACEMENT, .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = backend_for(&format!("http://{}", addr));
        let err = backend.containers(None).await.expect_err("nothing listens there");
        assert!(matches!(err, BackendError::Transport { endpoint: routes::CONTAINERS, .. }));
    }

    #[test]
    fn placement_request_serializes_camel_case() {
        let request = PlacementRequest {
            item_id: "I1".to_string(),
            container_id: "C2".to_string(),
            position_x: 0.0,
            position_y: 0.0,
            position_z: 0.0,
            user_id: "ops".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "itemId": "I1",
                "containerId": "C2",
                "positionX": 0.0,
                "positionY": 0.0,
                "positionZ": 0.0,
                "userId": "ops"
            })
        );
    }
}
