//! REST API for the rearrangement service.
//!
//! Exposes preview and execute cycles, an SSE variant of execute, the current
//! capacity view and the OpenAPI documentation. Uses Axum as the web framework
//! and supports CORS.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
#[allow(unused_imports)]
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::admission::{RejectedMovement, RejectionReason};
use crate::backend::HttpBackend;
use crate::capacity::ContainerCapacity;
use crate::config::AppConfig;
use crate::model::{ExecutionMode, ExecutionOutcome, ExecutionStrategy, SuggestionParams};
use crate::pipeline::{
    CycleAction, CycleEvent, CycleResult, CycleState, RearrangementPipeline, SuggestionsView,
};
use crate::plan::PlannedMove;
use crate::reconcile::RearrangementReport;
use crate::suggestions::{CanonicalMovement, SuggestionSource};

#[derive(Clone)]
struct ApiState {
    pipeline: RearrangementPipeline,
}

/// Failures that stop the service from starting or keep serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not build the backend HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("could not bind API server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("API server terminated with an error: {0}")]
    Serve(#[source] std::io::Error),
}

static OPENAPI_DOC: OnceLock<utoipa::openapi::OpenApi> = OnceLock::new();

// SRI hashes for https://unpkg.com/swagger-ui-dist@5.17.14/.
const SWAGGER_UI_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
    <head>
        <meta charset="utf-8" />
        <title>stowage-rearranger API Docs</title>
        <link
            rel="stylesheet"
            href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css"
            integrity="sha384-wxLW6kwyHktdDGr6Pv1zgm/VGJh99lfUbzSn6HNHBENZlCN7W602k9VkGdxuFvPn"
            crossorigin="anonymous"
        />
    </head>
    <body>
        <div id="swagger-ui"></div>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"
            integrity="sha384-wmyclcVGX/WhUkdkATwhaK1X1JtiNrr2EoYJ+diV3vj4v6OC5yCeSu+yW13SYJep"
            crossorigin="anonymous"
        ></script>
        <script
            src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"
            integrity="sha384-2YH8WDRaj7V2OqU/trsmzSagmk/E2SutiCsGkdgoQwC9pNUJV1u/141DHB6jgs8t"
            crossorigin="anonymous"
        ></script>
        <script>
            window.onload = function () {
                const ui = SwaggerUIBundle({
                    url: "/docs/openapi.json",
                    dom_id: "#swagger-ui",
                    presets: [SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset],
                    layout: "StandaloneLayout",
                });
                window.ui = ui;
            };
        </script>
    </body>
    </html>"##;

fn openapi_doc() -> &'static utoipa::openapi::OpenApi {
    OPENAPI_DOC.get_or_init(ApiDoc::openapi)
}

/// Request body for the rearrangement routes.
///
/// Omitted fields fall back to the configured defaults.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "priority_threshold": 5.0,
        "max_movements": 10,
        "space_target": 0.8,
        "execution_mode": "auto"
    })
)]
pub struct RearrangementRequest {
    #[serde(default)]
    #[schema(nullable = true)]
    pub priority_threshold: Option<f64>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub max_movements: Option<u32>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub space_target: Option<f64>,
    #[serde(default)]
    #[schema(nullable = true)]
    pub execution_mode: Option<ExecutionMode>,
}

impl RearrangementRequest {
    /// Merges the request over `defaults` and checks the ranges.
    fn into_params(
        self,
        defaults: SuggestionParams,
    ) -> Result<(SuggestionParams, Option<ExecutionMode>), String> {
        let params = SuggestionParams {
            priority_threshold: self
                .priority_threshold
                .unwrap_or(defaults.priority_threshold),
            max_movements: self.max_movements.unwrap_or(defaults.max_movements),
            space_target: self.space_target.unwrap_or(defaults.space_target),
        };

        if !params.priority_threshold.is_finite() || params.priority_threshold < 0.0 {
            return Err("priority_threshold must be a non-negative number".to_string());
        }
        if params.max_movements == 0 {
            return Err("max_movements must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&params.space_target) {
            return Err("space_target must be between 0 and 1".to_string());
        }
        Ok((params, self.execution_mode))
    }
}

#[derive(Serialize, ToSchema)]
pub struct CapacityView {
    pub count: usize,
    pub containers: Vec<ContainerCapacity>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
struct ErrorResponse {
    error: String,
    details: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
        }
    }
}

fn error_response(
    status: StatusCode,
    error: impl Into<String>,
    details: impl Into<String>,
) -> Response {
    (status, Json(ErrorResponse::new(error, details))).into_response()
}

fn json_deserialize_error(err: JsonRejection) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid JSON data",
        err.to_string(),
    )
}

fn validation_error(details: impl Into<String>) -> Response {
    error_response(
        StatusCode::UNPROCESSABLE_ENTITY,
        "Invalid input data",
        details,
    )
}

fn parse_rearrangement_request(
    payload: Result<Json<RearrangementRequest>, JsonRejection>,
    defaults: SuggestionParams,
) -> Result<(SuggestionParams, Option<ExecutionMode>), Response> {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(err) => return Err(json_deserialize_error(err)),
    };

    payload.into_params(defaults).map_err(validation_error)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handle_suggestions,
        handle_execute,
        handle_execute_stream,
        handle_capacity,
        handle_health
    ),
    components(
        schemas(
            RearrangementRequest,
            SuggestionsView,
            RearrangementReport,
            CanonicalMovement,
            PlannedMove,
            RejectedMovement,
            RejectionReason,
            ExecutionOutcome,
            ExecutionMode,
            ExecutionStrategy,
            SuggestionSource,
            ContainerCapacity,
            CapacityView,
            CycleEvent,
            CycleResult,
            CycleState,
            HealthResponse,
            ErrorResponse
        )
    ),
    tags((name = "rearrangement", description = "Rearrangement preview and execution"))
)]
struct ApiDoc;

fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        // API endpoints
        .route("/rearrangement/suggestions", post(handle_suggestions))
        .route("/rearrangement/execute", post(handle_execute))
        .route("/rearrangement/execute_stream", post(handle_execute_stream))
        .route("/containers/capacity", get(handle_capacity))
        .route("/health", get(handle_health))
        // API documentation
        .route("/docs/openapi.json", get(serve_openapi_json))
        .route("/docs", get(serve_openapi_ui))
        .layer(cors)
        .with_state(state)
}

/// Starts the API server and blocks until it terminates.
pub async fn start_api_server(config: AppConfig) -> Result<(), StartupError> {
    let backend = HttpBackend::new(&config.backend)?;
    let pipeline =
        RearrangementPipeline::new(Arc::new(backend), config.rearrangement.pipeline_settings());
    let app = router(ApiState { pipeline });

    let addr = config.api.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    let display_host = config.api.display_host().to_string();
    info!(
        "🚀 Server running on http://{}:{}",
        display_host,
        config.api.port()
    );
    if config.api.binds_to_all_interfaces() {
        info!("💡 Local access: http://localhost:{}", config.api.port());
    }
    info!("🔗 Backend: {}", config.backend.base_url());
    info!("📦 API Endpoints:");
    info!("   - POST /rearrangement/suggestions");
    info!("   - POST /rearrangement/execute");
    info!("   - POST /rearrangement/execute_stream");
    info!("   - GET  /containers/capacity");
    info!("   - GET  /health");
    info!("📑 Documentation:");
    info!("   - GET /docs");
    info!("   - GET /docs/openapi.json");

    axum::serve(listener, app)
        .await
        .map_err(StartupError::Serve)
}

/// Handler for POST /rearrangement/suggestions.
///
/// Runs a preview cycle: loads capacity, fetches suggestions and filters them,
/// without writing anything to the backend.
#[utoipa::path(
    post,
    path = "/rearrangement/suggestions",
    request_body = RearrangementRequest,
    responses(
        (status = 200, description = "Admitted plan and rejected movements", body = SuggestionsView),
        (
            status = CONFLICT,
            description = "A newer cycle started while this one was running",
            body = ErrorResponse
        ),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "rearrangement"
)]
async fn handle_suggestions(
    State(state): State<ApiState>,
    payload: Result<Json<RearrangementRequest>, JsonRejection>,
) -> Response {
    let (params, _) =
        match parse_rearrangement_request(payload, state.pipeline.settings().default_params) {
            Ok(parsed) => parsed,
            Err(response) => return response,
        };

    info!("📥 New suggestion preview: {:?}", params);
    let result = state
        .pipeline
        .run_cycle(CycleAction::Preview, params, None, |_| {})
        .await;

    match result {
        CycleResult::Suggestions(view) if view.superseded => {
            warn!("⚠️ Discarding superseded preview of cycle {}", view.cycle);
            error_response(
                StatusCode::CONFLICT,
                "Superseded",
                format!("Cycle {} was superseded by a newer cycle", view.cycle),
            )
        }
        CycleResult::Suggestions(view) => (StatusCode::OK, Json(view)).into_response(),
        CycleResult::Report(report) => (StatusCode::OK, Json(report)).into_response(),
    }
}

/// Handler for POST /rearrangement/execute.
///
/// Runs a full cycle and returns the reconciled report. A superseded report is
/// still returned, flagged with `superseded: true`, since its writes already happened.
#[utoipa::path(
    post,
    path = "/rearrangement/execute",
    request_body = RearrangementRequest,
    responses(
        (status = 200, description = "Reconciled execution report", body = RearrangementReport),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "rearrangement"
)]
async fn handle_execute(
    State(state): State<ApiState>,
    payload: Result<Json<RearrangementRequest>, JsonRejection>,
) -> Response {
    let (params, mode) =
        match parse_rearrangement_request(payload, state.pipeline.settings().default_params) {
            Ok(parsed) => parsed,
            Err(response) => return response,
        };

    info!("📥 New rearrangement request: {:?}, mode {:?}", params, mode);
    let result = state
        .pipeline
        .run_cycle(CycleAction::Execute, params, mode, |_| {})
        .await;
    if result.superseded() {
        warn!(
            "⚠️ Cycle {} finished after a newer cycle started, returning it flagged",
            result.cycle()
        );
    }

    match result {
        CycleResult::Report(report) => (StatusCode::OK, Json(report)).into_response(),
        CycleResult::Suggestions(view) => (StatusCode::OK, Json(view)).into_response(),
    }
}

/// Handler for POST /rearrangement/execute_stream (SSE).
///
/// Streams every state change of an execute cycle as Server-Sent Events
/// (text/event-stream), ending with a `finished` event carrying the report.
#[utoipa::path(
    post,
    path = "/rearrangement/execute_stream",
    request_body = RearrangementRequest,
    responses(
        (
            status = 200,
            description = "Streams cycle events in real-time",
            content_type = "text/event-stream",
            body = CycleEvent
        ),
        (status = UNPROCESSABLE_ENTITY, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "rearrangement"
)]
async fn handle_execute_stream(
    State(state): State<ApiState>,
    payload: Result<Json<RearrangementRequest>, JsonRejection>,
) -> Response {
    let (params, mode) =
        match parse_rearrangement_request(payload, state.pipeline.settings().default_params) {
            Ok(parsed) => parsed,
            Err(response) => return response,
        };

    let (tx, rx) = mpsc::channel::<String>(32);
    let pipeline = state.pipeline.clone();

    tokio::spawn(async move {
        pipeline
            .run_cycle(CycleAction::Execute, params, mode, |event| {
                if let Ok(json) = serde_json::to_string(event) {
                    if tx.try_send(json).is_err() {
                        // Receiver closed or lagging; the cycle runs to completion regardless.
                        debug!("cycle event dropped");
                    }
                }
            })
            .await;
    });

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok::<_, std::convert::Infallible>(Event::default().data(msg)));
    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(10))
                .text("keep-alive"),
        )
        .into_response()
}

/// Handler for GET /containers/capacity.
#[utoipa::path(
    get,
    path = "/containers/capacity",
    responses(
        (status = 200, description = "Current occupancy per container", body = CapacityView)
    ),
    tag = "rearrangement"
)]
async fn handle_capacity(State(state): State<ApiState>) -> Json<CapacityView> {
    let containers = state.pipeline.capacity_snapshot().await.containers();
    Json(CapacityView {
        count: containers.len(),
        containers,
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is alive", body = HealthResponse)),
    tag = "rearrangement"
)]
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn serve_openapi_json() -> impl IntoResponse {
    Json(openapi_doc())
}

async fn serve_openapi_ui() -> impl IntoResponse {
    Html(SWAGGER_UI_HTML)
}
