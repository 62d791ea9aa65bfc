use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerting::{
    Alert, AlertClosingReason, AlertId, AlertRegistry, AlertingDefinition, AlertingError,
    CheckError, RegistryError, StateSnapshot, ThresholdChecker, ThresholdType,
};
use crate::metrics::{MetricSample, MetricStore};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<MetricStore>,
    pub registry: Arc<AlertRegistry>,
    pub checker: Arc<ThresholdChecker>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Metric Ingest
// ============================================================================

#[derive(Deserialize)]
pub struct IngestRequest {
    pub samples: Vec<MetricSample>,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub inserted: usize,
    pub errors: usize,
}

pub async fn ingest_metrics(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Json<IngestResponse> {
    let total = request.samples.len();
    let inserted = state.store.insert_batch(request.samples);

    Json(IngestResponse {
        inserted,
        errors: total - inserted,
    })
}

// ============================================================================
// Alerting Definitions
// ============================================================================

#[derive(Serialize)]
pub struct DefinitionsResponse {
    pub definitions: Vec<AlertingDefinition>,
}

pub async fn list_definitions(State(state): State<Arc<AppState>>) -> Json<DefinitionsResponse> {
    let definitions = state
        .checker
        .definitions()
        .into_iter()
        .map(|d| d.as_ref().clone())
        .collect();

    Json(DefinitionsResponse { definitions })
}

#[derive(Serialize)]
pub struct CreateDefinitionResponse {
    pub id: String,
    pub created: bool,
}

pub async fn create_definition(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<AlertingDefinition>,
) -> Result<Json<CreateDefinitionResponse>, ApiError> {
    let id = definition.id.clone();

    state
        .checker
        .add_definition(Arc::new(definition))
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(CreateDefinitionResponse { id, created: true }))
}

pub async fn delete_definition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .checker
        .remove_definition(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Definition '{}' not found", id)))?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Serialize)]
pub struct AlertResponse {
    pub id: String,
    pub definition_id: String,
    pub definition_name: String,
    pub threshold: f64,
    pub threshold_type: ThresholdType,
    pub start_timestamp: i64,
    pub close_timestamp: Option<i64>,
    pub closing_reason: Option<AlertClosingReason>,
    pub open: bool,
}

impl From<&Alert> for AlertResponse {
    fn from(alert: &Alert) -> Self {
        let definition = alert.definition();
        Self {
            id: alert.id().to_string(),
            definition_id: definition.id.clone(),
            definition_name: definition.name.clone(),
            threshold: definition.threshold,
            threshold_type: definition.threshold_type,
            start_timestamp: alert.start_timestamp(),
            close_timestamp: alert.close_timestamp(),
            closing_reason: alert.closing_reason(),
            open: alert.is_open(),
        }
    }
}

#[derive(Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub open: Option<bool>,
    #[serde(default)]
    pub definition: Option<String>,
}

#[derive(Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AlertResponse>,
}

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Json<AlertsResponse> {
    let alerts = match &query.definition {
        Some(definition_id) => state.registry.alerts_for_definition(definition_id),
        None => state.registry.all_alerts(),
    };

    let alerts = alerts
        .iter()
        .filter(|a| query.open.map_or(true, |open| a.is_open() == open))
        .map(AlertResponse::from)
        .collect();

    Json(AlertsResponse { alerts })
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertResponse>, ApiError> {
    let alert = state
        .registry
        .get_alert(&AlertId::from(id.as_str()))
        .ok_or_else(|| ApiError::NotFound(format!("Alert '{}' not found", id)))?;

    Ok(Json(AlertResponse::from(&alert)))
}

pub async fn close_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AlertResponse>, ApiError> {
    let alert = state
        .checker
        .close_alert(&AlertId::from(id.as_str()))
        .map_err(|e| match e {
            CheckError::UnknownAlert(id) => ApiError::NotFound(format!("Alert '{}' not found", id)),
            closed @ (CheckError::Alerting(AlertingError::Registry(RegistryError::AlreadyClosed(_)))
            | CheckError::Alerting(AlertingError::AlreadyClosed(_))) => {
                ApiError::BadRequest(closed.to_string())
            }
            other => {
                tracing::error!(alert_id = %id, error = %other, "Failed to close alert");
                ApiError::Internal(other.to_string())
            }
        })?;

    Ok(Json(AlertResponse::from(&alert)))
}

// ============================================================================
// Alerting States
// ============================================================================

#[derive(Serialize)]
pub struct StatesResponse {
    pub states: Vec<StateSnapshot>,
}

pub async fn list_states(State(state): State<Arc<AppState>>) -> Json<StatesResponse> {
    Json(StatesResponse {
        states: state.checker.snapshots(),
    })
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    pub definitions: usize,
    pub open_alerts: usize,
    pub total_alerts: usize,
    pub series: usize,
    pub samples: usize,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        definitions: state.checker.definitions().len(),
        open_alerts: state.registry.open_alerts().len(),
        total_alerts: state.registry.len(),
        series: state.store.series_count(),
        samples: state.store.sample_count(),
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
