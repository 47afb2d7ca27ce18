use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use aps_core::{time, PatientId};
use aps_engine::{CalculateRequest, InitializeRequest, Scenario};
use aps_store::HistoryQuery;

use crate::error::ApiError;
use crate::server::AppState;

type ApiResult = Result<Response, ApiError>;

#[derive(Deserialize)]
pub struct TemplateRequest {
    template: String,
}

#[derive(Deserialize)]
pub struct ScenarioRequest {
    scenario: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    active_patients: usize,
    timestamp: String,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let body = HealthResponse {
        status: "healthy",
        active_patients: state.service.patient_count(),
        timestamp: time::format(&Utc::now()),
    };
    Json(body).into_response()
}

/// POST /patients/{id}/initialize
pub async fn initialize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<InitializeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let status = state.service.initialize(PatientId::from_raw(id), request)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "status": "initialized", "patient": status })),
    )
        .into_response())
}

/// POST /patients/{id}/calculate
pub async fn calculate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CalculateRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let response = state.service.calculate(&PatientId::from_raw(id), request).await?;
    Ok(Json(response).into_response())
}

/// GET /patients/{id}/status
pub async fn status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let status = state.service.status(&PatientId::from_raw(id))?;
    Ok(Json(status).into_response())
}

/// GET /patients/{id}/history?type=&hours=&limit=
pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let id = PatientId::from_raw(id);
    let result = state.service.history(&id, &query, Utc::now())?;
    Ok(Json(json!({ "patientId": id, "result": result })).into_response())
}

/// PATCH /patients/{id}/profile
pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult {
    let Json(patch) = body?;
    let profile = state.service.update_profile(&PatientId::from_raw(id), &patch)?;
    Ok(Json(json!({ "status": "updated", "profile": profile })).into_response())
}

/// GET /patients
pub async fn list_patients(State(state): State<AppState>) -> Response {
    let patients = state.service.list();
    Json(json!({ "count": patients.len(), "patients": patients })).into_response()
}

/// DELETE /patients/{id}
pub async fn delete_patient(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = PatientId::from_raw(id);
    state.service.delete(&id)?;
    Ok(Json(json!({ "status": "deleted", "patientId": id })).into_response())
}

/// POST /test/patients/{id}/from-template
pub async fn from_template(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TemplateRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let status = state
        .service
        .from_template(PatientId::from_raw(id), &request.template)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "initialized",
            "template": request.template,
            "patient": status,
        })),
    )
        .into_response())
}

/// POST /test/scenario/{id}
pub async fn run_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ScenarioRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body?;
    let scenario: Scenario = request.scenario.parse()?;
    info!(patient_id = %id, scenario = %request.scenario, "running scenario");
    let report = state
        .service
        .run_scenario(&PatientId::from_raw(id), scenario)
        .await?;
    Ok(Json(report).into_response())
}

/// GET /test/templates
pub async fn templates(State(state): State<AppState>) -> Response {
    Json(json!({ "templates": state.service.templates() })).into_response()
}
