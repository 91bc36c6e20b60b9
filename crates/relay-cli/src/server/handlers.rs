//! Route handlers. Each one parses its input, calls the engine, and returns JSON.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use relay_core::Orchestrator;
use relay_core::app::{Completion, Dispatched, EngineStatus, GatewayStatus, ReplayReport, RoleQueue, StagedEntry};
use relay_core::domain::{
    Decision, DecisionChoice, DecisionId, DecisionRequest, DecisionStatus, StatusUpdate, Task,
    TaskId, TaskResult, TaskSpec, TaskStatus, parse_status_filter,
};
use serde::Deserialize;

use super::error::{ApiError, ApiResult};

pub type AppState = Arc<Orchestrator>;

/// `Json` whose rejections render as our 400 body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub result: Option<TaskResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteBody {
    #[serde(default)]
    pub result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecideBody {
    pub choice: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeferBody {
    #[serde(default)]
    pub defer_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegateBody {
    pub delegate_to: String,
}

/// Optional JSON body: empty means `T::default()`.
fn optional_body<T: Default + for<'de> Deserialize<'de>>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

fn task_id(raw: &str) -> ApiResult<TaskId> {
    Ok(raw.parse()?)
}

fn decision_id(raw: &str) -> ApiResult<DecisionId> {
    Ok(raw.parse()?)
}

// ---- tasks ----

pub async fn create_task(
    State(engine): State<AppState>,
    ApiJson(spec): ApiJson<TaskSpec>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = engine.create_task(spec).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(engine.get_task(task_id(&id)?).await?))
}

pub async fn update_status(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<StatusBody>,
) -> ApiResult<Json<Task>> {
    let id = task_id(&id)?;
    let status: TaskStatus = body.status.parse()?;
    let update = StatusUpdate {
        status,
        metadata: body.metadata,
        result: body.result,
    };
    Ok(Json(engine.update_status(id, update).await?))
}

pub async fn complete_task(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Completion>> {
    let id = task_id(&id)?;
    let body: CompleteBody = optional_body(&body)?;
    Ok(Json(engine.complete(id, body.result).await?))
}

pub async fn dispatch_task(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Dispatched>> {
    Ok(Json(engine.dispatch(task_id(&id)?).await?))
}

// ---- roles ----

pub async fn list_role_tasks(
    State(engine): State<AppState>,
    Path(role): Path<String>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let statuses = parse_status_filter(query.status.as_deref().unwrap_or_default())?;
    Ok(Json(engine.list_by_role(&role, &statuses).await?))
}

pub async fn role_queue(
    State(engine): State<AppState>,
    Path(role): Path<String>,
) -> ApiResult<Json<RoleQueue>> {
    Ok(Json(engine.queue_for(&role).await?))
}

/// `null` when the role has no `pending` task left.
pub async fn dispatch_next(
    State(engine): State<AppState>,
    Path(role): Path<String>,
) -> ApiResult<Json<Option<Dispatched>>> {
    Ok(Json(engine.dispatch_next(&role).await?))
}

// ---- execution queue ----

pub async fn queue_status(State(engine): State<AppState>) -> Json<GatewayStatus> {
    Json(engine.gateway_status().await)
}

pub async fn staged(State(engine): State<AppState>) -> Json<Vec<StagedEntry>> {
    Json(engine.staged().await)
}

pub async fn replay(State(engine): State<AppState>) -> Json<ReplayReport> {
    Json(engine.replay_staged().await)
}

// ---- decisions ----

pub async fn list_decisions(
    State(engine): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<Decision>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DecisionStatus>)
        .transpose()?;
    Ok(Json(engine.list_decisions(status).await?))
}

pub async fn open_decision(
    State(engine): State<AppState>,
    ApiJson(request): ApiJson<DecisionRequest>,
) -> ApiResult<(StatusCode, Json<Decision>)> {
    let decision = engine.open_decision(request).await?;
    Ok((StatusCode::CREATED, Json(decision)))
}

pub async fn get_decision(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Decision>> {
    Ok(Json(engine.get_decision(decision_id(&id)?).await?))
}

pub async fn decide(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<DecideBody>,
) -> ApiResult<Json<Decision>> {
    let id = decision_id(&id)?;
    let choice: DecisionChoice = body.choice.parse()?;
    Ok(Json(engine.decide(id, choice, body.notes).await?))
}

pub async fn defer(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Decision>> {
    let id = decision_id(&id)?;
    let body: DeferBody = optional_body(&body)?;
    Ok(Json(engine.defer(id, body.defer_until, body.reason).await?))
}

pub async fn delegate(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<DelegateBody>,
) -> ApiResult<Json<Decision>> {
    let id = decision_id(&id)?;
    Ok(Json(engine.delegate(id, &body.delegate_to).await?))
}

// ---- health ----

pub async fn health(State(engine): State<AppState>) -> ApiResult<Json<EngineStatus>> {
    Ok(Json(engine.status().await?))
}
