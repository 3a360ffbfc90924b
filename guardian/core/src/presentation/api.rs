use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::application::queries::GuardianQueryService;
use crate::application::scheduler::GuardianRuntime;
use crate::domain::entity::{
    CampaignId, EntityId, EntityKind, EntityLifecycleState, ManagedEntity,
};
use crate::domain::store::{EntityRegistry, StateStore};

pub struct AppState {
    pub runtime: Arc<GuardianRuntime>,
    pub queries: Arc<GuardianQueryService>,
    pub registry: Arc<dyn EntityRegistry>,
    pub store: Arc<dyn StateStore>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/guardian/status", get(status))
        .route("/api/guardian/enable", post(enable))
        .route("/api/guardian/disable", post(disable))
        .route("/api/guardian/run-now", post(run_now))
        .route("/api/guardian/entities", post(register_entity))
        .route("/api/guardian/entities/{id}/state", get(entity_state))
        .route("/api/guardian/entities/{id}/decisions", get(entity_decisions))
        .route("/api/guardian/entities/{id}/budget", post(set_budget))
        .route("/api/guardian/entities/{id}/manual-pause", post(manual_pause))
        .route("/api/guardian/entities/{id}/manual-resume", post(manual_resume))
        .route("/api/guardian/campaigns/{id}/ledger", get(campaign_ledger))
        .with_state(state)
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let entities = state.queries.entity_count().await.unwrap_or(0);
    let outcomes = match state.queries.recent_outcomes(1).await {
        Ok(outcomes) => outcomes,
        Err(e) => return error_response(e),
    };

    Json(json!({
        "enabled": state.runtime.is_enabled(),
        "entities_managed": entities,
        "last_tick": outcomes.first().map(|o| json!({
            "tick_id": o.tick_id,
            "at": o.at,
            "status": o.status,
            "detail": o.detail,
            "decisions": o.decisions,
        })),
    }))
    .into_response()
}

async fn enable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime.enable();
    Json(json!({ "enabled": true }))
}

async fn disable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.runtime.disable();
    Json(json!({ "enabled": false }))
}

async fn run_now(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.runtime.run_now().await {
        Ok(outcome) => Json(json!({
            "tick_id": outcome.tick_id,
            "status": outcome.status,
            "decisions": outcome.decisions,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct RegisterEntityRequest {
    id: String,
    kind: EntityKind,
    campaign_id: String,
    daily_budget_micros: i64,
}

async fn register_entity(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterEntityRequest>,
) -> impl IntoResponse {
    if payload.id.is_empty() || payload.campaign_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "id and campaign_id are required" })),
        )
            .into_response();
    }
    if payload.daily_budget_micros <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "daily_budget_micros must be positive" })),
        )
            .into_response();
    }

    let entity = ManagedEntity::new(
        EntityId::new(payload.id),
        payload.kind,
        CampaignId::new(payload.campaign_id),
        payload.daily_budget_micros,
    );
    let id = entity.id.clone();

    match state.registry.register(entity).await {
        Ok(()) => Json(json!({ "registered": id })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn entity_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = EntityId::new(id);
    match state.queries.current_state(&id).await {
        Ok(Some(view)) => Json(json!({
            "entity_id": id,
            "state": view.state,
            "last_decision": view.last_decision,
        }))
        .into_response(),
        Ok(None) => not_found("entity not managed"),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn entity_decisions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let id = EntityId::new(id);
    let limit = params.limit.unwrap_or(50).min(500);
    match state.queries.decision_history(&id, limit).await {
        Ok(decisions) => Json(json!({ "decisions": decisions })).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct BudgetRequest {
    daily_budget_micros: i64,
}

async fn set_budget(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<BudgetRequest>,
) -> impl IntoResponse {
    if payload.daily_budget_micros <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "daily_budget_micros must be positive" })),
        )
            .into_response();
    }
    let id = EntityId::new(id);
    match state
        .registry
        .set_daily_budget(&id, payload.daily_budget_micros)
        .await
    {
        Ok(()) => Json(json!({ "updated": id })).into_response(),
        Err(crate::domain::store::StoreError::NotFound(_)) => not_found("entity not managed"),
        Err(e) => error_response(e),
    }
}

async fn manual_pause(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    set_manual_state(state, id, EntityLifecycleState::ManuallyPaused).await
}

async fn manual_resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    set_manual_state(state, id, EntityLifecycleState::Active).await
}

/// Operator sink transitions. The guardian observes MANUALLY_PAUSED but
/// never enters or leaves it on its own; the platform-side pause itself is
/// the operator's action in the ads console.
async fn set_manual_state(
    state: Arc<AppState>,
    id: String,
    target: EntityLifecycleState,
) -> axum::response::Response {
    let id = EntityId::new(id);
    match state.registry.get(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found("entity not managed"),
        Err(e) => return error_response(e),
    }
    match state.store.set_lifecycle(&id, target).await {
        Ok(()) => Json(json!({ "entity_id": id, "state": target })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn campaign_ledger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let campaign_id = CampaignId::new(id);
    match state.queries.loss_ledger(&campaign_id).await {
        Ok(Some(view)) => Json(json!({
            "campaign_id": campaign_id,
            "cumulative_loss_micros": view.cumulative_loss_micros,
            "window_start": view.window_start,
        }))
        .into_response(),
        Ok(None) => Json(json!({
            "campaign_id": campaign_id,
            "cumulative_loss_micros": 0,
            "window_start": null,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

fn not_found(message: &str) -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

fn error_response(err: impl std::fmt::Display) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
