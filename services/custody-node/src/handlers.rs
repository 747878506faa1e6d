use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::Json,
};
use custody_core::CustodyError;
use custody_handoff::{
    Caller, ChainView, CreateHandoff, DisputeReason, Handoff, HandoffFilter, HandoffService,
    NotificationLogEntry, Outcome, PublicHandoffView, Role,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";
pub const CALLER_NAME_HEADER: &str = "x-caller-name";

/// Authenticated caller, taken from headers set by the upstream gateway.
pub struct AuthCaller(pub Caller);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let identity = header(CALLER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", CALLER_ID_HEADER)))?;
        let role: Role = header(CALLER_ROLE_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {} header", CALLER_ROLE_HEADER)))?
            .parse()
            .map_err(ApiError::Unauthorized)?;
        let name = header(CALLER_NAME_HEADER).unwrap_or_else(|| identity.clone());
        Ok(AuthCaller(Caller::new(identity, role, name)))
    }
}

/// Command response: the handoff after the command and whether it changed.
#[derive(Debug, Serialize)]
pub struct CommandResponse<T> {
    pub applied: bool,
    pub handoff: T,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub handoff_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DisputeBody {
    pub reason: DisputeReason,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub resolution: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResendBody {
    #[serde(default)]
    pub channel: Option<custody_handoff::Channel>,
}

/// Strip the capability token before a handoff leaves the service. Receivers
/// get their link through the notification channel only.
fn redact(mut handoff: Handoff) -> Handoff {
    handoff.confirmation_token = None;
    handoff
}

fn command(outcome: Outcome) -> Json<CommandResponse<Handoff>> {
    Json(CommandResponse {
        applied: outcome.applied,
        handoff: redact(outcome.handoff),
    })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| CustodyError::Validation(rejection.body_text()).into())
}

/// Run a service call on the blocking pool.
async fn run<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&HandoffService) -> custody_core::Result<T> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?
        .map_err(ApiError::from)
}

pub async fn create_handoff(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    payload: Result<Json<CreateHandoff>, JsonRejection>,
) -> Result<(StatusCode, Json<Handoff>), ApiError> {
    let request = body(payload)?;
    let handoff = run(&state, move |service| service.create(&caller, request)).await?;
    info!(handoff_id = %handoff.handoff_id, "Handoff created via API");
    Ok((StatusCode::CREATED, Json(redact(handoff))))
}

pub async fn list_handoffs(
    State(state): State<Arc<AppState>>,
    _caller: AuthCaller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Handoff>>, ApiError> {
    let filter = HandoffFilter {
        status: query
            .status
            .filter(|s| !s.is_empty())
            .map(|s| s.parse())
            .transpose()
            .map_err(CustodyError::Validation)?,
        handoff_type: query
            .handoff_type
            .filter(|t| !t.is_empty())
            .map(|t| t.parse())
            .transpose()
            .map_err(CustodyError::Validation)?,
    };
    let handoffs = run(&state, move |service| service.list(&filter)).await?;
    Ok(Json(handoffs.into_iter().map(redact).collect()))
}

pub async fn get_handoff(
    State(state): State<Arc<AppState>>,
    _caller: AuthCaller,
    Path(id): Path<String>,
) -> Result<Json<Handoff>, ApiError> {
    let handoff = run(&state, move |service| service.get(&id)).await?;
    Ok(Json(redact(handoff)))
}

pub async fn confirm_handoff(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse<Handoff>>, ApiError> {
    let outcome = run(&state, move |service| service.confirm(&caller, &id)).await?;
    Ok(command(outcome))
}

pub async fn dispute_handoff(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
    payload: Result<Json<DisputeBody>, JsonRejection>,
) -> Result<Json<CommandResponse<Handoff>>, ApiError> {
    let DisputeBody { reason, description } = body(payload)?;
    let outcome = run(&state, move |service| {
        service.dispute(&caller, &id, reason, description)
    })
    .await?;
    Ok(command(outcome))
}

pub async fn start_resolution(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
) -> Result<Json<CommandResponse<Handoff>>, ApiError> {
    let outcome = run(&state, move |service| service.begin_resolution(&caller, &id)).await?;
    Ok(command(outcome))
}

pub async fn resolve_handoff(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
    payload: Result<Json<ResolveBody>, JsonRejection>,
) -> Result<Json<CommandResponse<Handoff>>, ApiError> {
    let ResolveBody { resolution } = body(payload)?;
    let outcome = run(&state, move |service| {
        service.resolve(&caller, &id, &resolution)
    })
    .await?;
    Ok(command(outcome))
}

pub async fn resend_notification(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
    payload: Option<Json<ResendBody>>,
) -> Result<Json<NotificationLogEntry>, ApiError> {
    let channel = payload.map(|Json(b)| b).unwrap_or_default().channel;
    let entry = run(&state, move |service| {
        service.resend_notification(&caller, &id, channel)
    })
    .await?;
    Ok(Json(entry))
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    _caller: AuthCaller,
    Path(id): Path<String>,
) -> Result<Json<Vec<NotificationLogEntry>>, ApiError> {
    let entries = run(&state, move |service| service.notifications(&id)).await?;
    Ok(Json(entries))
}

pub async fn get_chain(
    State(state): State<Arc<AppState>>,
    _caller: AuthCaller,
    Path(session_id): Path<String>,
) -> Result<Json<ChainView>, ApiError> {
    let mut view = run(&state, move |service| service.chain(&session_id)).await?;
    view.step1 = view.step1.map(redact);
    view.step2 = view.step2.map(redact);
    Ok(Json(view))
}

pub async fn public_view(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<PublicHandoffView>, ApiError> {
    let gateway = state.gateway.clone();
    let view = tokio::task::spawn_blocking(move || gateway.get_by_token(&token))
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))??;
    Ok(Json(view))
}

pub async fn confirm_by_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<CommandResponse<PublicHandoffView>>, ApiError> {
    let gateway = state.gateway.clone();
    let (view, applied) = tokio::task::spawn_blocking(move || gateway.confirm_by_token(&token))
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))??;
    Ok(Json(CommandResponse {
        applied,
        handoff: view,
    }))
}

pub async fn dispute_by_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    payload: Result<Json<DisputeBody>, JsonRejection>,
) -> Result<Json<PublicHandoffView>, ApiError> {
    let DisputeBody { reason, description } = body(payload)?;
    let gateway = state.gateway.clone();
    let view = tokio::task::spawn_blocking(move || {
        gateway.dispute_by_token(&token, reason, description)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))??;
    Ok(Json(view))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "custody-node",
        "version": env!("CARGO_PKG_VERSION"),
        "ttlSecs": state.config.expiry.ttl_secs,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
