//! Route handler functions for all API endpoints.
//!
//! Each handler extracts path parameters, JSON bodies and the authenticated
//! user via axum extractors, calls into AppState services, and returns JSON
//! responses. Domain errors convert into [`ApiError`] with `?`.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use chipwarm_core::types::{
    Chip, ChipStatus, ConnectionState, Message, Plan, Simulation, StatusSource, Timestamp, User,
};
use chipwarm_session::ConnectOutcome;

use crate::auth::{generate_token, optional_user, AuthUser};
use crate::error::{ApiError, ConflictKind};
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChipRequest {
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChipStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ChipRequest {
    pub chip_id: Uuid,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub live_sessions: usize,
    pub active_timers: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user: User,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChipsResponse {
    pub chips: Vec<Chip>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChipResponse {
    pub chip: Chip,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChipDetailResponse {
    pub chip: Chip,
    pub simulations: Vec<Simulation>,
}

/// Either a pairing artifact to show the user, or confirmation that the
/// chip connected without one.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConnectResponse {
    Pairing { pairing_artifact: String },
    Connected { status: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub chip_id: Uuid,
    pub status: ConnectionState,
    pub source: StatusSource,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub simulation: Simulation,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub struct PurchasePlanRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlansResponse {
    pub plans: Vec<Plan>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlanResponse {
    pub plan: Plan,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

fn owned_chip(state: &AppState, chip_id: Uuid, user: &User) -> Result<Chip, ApiError> {
    let chip = state
        .chips
        .find_by_id(chip_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Chip not found: {}", chip_id)))?;
    if chip.owner_id != user.id {
        return Err(ApiError::Forbidden(format!(
            "Chip {} belongs to another user",
            chip_id
        )));
    }
    Ok(chip)
}

// =============================================================================
// Public handlers
// =============================================================================

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        live_sessions: state.lifecycle.live_sessions(),
        active_timers: state.scheduler.active_timers(),
    })
}

/// POST /auth/register - create a user and issue its API token.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("'name' must not be empty".to_string()));
    }

    let user = User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        api_token: generate_token(),
        created_at: Timestamp::now(),
    };
    state.users.create(&user)?;
    tracing::info!(user_id = %user.id, "user registered");

    let token = user.api_token.clone();
    Ok((StatusCode::CREATED, Json(RegisterResponse { user, token })))
}

/// GET /plans - the plan catalog, cheapest first.
pub async fn list_plans(State(state): State<AppState>) -> Result<Json<PlansResponse>, ApiError> {
    let plans = state.plans.list_catalog()?;
    Ok(Json(PlansResponse { plans }))
}

/// GET /plans/{id} - a catalog plan, or a purchased plan for its owner.
pub async fn get_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<PlanResponse>, ApiError> {
    let plan = state
        .plans
        .find_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Plan not found: {}", id)))?;
    if let Some(owner_id) = plan.owner_id {
        let caller = optional_user(&state, &headers)?;
        if caller.map(|user| user.id) != Some(owner_id) {
            return Err(ApiError::Forbidden(format!(
                "Plan {} belongs to another user",
                id
            )));
        }
    }
    Ok(Json(PlanResponse { plan }))
}

// =============================================================================
// Protected handlers
// =============================================================================

/// POST /auth/logout - revoke the caller's token.
///
/// The token is replaced by one that is never handed out, so the account
/// holds no usable token afterwards.
pub async fn logout(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<ActionResult>, ApiError> {
    if !state
        .users
        .replace_token(user.id, &user.api_token, &generate_token())?
    {
        return Err(ApiError::Unauthorized("Token already revoked".to_string()));
    }
    tracing::info!(user_id = %user.id, "user logged out");
    Ok(Json(ActionResult {
        success: true,
        message: "Logged out".to_string(),
    }))
}

/// POST /plans/purchase - copy a catalog plan into the caller's plans.
pub async fn purchase_plan(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<PurchasePlanRequest>,
) -> Result<(StatusCode, Json<PlanResponse>), ApiError> {
    let offer = state
        .plans
        .find_by_id(body.plan_id)?
        .filter(Plan::is_catalog)
        .ok_or_else(|| ApiError::NotFound(format!("Plan not found: {}", body.plan_id)))?;

    let plan = offer.purchased_by(user.id);
    state.plans.create(&plan)?;
    tracing::info!(plan_id = %plan.id, user_id = %user.id, "plan purchased");
    Ok((StatusCode::CREATED, Json(PlanResponse { plan })))
}

/// GET /plans/user - plans bought by the caller.
pub async fn user_plans(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<PlansResponse>, ApiError> {
    let plans = state.plans.list_by_owner(user.id)?;
    Ok(Json(PlansResponse { plans }))
}

/// GET /auth/profile - the authenticated user.
pub async fn profile(Extension(AuthUser(user)): Extension<AuthUser>) -> Json<ProfileResponse> {
    Json(ProfileResponse { user })
}

/// GET /stream - SSE stream of domain events for the caller's chips.
///
/// System events, which concern no chip, go to every subscriber.
pub async fn stream(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>> + Send> {
    let rx = state.event_tx.subscribe();
    let chips = state.chips.clone();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = result.ok()?;
        if let Some(chip_id) = event.chip_id() {
            let owned = matches!(chips.find_by_id(chip_id), Ok(Some(chip)) if chip.owner_id == user.id);
            if !owned {
                return None;
            }
        }
        let data = serde_json::to_string(&event).unwrap_or_default();
        Some(Ok(Event::default().event(event.event_name()).data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// GET /chips - chips owned by the caller.
pub async fn list_chips(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> Result<Json<ChipsResponse>, ApiError> {
    let chips = state.chips.list_by_owner(user.id)?;
    Ok(Json(ChipsResponse { chips }))
}

/// POST /chips - provision a chip in PENDING status.
pub async fn create_chip(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<CreateChipRequest>,
) -> Result<(StatusCode, Json<ChipResponse>), ApiError> {
    let phone_number = body.phone_number.trim();
    if phone_number.is_empty() {
        return Err(ApiError::BadRequest(
            "'phone_number' must not be empty".to_string(),
        ));
    }
    if state.chips.find_by_phone(phone_number)?.is_some() {
        return Err(ApiError::Conflict(
            ConflictKind::Other,
            format!("Phone number {} is already registered", phone_number),
        ));
    }

    let chip = Chip::new(phone_number, user.id);
    state.chips.create(&chip)?;
    tracing::info!(chip_id = %chip.id, user_id = %user.id, "chip provisioned");
    Ok((StatusCode::CREATED, Json(ChipResponse { chip })))
}

/// GET /chips/{id} - a chip with its simulations, newest first.
pub async fn get_chip(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChipDetailResponse>, ApiError> {
    let chip = owned_chip(&state, id, &user)?;
    let simulations = state.scheduler.list_for_chip(chip.id)?;
    Ok(Json(ChipDetailResponse { chip, simulations }))
}

/// PATCH /chips/{id}/status - set the persisted chip status.
pub async fn update_chip_status(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateChipStatusRequest>,
) -> Result<Json<ChipResponse>, ApiError> {
    let status: ChipStatus = body.status.parse().map_err(ApiError::BadRequest)?;
    let mut chip = owned_chip(&state, id, &user)?;

    state.chips.update_status(chip.id, status)?;
    chip.status = status;
    Ok(Json(ChipResponse { chip }))
}

/// DELETE /chips/{id} - close any live session, then delete the chip and
/// its simulations and messages.
pub async fn delete_chip(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResult>, ApiError> {
    let chip = owned_chip(&state, id, &user)?;

    state.lifecycle.force_close(chip.id).await;
    state.scheduler.halt_chip(chip.id);
    state.chips.delete(chip.id)?;

    tracing::info!(chip_id = %chip.id, "chip deleted");
    Ok(Json(ActionResult {
        success: true,
        message: format!("Chip {} deleted", chip.id),
    }))
}

/// POST /sessions/connect - open a session and return the first pairing
/// artifact, or "connected" if the handshake completed first.
pub async fn connect_session(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<ChipRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let outcome = state.lifecycle.connect(body.chip_id, user.id).await?;
    let response = match outcome {
        ConnectOutcome::PairingArtifact(pairing_artifact) => {
            ConnectResponse::Pairing { pairing_artifact }
        }
        ConnectOutcome::Connected => ConnectResponse::Connected {
            status: "connected".to_string(),
        },
    };
    Ok(Json(response))
}

/// POST /sessions/disconnect - log the chip out.
pub async fn disconnect_session(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<ChipRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    state.lifecycle.disconnect(body.chip_id, user.id).await?;
    Ok(Json(ActionResult {
        success: true,
        message: "Chip disconnected".to_string(),
    }))
}

/// GET /sessions/status/{chip_id} - connection status and where it came from.
pub async fn session_status(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(chip_id): Path<Uuid>,
) -> Result<Json<SessionStatusResponse>, ApiError> {
    let report = state.lifecycle.status(chip_id, user.id).await?;
    Ok(Json(SessionStatusResponse {
        chip_id: report.chip_id,
        status: report.state,
        source: report.source,
    }))
}

/// POST /simulations/start - start a simulation on a connected chip.
pub async fn start_simulation(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(body): Json<ChipRequest>,
) -> Result<(StatusCode, Json<SimulationResponse>), ApiError> {
    let simulation = state.scheduler.start(body.chip_id, user.id).await?;
    Ok((StatusCode::CREATED, Json(SimulationResponse { simulation })))
}

/// GET /simulations/{id}
pub async fn get_simulation(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let simulation = state.scheduler.get(id, user.id)?;
    Ok(Json(SimulationResponse { simulation }))
}

/// POST /simulations/{id}/pause
pub async fn pause_simulation(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let simulation = state.scheduler.pause(id, user.id).await?;
    Ok(Json(SimulationResponse { simulation }))
}

/// POST /simulations/{id}/resume
pub async fn resume_simulation(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let simulation = state.scheduler.resume(id, user.id).await?;
    Ok(Json(SimulationResponse { simulation }))
}

/// POST /simulations/{id}/stop
pub async fn stop_simulation(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<SimulationResponse>, ApiError> {
    let simulation = state.scheduler.stop(id, user.id).await?;
    Ok(Json(SimulationResponse { simulation }))
}

/// GET /simulations/{id}/messages - recorded messages, oldest first.
pub async fn simulation_messages(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = state.scheduler.messages(id, user.id)?;
    Ok(Json(MessagesResponse { messages }))
}
