//! HTTP request handlers
//!
//! Thin adapters from JSON bodies to player and listener manager operations.
//! Requests the player ignores in its current state answer
//! `{"accepted": false}` rather than an error.

use super::AppContext;
use crate::error::Result;
use crate::listeners::ListenerSnapshot;
use crate::state::RelayStatus;
use axum::{
    extract::{Path, State},
    Json,
};
use djrelay_common::{ListenerId, ListenerMode, PlaybackState};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    state: PlaybackState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub locator: String,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListenerRequest {
    pub listener: ListenerId,
}

#[derive(Debug, Deserialize)]
pub struct MembershipRequest {
    pub listener: ListenerId,
    pub mode: ListenerMode,
}

#[derive(Debug, Deserialize)]
pub struct AnonymousRequest {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub listener: ListenerId,
    /// 1-based
    pub position: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MoveResponse {
    pub inserted: bool,
    pub position: usize,
}

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeBody {
    pub percent: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    /// Absent when the broadcast endpoint is disabled
    pub stream_url: Option<String>,
    pub playlist_url: Option<String>,
}

fn accepted(accepted: bool) -> Json<AcceptedResponse> {
    Json(AcceptedResponse { accepted })
}

// ============================================================================
// Status
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "djrelay".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        state: ctx.player.state(),
    })
}

/// GET /status
pub async fn status(State(ctx): State<AppContext>) -> Json<RelayStatus> {
    Json(ctx.state.status())
}

// ============================================================================
// Player control
// ============================================================================

/// POST /player/stop
pub async fn stop(State(ctx): State<AppContext>) -> Json<AcceptedResponse> {
    let accepted_now = ctx.player.state() != PlaybackState::Stopped;
    ctx.player.request_stop().await;
    accepted(accepted_now)
}

/// POST /player/djmode
pub async fn dj_mode(State(ctx): State<AppContext>) -> Json<AcceptedResponse> {
    accepted(ctx.player.request_dj_mode().await)
}

/// POST /player/stream
pub async fn stream(State(ctx): State<AppContext>, Json(req): Json<StreamRequest>) -> Json<AcceptedResponse> {
    accepted(ctx.player.request_stream(req.locator, req.title).await)
}

/// POST /player/force-skip
pub async fn force_skip(State(ctx): State<AppContext>) -> Result<Json<AcceptedResponse>> {
    ctx.player.force_skip().await?;
    Ok(accepted(true))
}

/// POST /player/skip
pub async fn vote_skip(
    State(ctx): State<AppContext>,
    Json(req): Json<ListenerRequest>,
) -> Result<Json<AcceptedResponse>> {
    ctx.player.vote_skip(req.listener).await?;
    Ok(accepted(true))
}

/// POST /player/unskip
pub async fn unvote_skip(
    State(ctx): State<AppContext>,
    Json(req): Json<ListenerRequest>,
) -> Result<Json<AcceptedResponse>> {
    ctx.player.unvote_skip(req.listener).await?;
    Ok(accepted(true))
}

/// POST /player/hype
pub async fn hype(State(ctx): State<AppContext>, Json(req): Json<ListenerRequest>) -> Result<Json<AcceptedResponse>> {
    ctx.player.hype(req.listener).await?;
    Ok(accepted(true))
}

/// POST /player/unhype
pub async fn unhype(State(ctx): State<AppContext>, Json(req): Json<ListenerRequest>) -> Result<Json<AcceptedResponse>> {
    ctx.player.unhype(req.listener).await?;
    Ok(accepted(true))
}

/// POST /player/title
pub async fn set_title(State(ctx): State<AppContext>, Json(req): Json<TitleRequest>) -> Result<Json<AcceptedResponse>> {
    ctx.player.set_stream_title(req.title).await?;
    Ok(accepted(true))
}

/// GET /player/volume
pub async fn get_volume(State(ctx): State<AppContext>) -> Json<VolumeBody> {
    Json(VolumeBody {
        percent: ctx.player.volume(),
    })
}

/// POST /player/volume
pub async fn set_volume(State(ctx): State<AppContext>, Json(req): Json<VolumeBody>) -> Result<Json<VolumeBody>> {
    let percent = ctx.player.set_volume(req.percent)?;
    info!("Volume set to {}%", percent);
    Ok(Json(VolumeBody { percent }))
}

// ============================================================================
// Listeners
// ============================================================================

/// GET /listeners
pub async fn list_listeners(State(ctx): State<AppContext>) -> Json<ListenerSnapshot> {
    Json(ctx.listeners.snapshot().await)
}

/// POST /listeners/join
pub async fn join(State(ctx): State<AppContext>, Json(req): Json<MembershipRequest>) -> Json<AcceptedResponse> {
    accepted(ctx.listeners.add_listener(req.listener, req.mode).await)
}

/// POST /listeners/leave
pub async fn leave(
    State(ctx): State<AppContext>,
    Json(req): Json<MembershipRequest>,
) -> Result<Json<AcceptedResponse>> {
    let removed = ctx.listeners.remove_listener(req.listener, req.mode).await?;
    Ok(accepted(removed))
}

/// POST /listeners/anonymous
pub async fn set_anonymous(State(ctx): State<AppContext>, Json(req): Json<AnonymousRequest>) -> Json<AcceptedResponse> {
    ctx.listeners.update_anonymous(req.count).await;
    accepted(true)
}

/// POST /listeners/:id/token
pub async fn issue_token(State(ctx): State<AppContext>, Path(id): Path<ListenerId>) -> Json<TokenResponse> {
    let token = ctx.listeners.issue_token(id).await;
    let (stream_url, playlist_url) = match &ctx.broadcast {
        Some(server) => {
            let config = server.config();
            (
                Some(config.stream_url(&token)),
                Some(format!(
                    "{}/playlist.pls?token={}",
                    config.public_url.trim_end_matches('/'),
                    token
                )),
            )
        }
        None => (None, None),
    };
    Json(TokenResponse {
        token,
        stream_url,
        playlist_url,
    })
}

/// POST /listeners/:id/activity
pub async fn refresh_activity(State(ctx): State<AppContext>, Path(id): Path<ListenerId>) -> Json<AcceptedResponse> {
    accepted(ctx.listeners.refresh_activity(id).await)
}

// ============================================================================
// Contributor queue
// ============================================================================

/// POST /queue/join
pub async fn queue_join(
    State(ctx): State<AppContext>,
    Json(req): Json<ListenerRequest>,
) -> Result<Json<AcceptedResponse>> {
    let joined = ctx.listeners.join_queue(req.listener).await?;
    Ok(accepted(joined))
}

/// POST /queue/leave
pub async fn queue_leave(
    State(ctx): State<AppContext>,
    Json(req): Json<ListenerRequest>,
) -> Result<Json<AcceptedResponse>> {
    ctx.listeners.leave_queue(req.listener).await?;
    Ok(accepted(true))
}

/// POST /queue/move
pub async fn queue_move(State(ctx): State<AppContext>, Json(req): Json<MoveRequest>) -> Result<Json<MoveResponse>> {
    let outcome = ctx.listeners.move_listener(req.listener, req.position).await?;
    Ok(Json(MoveResponse {
        inserted: outcome.inserted,
        position: outcome.position,
    }))
}
