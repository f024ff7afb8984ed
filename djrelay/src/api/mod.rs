//! Control API
//!
//! JSON endpoints for the chat front end and operators, plus the SSE event
//! stream. The broadcast endpoint has its own router (see
//! [`crate::broadcast::router`]) so it can be bound separately.

pub mod handlers;
pub mod sse;

use crate::broadcast::BroadcastServer;
use crate::config::RelayConfig;
use crate::error::{Error, ListenerError, PlayerError};
use crate::listeners::ListenerManager;
use crate::playback::Player;
use crate::state::SharedState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub state: Arc<SharedState>,
    pub player: Player,
    pub listeners: Arc<ListenerManager>,
    /// Present when the broadcast endpoint is enabled
    pub broadcast: Option<BroadcastServer>,
    pub config: Arc<RelayConfig>,
}

/// Build the control router
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/events", get(sse::event_stream))

        // Player control
        .route("/player/stop", post(handlers::stop))
        .route("/player/djmode", post(handlers::dj_mode))
        .route("/player/stream", post(handlers::stream))
        .route("/player/force-skip", post(handlers::force_skip))
        .route("/player/skip", post(handlers::vote_skip))
        .route("/player/unskip", post(handlers::unvote_skip))
        .route("/player/hype", post(handlers::hype))
        .route("/player/unhype", post(handlers::unhype))
        .route("/player/title", post(handlers::set_title))
        .route("/player/volume", get(handlers::get_volume).post(handlers::set_volume))

        // Listeners and contributor queue
        .route("/listeners", get(handlers::list_listeners))
        .route("/listeners/join", post(handlers::join))
        .route("/listeners/leave", post(handlers::leave))
        .route("/listeners/anonymous", post(handlers::set_anonymous))
        .route("/listeners/:id/token", post(handlers::issue_token))
        .route("/listeners/:id/activity", post(handlers::refresh_activity))
        .route("/queue/join", post(handlers::queue_join))
        .route("/queue/leave", post(handlers::queue_leave))
        .route("/queue/move", post(handlers::queue_move))

        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

impl Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Player(PlayerError::Busy)
            | Error::Player(PlayerError::NotPlaying)
            | Error::Player(PlayerError::InvalidState(_)) => StatusCode::CONFLICT,
            Error::Player(PlayerError::InvalidVolume(_)) => StatusCode::BAD_REQUEST,
            Error::Listener(ListenerError::NotListening(_)) | Error::Listener(ListenerError::NotInQueue(_)) => {
                StatusCode::NOT_FOUND
            }
            Error::Listener(ListenerError::InvalidPosition(_)) => StatusCode::BAD_REQUEST,
            Error::Listener(ListenerError::InvalidToken) | Error::Listener(ListenerError::VoiceConnected(_)) => {
                StatusCode::FORBIDDEN
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
