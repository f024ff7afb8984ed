//! HTTP surface of the broadcast endpoint

use super::server::BroadcastServer;
use crate::error::Error;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Routes for the stream and its playlist descriptor
pub fn router(server: BroadcastServer) -> Router {
    let path = server.config().path.clone();
    Router::new()
        .route(&path, get(stream))
        .route("/playlist.pls", get(playlist))
        .with_state(server)
}

fn wants_metadata(headers: &HeaderMap) -> bool {
    headers
        .get("icy-metadata")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim() == "1")
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if value.is_empty() {
        return;
    }
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => debug!("Skipping header {} with invalid value {:?}", name, value),
    }
}

fn stream_headers(server: &BroadcastServer, metadata: bool) -> HeaderMap {
    let config = server.config();
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, "content-type", &config.content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    insert_header(&mut headers, "icy-br", &config.bitrate_kbps.to_string());
    headers.insert(HeaderName::from_static("icy-pub"), HeaderValue::from_static("0"));
    insert_header(&mut headers, "icy-name", &config.name);
    insert_header(&mut headers, "icy-description", &config.description);
    insert_header(&mut headers, "icy-genre", &config.genre);
    insert_header(&mut headers, "icy-url", &config.url);
    if metadata {
        insert_header(&mut headers, "icy-metaint", &config.block_size.to_string());
    }
    headers
}

async fn stream(State(server): State<BroadcastServer>, Query(query): Query<TokenQuery>, headers: HeaderMap) -> Response {
    let Some(token) = query.token else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let listener = match server.listeners().validate_token(&token).await {
        Ok(listener) => listener,
        Err(e) => {
            debug!("Rejected stream request: {}", e);
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    let metadata = wants_metadata(&headers);
    let connection = match server.connect(listener, metadata).await {
        Ok(connection) => connection,
        Err(Error::Listener(e)) => {
            debug!("Rejected stream request: {}", e);
            return StatusCode::FORBIDDEN.into_response();
        }
        Err(e) => {
            error!("Failed to accept stream for listener {}: {}", listener, e);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let body = Body::from_stream(connection.into_stream());
    (StatusCode::OK, stream_headers(&server, metadata), body).into_response()
}

async fn playlist(State(server): State<BroadcastServer>, Query(query): Query<TokenQuery>) -> Response {
    let Some(token) = query.token else {
        return StatusCode::FORBIDDEN.into_response();
    };
    if server.listeners().validate_token(&token).await.is_err() {
        return StatusCode::FORBIDDEN.into_response();
    }

    let config = server.config();
    let body = format!(
        "[playlist]\nNumberOfEntries=1\nFile1={}\nTitle1={}\nLength1=-1\nVersion=2\n",
        config.stream_url(&token),
        config.name
    );
    ([(header::CONTENT_TYPE, "audio/x-scpls")], body).into_response()
}
