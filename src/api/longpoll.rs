use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::HeaderMap;
use log::debug;
use nanoid::nanoid;
use serde::Deserialize;
use tokio::time::timeout;

use crate::app_state::AppState;
use crate::constants;
use crate::error::GatewayError;
use crate::hub::handlers;
use crate::hub::messages::Frame;
use crate::hub::session::Session;

use super::extract_claims;

pub const SESSION_ID_HEADER: &str = "x-session-id";

#[derive(Deserialize)]
pub struct PollParams {
	#[serde(default)]
	sid: Option<String>
}

// ----------------------------------------------
// API - Polling fallback, initial config
// ----------------------------------------------

pub async fn config_api(State(state): State<Arc<AppState>>) -> impl IntoResponse {
	Json(Frame::config_update(state.config.ping_interval().as_millis() as u64))
}

// ----------------------------------------------
// API - Polling fallback, one-shot dispatch
// ----------------------------------------------

/// One frame in, one frame out, through the same handler dispatch as the
/// duplex transport. The polling session exists so the idle reaper has an
/// identity to expire; its queue is never drained.
pub async fn poll_api(
	State(state): State<Arc<AppState>>,
	Query(params): Query<PollParams>,
	headers: HeaderMap,
	Json(frame): Json<Frame>
) -> Response {
	let session = match params.sid.as_deref().and_then(|sid| state.hub.find_session(sid)) {
		Some(session) => {
			session.touch();
			session
		},
		None => {
			let claims = match extract_claims(&state.config, &headers) {
				Ok(claims) => claims,
				Err(response) => return response
			};

			let sid = params.sid.clone().unwrap_or_else(|| nanoid!((constants::SESSION_ID_LENGTH)));
			let session = Arc::new(Session::new_polling(sid, claims, &state.hub.cancel));

			debug!("Accepted polling session {} for {}", session.id, session.claims.display());

			state.hub.register(session.clone()).await;
			session
		}
	};

	let handler_cancel = session.cancel.child_token();
	let request_id = frame.request_id.clone();
	let deadline = Duration::from_secs(constants::HANDLER_TIMEOUT_SECONDS);

	let response = match timeout(deadline, handlers::dispatch(&state.hub, &session.claims, &handler_cancel, frame)).await {
		Ok(response) => response,
		Err(_) => Frame::error(&GatewayError::Timeout, request_id)
	};

	([(SESSION_ID_HEADER, session.id.clone())], Json(response)).into_response()
}
