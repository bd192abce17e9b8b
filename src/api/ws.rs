use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::HeaderMap;
use log::debug;

use crate::app_state::AppState;
use crate::claims::UserClaims;
use crate::constants;
use crate::hub::messages::Frame;
use crate::hub::pumps;
use crate::hub::session::Session;
use crate::hub::Hub;

use super::extract_claims;

// ----------------------------------------------
// API - Duplex transport
// ----------------------------------------------

pub async fn ws_api(
	State(state): State<Arc<AppState>>,
	headers: HeaderMap,
	ws: WebSocketUpgrade
) -> Response {
	let claims = match extract_claims(&state.config, &headers) {
		Ok(claims) => claims,
		Err(response) => return response
	};

	// Chunk bytes travel over the upload endpoint; this channel only carries
	// control traffic, so the cap can be tight.
	ws.max_message_size(constants::MAX_CONTROL_FRAME_SIZE)
		.on_upgrade(move |socket| accept_session(state.hub.clone(), claims, socket))
}

async fn accept_session(hub: Arc<Hub>, claims: UserClaims, socket: WebSocket) {
	let (session, outbound_rx) = Session::new_duplex(claims, &hub.cancel);
	let session = Arc::new(session);

	debug!("Accepted duplex session {} for {}", session.id, session.claims.display());

	hub.register(session.clone()).await;

	// The client learns its keep-alive cadence before anything else happens.
	if let Some(outbound) = session.outbound() {
		let interval_ms = hub.config.ping_interval().as_millis() as u64;
		let _ = outbound.send(Frame::config_update(interval_ms)).await;
	}

	pumps::run_session(hub, session, socket, outbound_rx).await;
}
