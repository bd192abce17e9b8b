pub mod download;
pub mod longpoll;
pub mod upload;
pub mod validation;
pub mod ws;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode};

use crate::claims::{claims_from_headers, UserClaims};
use crate::config::Config;
use crate::error::GatewayError;

/// Resolves the caller's identity. With auth enabled the reverse proxy must
/// have injected validated identity headers; without it every caller gets a
/// fresh anonymous identity.
pub fn extract_claims(config: &Config, headers: &HeaderMap) -> Result<UserClaims, Response> {
	if config.enable_auth {
		claims_from_headers(&config.auth, headers)
			.ok_or_else(|| (StatusCode::UNAUTHORIZED, Body::from("missing identity headers")).into_response())
	} else {
		Ok(UserClaims::anonymous())
	}
}

/// Maps a gateway error onto the HTTP surface: 4xx client faults, 5xx
/// backend faults, message in the body.
pub fn error_response(err: GatewayError) -> Response {
	(err.status_code(), Body::from(err.to_string())).into_response()
}
