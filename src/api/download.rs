use axum::{
	body::Body, extract::{Query, State}, response::{IntoResponse, Response}
};

use http::{header, HeaderMap, StatusCode};
use log::error;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::access;
use crate::app_state::AppState;
use crate::config::AccessMode;
use crate::pathguard;
use crate::storage::StorageProvider;

use super::{error_response, extract_claims};

// ----------------------------------------------
// API - Download
// ----------------------------------------------

#[derive(Deserialize)]
pub struct DownloadParams {
	storage: String,

	#[serde(default)]
	path: String
}

pub async fn download_api(
	State(state): State<Arc<AppState>>,
	headers: HeaderMap,
	Query(params): Query<DownloadParams>
) -> Response {
	let claims = match extract_claims(&state.config, &headers) {
		Ok(claims) => claims,
		Err(response) => return response
	};

	if let Err(err) = access::check(&state.config, &claims, &params.storage, &params.path, AccessMode::Read) {
		return error_response(err);
	}

	let provider = match state.providers.get(&params.storage) {
		Ok(provider) => provider,
		Err(err) => return error_response(err)
	};

	let cancel = state.hub.cancel.child_token();

	match provider.open_read(&cancel, &claims, &params.path).await {
		Ok(reader) => {
			let filename = pathguard::basename(&params.path).to_string();

			let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));

			match Response::builder()
				.status(StatusCode::OK)
				.header(header::CONTENT_TYPE, "application/octet-stream")
				.header(header::CONTENT_DISPOSITION, disposition)
				.body(Body::from_stream(ReaderStream::new(reader)))
			{
				Ok(response) => response,
				Err(err) => {
					error!("Download response build error: {}", err);
					StatusCode::INTERNAL_SERVER_ERROR.into_response()
				}
			}
		},
		Err(err) => {
			error!("Download open error for '{}:{}': {}", params.storage, params.path, err);
			error_response(err)
		}
	}
}
