use axum::{
	body::Body, extract::{multipart::Field, Multipart, State}, response::{IntoResponse, Response}, Json
};

use http::{HeaderMap, StatusCode};
use log::error;
use serde::Serialize;
use std::sync::Arc;

use crate::access;
use crate::app_state::AppState;
use crate::claims::UserClaims;
use crate::config::AccessMode;
use crate::constants;
use crate::error::{GatewayError, GatewayResult};
use crate::pathguard;
use crate::storage::StorageProvider;

use super::{error_response, extract_claims};

// ----------------------------------------------
// Form field readers
// ----------------------------------------------

// The form layout is fixed per action, so fields are consumed in order and
// a name mismatch is a fault rather than a search.
async fn next_field<'a>(multipart: &'a mut Multipart, expected: &str) -> GatewayResult<Field<'a>> {
	let field = multipart
		.next_field()
		.await
		.map_err(|err| GatewayError::backend(format!("unreadable multipart form: {}", err)))?
		.ok_or_else(|| GatewayError::backend(format!("missing form field '{}'", expected)))?;

	match field.name() {
		Some(name) if name == expected => Ok(field),
		Some(name) => Err(GatewayError::backend(format!(
			"expected form field '{}', got '{}'",
			expected, name
		))),
		None => Err(GatewayError::backend(format!("expected a named form field '{}'", expected)))
	}
}

async fn read_text_field(multipart: &mut Multipart, expected: &str) -> GatewayResult<String> {
	next_field(multipart, expected)
		.await?
		.text()
		.await
		.map_err(|err| GatewayError::backend(format!("form field '{}' is not text: {}", expected, err)))
}

async fn read_u64_field(multipart: &mut Multipart, expected: &str) -> GatewayResult<u64> {
	let text = read_text_field(multipart, expected).await?;

	text.trim()
		.parse::<u64>()
		.map_err(|_| GatewayError::backend(format!("form field '{}' is not an unsigned integer", expected)))
}

async fn read_bytes_field(multipart: &mut Multipart, expected: &str) -> GatewayResult<Vec<u8>> {
	let bytes = next_field(multipart, expected)
		.await?
		.bytes()
		.await
		.map_err(|err| GatewayError::backend(format!("form field '{}' failed to read: {}", expected, err)))?;

	Ok(bytes.to_vec())
}

/// A broken form is always the client's fault, whatever kind the reader
/// surfaced it as.
fn form_fault(err: GatewayError) -> Response {
	(StatusCode::BAD_REQUEST, Body::from(err.to_string())).into_response()
}

// ----------------------------------------------
// API - Chunked upload
// ----------------------------------------------

#[derive(Serialize)]
pub struct InitiateUploadResponse {
	#[serde(rename = "uploaded_size")]
	uploaded_size: u64
}

/// Single endpoint for the whole upload state machine. The form's `action`
/// field discriminates: initiate / chunk / finalize / cancel.
pub async fn upload_api(
	State(state): State<Arc<AppState>>,
	headers: HeaderMap,
	mut multipart: Multipart
) -> Response {
	let claims = match extract_claims(&state.config, &headers) {
		Ok(claims) => claims,
		Err(response) => return response
	};

	let storage = match read_text_field(&mut multipart, "storage").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let path = match read_text_field(&mut multipart, "path").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let action = match read_text_field(&mut multipart, "action").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	match action.as_str() {
		"initiate" => initiate_action(&state, &claims, &storage, &path, multipart).await,
		"chunk" => chunk_action(&state, &claims, &storage, &path, multipart).await,
		"finalize" => finalize_action(&state, &claims, &storage, &path, multipart).await,
		"cancel" => cancel_action(&state, &claims, &storage, &path).await,
		other => (StatusCode::BAD_REQUEST, Body::from(format!("Unknown action '{}'.", other))).into_response()
	}
}

async fn initiate_action(
	state: &AppState,
	claims: &UserClaims,
	storage: &str,
	path: &str,
	mut multipart: Multipart
) -> Response {
	let total_file_size = match read_u64_field(&mut multipart, "totalFileSize").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let chunk_size = match read_u64_field(&mut multipart, "chunkSize").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	if chunk_size == 0 || chunk_size > constants::MAX_CHUNK_SIZE as u64 {
		return (StatusCode::BAD_REQUEST, Body::from("chunkSize out of range")).into_response();
	}

	if let Err(err) = access::check(&state.config, claims, storage, path, AccessMode::Write) {
		return error_response(err);
	}

	let provider = match state.providers.get(storage) {
		Ok(provider) => provider,
		Err(err) => return error_response(err)
	};

	let cancel = state.hub.cancel.child_token();

	match provider.initiate_upload(&cancel, claims, path, total_file_size, chunk_size).await {
		Ok(uploaded_size) => Json(InitiateUploadResponse { uploaded_size }).into_response(),
		Err(err) => {
			error!("Initiate upload for '{}:{}' failed: {}", storage, path, err);
			error_response(err)
		}
	}
}

async fn chunk_action(
	state: &AppState,
	claims: &UserClaims,
	storage: &str,
	path: &str,
	mut multipart: Multipart
) -> Response {
	let chunk_index = match read_u64_field(&mut multipart, "chunkIndex").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let chunk_size = match read_u64_field(&mut multipart, "chunkSize").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let block_id = match read_text_field(&mut multipart, "blockId").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let data = match read_bytes_field(&mut multipart, "data").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	// The declared size must match the payload exactly; the client declares
	// the trailing partial's real size on the last chunk.
	if data.len() as u64 != chunk_size {
		return error_response(GatewayError::ShortWrite {
			declared: chunk_size,
			received: data.len() as u64
		});
	}

	if let Err(err) = access::check(&state.config, claims, storage, path, AccessMode::Write) {
		return error_response(err);
	}

	let provider = match state.providers.get(storage) {
		Ok(provider) => provider,
		Err(err) => return error_response(err)
	};

	let block_id = if block_id.is_empty() { None } else { Some(block_id) };

	if let Ok(key) = pathguard::normalize_key(path) {
		state.uploads.touch(&(storage.to_string(), key));
	}

	let cancel = state.hub.cancel.child_token();

	match provider.write_chunk(&cancel, claims, path, chunk_index, block_id.as_deref(), &data).await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(err) => {
			error!("Chunk {} for '{}:{}' failed: {}", chunk_index, storage, path, err);
			error_response(err)
		}
	}
}

async fn finalize_action(
	state: &AppState,
	claims: &UserClaims,
	storage: &str,
	path: &str,
	mut multipart: Multipart
) -> Response {
	let ordered_block_ids = match read_text_field(&mut multipart, "orderedBlockIds").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let client_sha256_hex = match read_text_field(&mut multipart, "clientSha256Hex").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	let total_file_size = match read_u64_field(&mut multipart, "totalFileSize").await {
		Ok(value) => value,
		Err(err) => return form_fault(err)
	};

	// Local uploads send an empty list; block backends send a JSON array.
	let ordered_block_ids: Vec<String> = if ordered_block_ids.trim().is_empty() {
		Vec::new()
	} else {
		match serde_json::from_str(&ordered_block_ids) {
			Ok(ids) => ids,
			Err(err) => {
				return (StatusCode::BAD_REQUEST, Body::from(format!("orderedBlockIds is not a JSON array: {}", err)))
					.into_response()
			}
		}
	};

	if let Err(err) = access::check(&state.config, claims, storage, path, AccessMode::Write) {
		return error_response(err);
	}

	let provider = match state.providers.get(storage) {
		Ok(provider) => provider,
		Err(err) => return error_response(err)
	};

	let cancel = state.hub.cancel.child_token();

	match provider
		.finalize_upload(&cancel, claims, path, &ordered_block_ids, total_file_size, &client_sha256_hex)
		.await
	{
		Ok(()) => StatusCode::OK.into_response(),
		Err(err) => {
			error!("Finalize for '{}:{}' failed: {}", storage, path, err);
			error_response(err)
		}
	}
}

async fn cancel_action(state: &AppState, claims: &UserClaims, storage: &str, path: &str) -> Response {
	let provider = match state.providers.get(storage) {
		Ok(provider) => provider,
		Err(err) => return error_response(err)
	};

	let cancel = state.hub.cancel.child_token();

	// Cancelling something already gone is a success; the client just wants
	// the state to not exist.
	match provider.cancel_upload(&cancel, claims, path).await {
		Ok(()) => StatusCode::OK.into_response(),
		Err(err) => {
			error!("Cancel for '{}:{}' failed: {}", storage, path, err);
			error_response(err)
		}
	}
}
