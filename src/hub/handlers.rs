use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use log::debug;
use regex::Regex;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::access;
use crate::claims::UserClaims;
use crate::config::AccessMode;
use crate::error::{GatewayError, GatewayResult};
use crate::hub::Hub;
use crate::hub::messages::*;
use crate::pathguard;
use crate::storage::{ListOptions, StorageProvider};

/// Routes one inbound frame to its handler and always yields a response
/// frame: `<type>_response`, `pong`, or `error` carrying the request id.
pub async fn dispatch(hub: &Hub, claims: &UserClaims, cancel: &CancellationToken, frame: Frame) -> Frame {
	let request_id = frame.request_id.clone();

	debug!("Dispatching '{}' for {}", frame.frame_type, claims.display());

	let result = match frame.frame_type.as_str() {
		TYPE_LIST_STORAGES => list_storages(hub, claims, &frame).await,
		TYPE_LIST_DIRECTORY => list_directory(hub, claims, cancel, &frame).await,
		TYPE_READ_FILE => read_file(hub, claims, cancel, &frame).await,
		TYPE_CREATE_DIRECTORY => create_directory(hub, claims, cancel, &frame).await,
		TYPE_DELETE_ITEM => delete_item(hub, claims, cancel, &frame).await,
		TYPE_CHECK_DIRECTORY_CONTENTS => check_directory_contents(hub, claims, cancel, &frame).await,
		TYPE_PING => ping(&frame),
		TYPE_CONFIG_UPDATE => Err(GatewayError::NotSupported {
			operation: "config_update originates from the server".to_string()
		}),
		other => Err(GatewayError::NotSupported { operation: format!("unknown message type '{}'", other) })
	};

	match result {
		Ok(response) => response,
		Err(err) => Frame::error(&err, request_id)
	}
}

fn parse_payload<T: serde::de::DeserializeOwned>(frame: &Frame) -> GatewayResult<T> {
	let payload = frame.payload.clone().unwrap_or(Value::Null);

	serde_json::from_value(payload).map_err(|err| GatewayError::backend(format!("malformed payload: {}", err)))
}

fn validated<T>(request: T, validate: impl Fn(&T) -> Result<(), Box<dyn std::error::Error>>) -> GatewayResult<T> {
	validate(&request).map_err(|err| GatewayError::backend(err.to_string()))?;
	Ok(request)
}

async fn list_storages(hub: &Hub, claims: &UserClaims, frame: &Frame) -> GatewayResult<Frame> {
	let storages = access::accessible_stores(&hub.config, claims)
		.into_iter()
		.map(|store| StorageView {
			name: store.name.clone(),
			kind: store.kind.as_str().to_string()
		})
		.collect();

	Ok(Frame::response(
		"list_storages_response",
		&ListStoragesResponse { storages },
		frame.request_id.clone()
	))
}

async fn list_directory(hub: &Hub, claims: &UserClaims, cancel: &CancellationToken, frame: &Frame) -> GatewayResult<Frame> {
	let request = validated(parse_payload::<ListDirectoryRequest>(frame)?, ListDirectoryRequest::validate)?;

	access::check(&hub.config, claims, &request.store, &request.path, AccessMode::Read)?;

	let name_regex = match &request.name_filter {
		Some(pattern) => Some(
			Regex::new(pattern).map_err(|err| GatewayError::backend(format!("bad name filter: {}", err)))?
		),
		None => None
	};

	let modified_after = match &request.mod_after_iso {
		Some(iso) => Some(
			DateTime::parse_from_rfc3339(iso)
				.map(|stamp| stamp.with_timezone(&Utc))
				.map_err(|err| GatewayError::backend(format!("bad modifiedAfter timestamp: {}", err)))?
		),
		None => None
	};

	let options = ListOptions {
		page: request.page as usize,
		page_size: request
			.page_size
			.map(|size| size as usize)
			.unwrap_or_else(|| hub.config.items_per_page()),
		name_regex,
		modified_after
	};

	let provider = hub.providers.get(&request.store)?;
	let listing = provider.list(cancel, claims, &request.path, options).await?;

	Ok(Frame::response(
		"list_directory_response",
		&ListDirectoryResponse {
			store: request.store,
			path: pathguard::normalize_key(&request.path)?,
			listing
		},
		frame.request_id.clone()
	))
}

async fn read_file(hub: &Hub, claims: &UserClaims, cancel: &CancellationToken, frame: &Frame) -> GatewayResult<Frame> {
	let request = validated(parse_payload::<PathRequest>(frame)?, PathRequest::validate)?;

	access::check(&hub.config, claims, &request.store, &request.path, AccessMode::Read)?;

	let provider = hub.providers.get(&request.store)?;
	let mut reader = provider.open_read(cancel, claims, &request.path).await?;

	let mut bytes = Vec::new();
	reader.read_to_end(&mut bytes).await?;

	Ok(Frame::response(
		"read_file_response",
		&ReadFileResponse {
			store: request.store,
			path: pathguard::normalize_key(&request.path)?,
			content: general_purpose::STANDARD.encode(&bytes)
		},
		frame.request_id.clone()
	))
}

async fn create_directory(hub: &Hub, claims: &UserClaims, cancel: &CancellationToken, frame: &Frame) -> GatewayResult<Frame> {
	let request = validated(parse_payload::<PathRequest>(frame)?, PathRequest::validate)?;

	access::check(&hub.config, claims, &request.store, &request.path, AccessMode::Write)?;

	let provider = hub.providers.get(&request.store)?;
	provider.create_dir(cancel, claims, &request.path).await?;

	let path = pathguard::normalize_key(&request.path)?;

	Ok(Frame::response(
		"create_directory_response",
		&MutationResponse {
			ok: true,
			basename: pathguard::basename(&path).to_string(),
			path
		},
		frame.request_id.clone()
	))
}

async fn delete_item(hub: &Hub, claims: &UserClaims, cancel: &CancellationToken, frame: &Frame) -> GatewayResult<Frame> {
	let request = validated(parse_payload::<PathRequest>(frame)?, PathRequest::validate)?;

	access::check(&hub.config, claims, &request.store, &request.path, AccessMode::Write)?;

	let provider = hub.providers.get(&request.store)?;
	provider.delete(cancel, claims, &request.path).await?;

	let path = pathguard::normalize_key(&request.path)?;

	Ok(Frame::response(
		"delete_item_response",
		&MutationResponse {
			ok: true,
			basename: pathguard::basename(&path).to_string(),
			path
		},
		frame.request_id.clone()
	))
}

async fn check_directory_contents(
	hub: &Hub,
	claims: &UserClaims,
	cancel: &CancellationToken,
	frame: &Frame
) -> GatewayResult<Frame> {
	let request = validated(parse_payload::<PathRequest>(frame)?, PathRequest::validate)?;

	access::check(&hub.config, claims, &request.store, &request.path, AccessMode::Read)?;

	let provider = hub.providers.get(&request.store)?;

	// A 1-item listing is the cheapest way to learn whether anything is there.
	let listing = provider.list(cancel, claims, &request.path, ListOptions::first_page(1)).await?;

	Ok(Frame::response(
		"check_directory_contents_response",
		&HasContentsResponse { has_contents: listing.total_items > 0 },
		frame.request_id.clone()
	))
}

fn ping(frame: &Frame) -> GatewayResult<Frame> {
	// The nonce arrives either bare or wrapped in an object.
	let nonce = match &frame.payload {
		Some(Value::String(s)) => s.clone(),
		Some(value) => serde_json::from_value::<PingRequest>(value.clone())
			.map(|request| request.nonce)
			.unwrap_or_default(),
		None => String::new()
	};

	Ok(Frame::response(TYPE_PONG, &nonce, frame.request_id.clone()))
}
