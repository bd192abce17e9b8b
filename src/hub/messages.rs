use serde::{Serialize, Deserialize};
use serde_json::Value;
use std::error::Error;

use crate::error::GatewayError;
use crate::storage::ListingPage;

use crate::{
	validate_integer_is_positive,
	validate_integer_range,
	validate_string_length_range
};

// Inbound frame types. The set is closed; anything else draws an error frame.
pub const TYPE_LIST_STORAGES: &str = "list_storages";
pub const TYPE_LIST_DIRECTORY: &str = "list_directory";
pub const TYPE_READ_FILE: &str = "read_file";
pub const TYPE_CREATE_DIRECTORY: &str = "create_directory";
pub const TYPE_DELETE_ITEM: &str = "delete_item";
pub const TYPE_CHECK_DIRECTORY_CONTENTS: &str = "check_directory_contents";
pub const TYPE_PING: &str = "ping";
pub const TYPE_CONFIG_UPDATE: &str = "config_update";

pub const TYPE_PONG: &str = "pong";
pub const TYPE_ERROR: &str = "error";

const MAX_NAME_LENGTH: usize = 256;
const MAX_PATH_LENGTH: usize = 1024;

/// The wire unit of the message channel. `request_id` pairs a response to
/// its request; handler concurrency may reorder everything else.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
	#[serde(rename = "type")]
	pub frame_type: String,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,

	#[serde(rename = "request_id", default, skip_serializing_if = "Option::is_none")]
	pub request_id: Option<String>
}

impl Frame {
	pub fn response<P: Serialize>(frame_type: &str, payload: &P, request_id: Option<String>) -> Frame {
		Frame {
			frame_type: frame_type.to_string(),
			payload: serde_json::to_value(payload).ok(),
			request_id
		}
	}

	pub fn error(err: &GatewayError, request_id: Option<String>) -> Frame {
		Frame {
			frame_type: TYPE_ERROR.to_string(),
			payload: serde_json::to_value(ErrorPayload {
				error_type: err.error_type().to_string(),
				message: err.to_string()
			})
			.ok(),
			request_id
		}
	}

	pub fn config_update(ping_interval_ms: u64) -> Frame {
		Frame {
			frame_type: TYPE_CONFIG_UPDATE.to_string(),
			payload: serde_json::to_value(ConfigUpdatePayload { ping_interval_ms }).ok(),
			request_id: None
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorPayload {
	#[serde(rename = "error_type")]
	pub error_type: String,

	pub message: String
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigUpdatePayload {
	#[serde(rename = "pingIntervalMs")]
	pub ping_interval_ms: u64
}

// ----------------------------------------------
// Requests
// ----------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListDirectoryRequest {
	pub store: String,

	#[serde(default)]
	pub path: String,

	pub page: i64,

	#[serde(rename = "pageSize", default)]
	pub page_size: Option<i64>,

	#[serde(rename = "nameFilter", default)]
	pub name_filter: Option<String>,

	#[serde(rename = "modAfterIso", default)]
	pub mod_after_iso: Option<String>
}

impl ListDirectoryRequest {
	pub fn validate(&self) -> Result<(), Box<dyn Error>> {
		validate_string_length_range!(self, store, 1, MAX_NAME_LENGTH);
		validate_integer_range!(self, page, 1, i64::MAX);

		if self.path.len() > MAX_PATH_LENGTH {
			return Err("Field 'path' is too long.".into());
		}

		if let Some(page_size) = self.page_size {
			validate_integer_is_positive!(page_size);
		}

		Ok(())
	}
}

/// Shared shape of the single-path operations (read, create, delete, check).
#[derive(Debug, Deserialize)]
pub struct PathRequest {
	pub store: String,

	#[serde(default)]
	pub path: String
}

impl PathRequest {
	pub fn validate(&self) -> Result<(), Box<dyn Error>> {
		validate_string_length_range!(self, store, 1, MAX_NAME_LENGTH);

		if self.path.len() > MAX_PATH_LENGTH {
			return Err("Field 'path' is too long.".into());
		}

		Ok(())
	}
}

#[derive(Debug, Deserialize)]
pub struct PingRequest {
	#[serde(default)]
	pub nonce: String
}

// ----------------------------------------------
// Responses
// ----------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct StorageView {
	pub name: String,
	pub kind: String
}

#[derive(Clone, Debug, Serialize)]
pub struct ListStoragesResponse {
	pub storages: Vec<StorageView>
}

#[derive(Clone, Debug, Serialize)]
pub struct ListDirectoryResponse {
	pub store: String,
	pub path: String,

	#[serde(flatten)]
	pub listing: ListingPage
}

#[derive(Clone, Debug, Serialize)]
pub struct ReadFileResponse {
	pub store: String,
	pub path: String,

	/// Base64 of the file bytes; binary-safe over the JSON channel.
	pub content: String
}

#[derive(Clone, Debug, Serialize)]
pub struct MutationResponse {
	pub ok: bool,
	pub path: String,
	pub basename: String
}

#[derive(Clone, Debug, Serialize)]
pub struct HasContentsResponse {
	#[serde(rename = "hasContents")]
	pub has_contents: bool
}
