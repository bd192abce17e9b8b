use http::StatusCode;
use thiserror::Error;

/// Gateway-wide error type. Every backend failure is translated into one of
/// these kinds before it reaches a response, so clients see stable
/// identifiers no matter which provider produced the fault.
#[derive(Error, Debug)]
pub enum GatewayError {
	#[error("path escapes the storage root: {path}")]
	PathEscape { path: String },

	#[error("permission denied for store '{store}'")]
	PermissionDenied { store: String },

	#[error("not found: {target}")]
	NotFound { target: String },

	#[error("already exists: {target}")]
	AlreadyExists { target: String },

	#[error("'{path}' is a directory")]
	IsDirectory { path: String },

	#[error("'{path}' is not a directory")]
	NotDirectory { path: String },

	#[error("operation not supported: {operation}")]
	NotSupported { operation: String },

	#[error("no upload session for '{path}'")]
	NoUploadSession { path: String },

	#[error("size mismatch: expected {expected} bytes, got {actual}")]
	SizeMismatch { expected: u64, actual: u64 },

	#[error("digest mismatch: expected {expected}, got {actual}")]
	DigestMismatch { expected: String, actual: String },

	#[error("short write: declared {declared} bytes, received {received}")]
	ShortWrite { declared: u64, received: u64 },

	#[error("operation canceled")]
	Canceled,

	#[error("deadline exceeded")]
	Timeout,

	#[error("backend error: {message}")]
	Backend { message: String },
}

impl GatewayError {
	pub fn backend<M: Into<String>>(message: M) -> Self {
		GatewayError::Backend { message: message.into() }
	}

	/// The stable wire identifier carried in `error` frames as `error_type`.
	pub fn error_type(&self) -> &'static str {
		match self {
			GatewayError::PathEscape { .. } => "PathEscape",
			GatewayError::PermissionDenied { .. } => "PermissionDenied",
			GatewayError::NotFound { .. } => "NotFound",
			GatewayError::AlreadyExists { .. } => "AlreadyExists",
			GatewayError::IsDirectory { .. } => "IsDirectory",
			GatewayError::NotDirectory { .. } => "NotDirectory",
			GatewayError::NotSupported { .. } => "NotSupported",
			GatewayError::NoUploadSession { .. } => "NoUploadSession",
			GatewayError::SizeMismatch { .. } => "SizeMismatch",
			GatewayError::DigestMismatch { .. } => "DigestMismatch",
			GatewayError::ShortWrite { .. } => "ShortWrite",
			GatewayError::Canceled => "Canceled",
			GatewayError::Timeout => "Timeout",
			GatewayError::Backend { .. } => "Backend",
		}
	}

	/// HTTP mapping for the upload/download surfaces: 4xx for client faults,
	/// 5xx for backend faults.
	pub fn status_code(&self) -> StatusCode {
		match self {
			GatewayError::PathEscape { .. } => StatusCode::BAD_REQUEST,
			GatewayError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
			GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
			GatewayError::AlreadyExists { .. } => StatusCode::CONFLICT,
			GatewayError::IsDirectory { .. } => StatusCode::BAD_REQUEST,
			GatewayError::NotDirectory { .. } => StatusCode::BAD_REQUEST,
			GatewayError::NotSupported { .. } => StatusCode::BAD_REQUEST,
			GatewayError::NoUploadSession { .. } => StatusCode::BAD_REQUEST,
			GatewayError::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
			GatewayError::DigestMismatch { .. } => StatusCode::BAD_REQUEST,
			GatewayError::ShortWrite { .. } => StatusCode::BAD_REQUEST,
			GatewayError::Canceled => StatusCode::BAD_REQUEST,
			GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
			GatewayError::Backend { .. } => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl From<std::io::Error> for GatewayError {
	fn from(err: std::io::Error) -> Self {
		match err.kind() {
			std::io::ErrorKind::NotFound => GatewayError::NotFound { target: err.to_string() },
			std::io::ErrorKind::AlreadyExists => GatewayError::AlreadyExists { target: err.to_string() },
			std::io::ErrorKind::PermissionDenied => GatewayError::Backend { message: err.to_string() },
			std::io::ErrorKind::WriteZero => GatewayError::ShortWrite { declared: 0, received: 0 },
			std::io::ErrorKind::TimedOut => GatewayError::Timeout,
			_ => GatewayError::Backend { message: err.to_string() },
		}
	}
}

pub type GatewayResult<T> = Result<T, GatewayError>;
