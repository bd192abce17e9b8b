use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::LevelFilter;
use serde::{Serialize, Deserialize};

use crate::constants;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
	Read,
	Write
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
	Local,
	Blob
}

impl StoreKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			StoreKind::Local => "local",
			StoreKind::Blob => "blob"
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionEntry {
	pub group: String,
	pub mode: AccessMode
}

/// One named backing store. `root` is used by local stores, `container` by
/// blob stores; the unused field stays empty in the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
	pub name: String,
	pub kind: StoreKind,

	#[serde(default)]
	pub root: String,

	#[serde(default)]
	pub container: String,

	#[serde(default)]
	pub permissions: Vec<PermissionEntry>
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaginationConfig {
	#[serde(rename = "items_per_page", default)]
	pub items_per_page: usize
}

impl Default for PaginationConfig {
	fn default() -> Self {
		Self { items_per_page: constants::DEFAULT_ITEMS_PER_PAGE }
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutsConfig {
	#[serde(default = "default_io_timeout_secs")]
	pub read: u64,

	#[serde(default = "default_io_timeout_secs")]
	pub write: u64,

	#[serde(default = "default_idle_timeout_secs")]
	pub idle: u64
}

fn default_io_timeout_secs() -> u64 { 30 }
fn default_idle_timeout_secs() -> u64 { constants::POLLING_SESSION_IDLE_SECONDS }

impl Default for TimeoutsConfig {
	fn default() -> Self {
		Self {
			read: default_io_timeout_secs(),
			write: default_io_timeout_secs(),
			idle: default_idle_timeout_secs()
		}
	}
}

/// Names of the reverse-proxy identity headers the gateway trusts when
/// `enable_auth` is set. Token validation happens upstream; by the time a
/// request carries these headers the identity provider has already vouched
/// for them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
	#[serde(default = "default_subject_header")]
	pub subject_header: String,

	#[serde(default = "default_email_header")]
	pub email_header: String,

	#[serde(default = "default_groups_header")]
	pub groups_header: String
}

fn default_subject_header() -> String { "x-auth-subject".to_string() }
fn default_email_header() -> String { "x-auth-email".to_string() }
fn default_groups_header() -> String { "x-auth-groups".to_string() }

impl Default for AuthConfig {
	fn default() -> Self {
		Self {
			subject_header: default_subject_header(),
			email_header: default_email_header(),
			groups_header: default_groups_header()
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	/** The ip address the server listens on without the port. e.g. 127.0.0.1 */
	#[serde(default = "default_ip_address")]
	pub ip_address: String,

	/** The port the server should listen on. */
	#[serde(default = "default_port")]
	pub port: u16,

	#[serde(default)]
	pub enable_auth: bool,

	#[serde(default)]
	pub auth: AuthConfig,

	/** Members of any of these groups bypass per-store permission checks. */
	#[serde(default)]
	pub global_admin_groups: Vec<String>,

	#[serde(default)]
	pub storages: Vec<StoreConfig>,

	#[serde(default)]
	pub pagination: PaginationConfig,

	#[serde(default)]
	pub timeouts: TimeoutsConfig,

	/** Keep-alive probe interval for duplex clients, in milliseconds. */
	#[serde(default)]
	pub client_ping_interval_ms: u64,

	/** Seconds an upload may sit untouched before the orphan reaper cancels it. */
	#[serde(default)]
	pub upload_cleanup_timeout: u64,

	/** DEBUG or INFO. Anything else degrades to INFO with a warning. */
	#[serde(default = "default_log_level")]
	pub log_level: String,

	/** Directory holding the static web UI. Served as-is at the root path. */
	#[serde(default = "default_static_ui_directory")]
	pub static_ui_directory: String
}

fn default_ip_address() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 3001 }
fn default_log_level() -> String { "INFO".to_string() }
fn default_static_ui_directory() -> String { "frontend/dist".to_string() }

impl Default for Config {
	fn default() -> Self {
		Self {
			ip_address: default_ip_address(),
			port: default_port(),
			enable_auth: false,
			auth: AuthConfig::default(),
			global_admin_groups: Vec::new(),
			storages: vec![
				StoreConfig {
					name: "local".to_string(),
					kind: StoreKind::Local,
					root: "storeroot".to_string(),
					container: String::new(),
					permissions: Vec::new()
				}
			],
			pagination: PaginationConfig::default(),
			timeouts: TimeoutsConfig::default(),
			client_ping_interval_ms: constants::DEFAULT_CLIENT_PING_INTERVAL_MS,
			upload_cleanup_timeout: constants::DEFAULT_ORPHAN_UPLOAD_TTL_SECONDS,
			log_level: default_log_level(),
			static_ui_directory: default_static_ui_directory()
		}
	}
}

impl Config {
	/// Loads the config file named by the FILEGATE_CONFIG environment variable
	/// (default `filegate.json`). A default file is written when none exists so
	/// a fresh checkout starts without manual setup.
	pub fn initialise() -> Result<Config, Box<dyn std::error::Error>> {
		// A .env file may provide FILEGATE_CONFIG; absence is fine.
		let _ = dotenvy::dotenv();

		let path = env::var(constants::CONFIG_PATH_ENV_VAR)
			.unwrap_or_else(|_| constants::DEFAULT_CONFIG_PATH.to_string());

		if !Path::new(&path).exists() {
			println!("Creating new config file at '{}' since none was found.", path);

			let config = Config::default();
			fs::write(&path, serde_json::to_string_pretty(&config)?)?;
		}

		let contents = fs::read_to_string(&path)?;
		let config: Config = serde_json::from_str(&contents)?;

		config.validate()?;

		Ok(config)
	}

	pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
		if self.storages.is_empty() {
			return Err("Config must declare at least one storage.".into());
		}

		for store in self.storages.iter() {
			if store.name.trim().is_empty() {
				return Err("Every storage needs a non-empty name.".into());
			}

			match store.kind {
				StoreKind::Local => {
					if store.root.trim().is_empty() {
						return Err(format!("Local storage '{}' needs a 'root' path.", store.name).into());
					}
				},
				StoreKind::Blob => {
					if store.container.trim().is_empty() {
						return Err(format!("Blob storage '{}' needs a 'container' name.", store.name).into());
					}
				}
			}

			let duplicates = self.storages.iter().filter(|other| other.name == store.name).count();

			if duplicates > 1 {
				return Err(format!("Storage name '{}' is declared more than once.", store.name).into());
			}
		}

		Ok(())
	}

	/// Creates root directories for local stores that don't exist yet.
	pub fn initialise_directories(&self) -> Result<(), Box<dyn std::error::Error>> {
		for store in self.storages.iter() {
			if store.kind == StoreKind::Local && !Path::new(&store.root).exists() {
				fs::create_dir_all(&store.root)?;
			}
		}

		Ok(())
	}

	pub fn find_store(&self, name: &str) -> Option<&StoreConfig> {
		self.storages.iter().find(|store| store.name == name)
	}

	pub fn ping_interval(&self) -> Duration {
		if self.client_ping_interval_ms == 0 {
			Duration::from_millis(constants::DEFAULT_CLIENT_PING_INTERVAL_MS)
		} else {
			Duration::from_millis(self.client_ping_interval_ms)
		}
	}

	pub fn orphan_upload_ttl(&self) -> Duration {
		if self.upload_cleanup_timeout == 0 {
			Duration::from_secs(constants::DEFAULT_ORPHAN_UPLOAD_TTL_SECONDS)
		} else {
			Duration::from_secs(self.upload_cleanup_timeout)
		}
	}

	pub fn items_per_page(&self) -> usize {
		if self.pagination.items_per_page == 0 {
			constants::DEFAULT_ITEMS_PER_PAGE
		} else {
			self.pagination.items_per_page
		}
	}

	/// Resolves the configured log level. Unknown values degrade to INFO; the
	/// warning is printed rather than logged because the logger isn't up yet.
	pub fn level_filter(&self) -> LevelFilter {
		match self.log_level.to_uppercase().as_str() {
			"DEBUG" => LevelFilter::Debug,
			"INFO" => LevelFilter::Info,
			other => {
				eprintln!("Unknown log_level '{}', falling back to INFO.", other);
				LevelFilter::Info
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store(name: &str, kind: StoreKind) -> StoreConfig {
		StoreConfig {
			name: name.to_string(),
			kind,
			root: if kind == StoreKind::Local { "/tmp/x".to_string() } else { String::new() },
			container: if kind == StoreKind::Blob { "c".to_string() } else { String::new() },
			permissions: Vec::new()
		}
	}

	#[test]
	fn default_config_validates() {
		assert!(Config::default().validate().is_ok());
	}

	#[test]
	fn duplicate_store_names_are_rejected() {
		let mut config = Config::default();
		config.storages = vec![store("s", StoreKind::Local), store("s", StoreKind::Blob)];

		assert!(config.validate().is_err());
	}

	#[test]
	fn local_store_without_root_is_rejected() {
		let mut config = Config::default();
		let mut bad = store("s", StoreKind::Local);
		bad.root = String::new();
		config.storages = vec![bad];

		assert!(config.validate().is_err());
	}

	#[test]
	fn zero_page_size_defaults_to_fifty() {
		let mut config = Config::default();
		config.pagination.items_per_page = 0;

		assert_eq!(config.items_per_page(), 50);
	}

	#[test]
	fn missing_intervals_fall_back_to_defaults() {
		let mut config = Config::default();
		config.client_ping_interval_ms = 0;
		config.upload_cleanup_timeout = 0;

		assert_eq!(config.ping_interval(), Duration::from_millis(10_000));
		assert_eq!(config.orphan_upload_ttl(), Duration::from_secs(600));
	}

	#[test]
	fn unknown_log_level_degrades_to_info() {
		let mut config = Config::default();
		config.log_level = "CHATTY".to_string();

		assert_eq!(config.level_filter(), LevelFilter::Info);
	}

	#[test]
	fn config_round_trips_through_json() {
		let config = Config::default();
		let json = serde_json::to_string(&config).unwrap();
		let parsed: Config = serde_json::from_str(&json).unwrap();

		assert_eq!(parsed.storages.len(), config.storages.len());
		assert_eq!(parsed.port, config.port);
	}
}
