use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::{get, post}, Router};
use http::Method;
use log::info;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

mod access;
mod api;
mod app_state;
mod claims;
mod config;
mod constants;
mod error;
mod hub;
mod pathguard;
mod shell;
mod storage;
mod uploads;
mod util;

#[cfg(test)]
mod tests;

use app_state::AppState;
use config::{Config, StoreKind};
use hub::Hub;
use shell::interactive_shell;
use storage::blob::{BlobProvider, MemoryBlockStore};
use storage::local::LocalProvider;
use storage::ProviderRegistry;
use uploads::UploadRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	// Get config; invalid configuration aborts with a non-zero exit code.
	let config = Config::initialise()?;

	// Initialise logger from the configured level; RUST_LOG still overrides.
	env_logger::Builder::new()
		.filter_level(config.level_filter())
		.parse_default_env()
		.init();

	// Print working directory
	let working_dir = env::current_dir()?;
	info!("Working directory: {}", working_dir.display());

	// Initialise missing local store roots defined in the config
	config.initialise_directories()?;

	let config = Arc::new(config);

	// Build the upload and provider registries from the storage list
	let upload_registry = Arc::new(UploadRegistry::new());
	let providers = Arc::new(ProviderRegistry::new());

	// Blob stores share one block-store client; the vendor adapter replaces
	// it in production deployments.
	let block_store = Arc::new(MemoryBlockStore::new());

	for store in config.storages.iter() {
		match store.kind {
			StoreKind::Local => {
				providers.register(Arc::new(LocalProvider::new(
					store.name.clone(),
					PathBuf::from(&store.root),
					upload_registry.clone()
				)));
			},
			StoreKind::Blob => {
				providers.register(Arc::new(BlobProvider::new(
					store.name.clone(),
					store.container.clone(),
					block_store.clone(),
					upload_registry.clone()
				)));
			}
		}

		info!("Registered {} storage '{}'", store.kind.as_str(), store.name);
	}

	// Start the session hub and its reapers
	let hub = Hub::new(config.clone(), providers.clone(), upload_registry.clone());
	let hub_task = tokio::spawn(hub.clone().run());

	// Create app state to be shared
	let shared_app_state = Arc::new(AppState {
		config: config.clone(),
		hub: hub.clone(),
		providers,
		uploads: upload_registry
	});

	// Create the CORS layer
	let cors = CorsLayer::new()
		.allow_methods([Method::GET, Method::POST])
		.allow_headers(Any)
		.allow_origin(Any);

	// Create router
	let router = Router::new()
		.route("/ws", get(api::ws::ws_api))
		.route("/lp", get(api::longpoll::config_api).post(api::longpoll::poll_api))
		.route(
			"/upload",
			post(api::upload::upload_api)
				// Body limit is the chunk data size plus form overhead
				.layer(DefaultBodyLimit::max(constants::MAX_CHUNK_SIZE + 64 * 1024))
		)
		.route("/download", get(api::download::download_api))
		.fallback_service(ServeDir::new(&config.static_ui_directory))
		.with_state(shared_app_state.clone())
		.layer(cors);

	// Create listener
	let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.ip_address, config.port)).await?;

	// Start server
	info!("Gateway listening on {}:{}", config.ip_address, config.port);
	info!("Authentication enabled: {}", config.enable_auth);

	axum::serve(listener, router)
		.with_graceful_shutdown(interactive_shell(shared_app_state.clone())) // Start the interactive shell
		.await?;

	// Tear down the hub: unregisters every session and cancels their uploads
	info!("Stopping session hub...");
	hub.cancel.cancel();
	hub_task.await?;

	info!("Shutdown complete.");

	Ok(())
}
