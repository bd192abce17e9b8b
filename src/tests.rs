//! Cross-component flows: upload lifecycle against real providers, the
//! hub's disconnect sweep, and the message channel on top of both.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::access;
use crate::claims::UserClaims;
use crate::config::{AccessMode, Config, PermissionEntry, StoreConfig, StoreKind};
use crate::hub::handlers::dispatch;
use crate::hub::messages::Frame;
use crate::hub::session::Session;
use crate::hub::Hub;
use crate::storage::blob::{BlobProvider, MemoryBlockStore};
use crate::storage::local::LocalProvider;
use crate::storage::{ProviderRegistry, StorageProvider};
use crate::uploads::UploadRegistry;

struct Fixture {
	hub: Arc<Hub>,
	uploads: Arc<UploadRegistry>,
	root: PathBuf
}

fn writer_claims(email: &str) -> UserClaims {
	UserClaims {
		subject: format!("sub-{}", email),
		email: Some(email.to_string()),
		groups: vec!["writers".to_string()]
	}
}

fn fixture() -> Fixture {
	let root = std::env::temp_dir().join(format!("filegate-it-{}", nanoid!(8)));
	std::fs::create_dir_all(&root).unwrap();

	let mut config = Config::default();
	config.storages = vec![
		StoreConfig {
			name: "files".to_string(),
			kind: StoreKind::Local,
			root: root.to_string_lossy().into_owned(),
			container: String::new(),
			permissions: vec![PermissionEntry { group: "writers".to_string(), mode: AccessMode::Write }]
		},
		StoreConfig {
			name: "media".to_string(),
			kind: StoreKind::Blob,
			root: String::new(),
			container: "media".to_string(),
			permissions: vec![PermissionEntry { group: "writers".to_string(), mode: AccessMode::Write }]
		}
	];

	let config = Arc::new(config);
	let uploads = Arc::new(UploadRegistry::new());
	let providers = Arc::new(ProviderRegistry::new());

	providers.register(Arc::new(LocalProvider::new("files".to_string(), root.clone(), uploads.clone())));
	providers.register(Arc::new(BlobProvider::new(
		"media".to_string(),
		"media".to_string(),
		Arc::new(MemoryBlockStore::new()),
		uploads.clone()
	)));

	Fixture { hub: Hub::new(config, providers, uploads.clone()), uploads, root }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
	for _ in 0..100 {
		if condition() {
			return;
		}

		tokio::time::sleep(Duration::from_millis(20)).await;
	}

	panic!("condition not reached in time");
}

#[tokio::test]
async fn uploaded_files_are_readable_over_the_message_channel() {
	let fixture = fixture();
	let cancel = CancellationToken::new();
	let claims = writer_claims("w@x.io");

	let payload = b"payload travelling end to end".to_vec();
	let digest = hex::encode(Sha256::digest(&payload));

	let provider = fixture.hub.providers.get("files").unwrap();
	provider.initiate_upload(&cancel, &claims, "e2e.bin", payload.len() as u64, 8).await.unwrap();

	for (index, chunk) in payload.chunks(8).enumerate() {
		provider.write_chunk(&cancel, &claims, "e2e.bin", index as u64, None, chunk).await.unwrap();
	}

	provider
		.finalize_upload(&cancel, &claims, "e2e.bin", &[], payload.len() as u64, &digest)
		.await
		.unwrap();

	let frame = Frame {
		frame_type: "read_file".to_string(),
		payload: Some(json!({ "store": "files", "path": "e2e.bin" })),
		request_id: Some("r1".to_string())
	};

	let response = dispatch(&fixture.hub, &claims, &cancel, frame).await;

	assert_eq!(response.frame_type, "read_file_response");

	use base64::{engine::general_purpose, Engine as _};
	let content = response.payload.unwrap()["content"].as_str().unwrap().to_string();
	assert_eq!(general_purpose::STANDARD.decode(content).unwrap(), payload);
}

#[tokio::test]
async fn disconnect_sweeps_the_departing_identity_uploads() {
	let fixture = fixture();
	let cancel = CancellationToken::new();
	let claims = writer_claims("leaver@x.io");

	let runner = tokio::spawn(fixture.hub.clone().run());

	let (session, _rx) = Session::new_duplex(claims.clone(), &fixture.hub.cancel);
	let session = Arc::new(session);
	let session_id = session.id.clone();
	fixture.hub.register(session).await;

	let provider = fixture.hub.providers.get("files").unwrap();
	provider.initiate_upload(&cancel, &claims, "left-behind.bin", 100, 10).await.unwrap();
	provider.write_chunk(&cancel, &claims, "left-behind.bin", 0, None, b"0123456789").await.unwrap();

	assert_eq!(fixture.uploads.len(), 1);
	assert!(fixture.root.join("left-behind.bin").exists());

	fixture.hub.unregister(&session_id);

	let uploads = fixture.uploads.clone();
	wait_until(move || uploads.is_empty()).await;

	let root = fixture.root.clone();
	wait_until(move || !root.join("left-behind.bin").exists()).await;

	fixture.hub.cancel.cancel();
	runner.await.unwrap();
}

#[tokio::test]
async fn disconnect_leaves_other_identities_uploads_alone() {
	let fixture = fixture();
	let cancel = CancellationToken::new();

	let leaver = writer_claims("leaver@x.io");
	let stayer = writer_claims("stayer@x.io");

	let runner = tokio::spawn(fixture.hub.clone().run());

	let (session, _rx) = Session::new_duplex(leaver.clone(), &fixture.hub.cancel);
	let session = Arc::new(session);
	let session_id = session.id.clone();
	fixture.hub.register(session).await;

	let provider = fixture.hub.providers.get("files").unwrap();
	provider.initiate_upload(&cancel, &stayer, "stays.bin", 100, 10).await.unwrap();

	fixture.hub.unregister(&session_id);
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(fixture.uploads.len(), 1);
	assert!(fixture.uploads.get(&("files".to_string(), "stays.bin".to_string())).is_some());

	fixture.hub.cancel.cancel();
	runner.await.unwrap();
}

#[tokio::test]
async fn blob_and_local_uploads_share_the_registry_without_collisions() {
	let fixture = fixture();
	let cancel = CancellationToken::new();
	let claims = writer_claims("w@x.io");

	let local = fixture.hub.providers.get("files").unwrap();
	let blob = fixture.hub.providers.get("media").unwrap();

	// Same relative path in two different stores: two distinct keys.
	local.initiate_upload(&cancel, &claims, "same.bin", 10, 5).await.unwrap();
	blob.initiate_upload(&cancel, &claims, "same.bin", 10, 5).await.unwrap();

	assert_eq!(fixture.uploads.len(), 2);

	local.cancel_upload(&cancel, &claims, "same.bin").await.unwrap();
	blob.cancel_upload(&cancel, &claims, "same.bin").await.unwrap();

	assert!(fixture.uploads.is_empty());
}

#[tokio::test]
async fn reap_then_reinitiate_starts_from_zero() {
	let fixture = fixture();
	let cancel = CancellationToken::new();
	let claims = writer_claims("w@x.io");

	let provider = fixture.hub.providers.get("files").unwrap();
	provider.initiate_upload(&cancel, &claims, "orphan.bin", 100, 10).await.unwrap();
	provider.write_chunk(&cancel, &claims, "orphan.bin", 0, None, b"0123456789").await.unwrap();

	// Everything is stale under a zero TTL; nothing is under a long one.
	assert!(fixture.uploads.stale_keys(Duration::from_secs(3600)).is_empty());

	wait_until({
		let uploads = fixture.uploads.clone();
		move || !uploads.stale_keys(Duration::ZERO).is_empty()
	})
	.await;

	// What the orphan reaper does for each stale key.
	provider.cancel_upload(&cancel, &claims, "orphan.bin").await.unwrap();

	let offset = provider.initiate_upload(&cancel, &claims, "orphan.bin", 100, 10).await.unwrap();
	assert_eq!(offset, 0);
}

#[tokio::test]
async fn providers_are_only_reachable_through_authorization() {
	let fixture = fixture();
	let nobody = UserClaims::anonymous();

	// The evaluator is the single gate in front of every provider call.
	let denied = access::check(&fixture.hub.config, &nobody, "files", "x", AccessMode::Read);
	assert_eq!(denied.unwrap_err().error_type(), "PermissionDenied");

	let missing = access::check(&fixture.hub.config, &nobody, "ghost", "x", AccessMode::Read);
	assert_eq!(missing.unwrap_err().error_type(), "NotFound");
}
