use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::claims::UserClaims;
use crate::config::StoreKind;
use crate::error::{GatewayError, GatewayResult};
use crate::pathguard;
use crate::uploads::{UploadEntry, UploadKey, UploadRegistry, UploadState};

use super::{ensure_not_cancelled, paginate, ByteReader, ItemInfo, ListOptions, ListingPage, StorageProvider};

const HASH_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Filesystem-backed store. Uploads write straight to the target path in
/// append mode, which is what makes resumption a plain "continue from the
/// current length".
pub struct LocalProvider {
	name: String,
	root: PathBuf,
	registry: Arc<UploadRegistry>
}

impl LocalProvider {
	pub fn new(name: String, root: PathBuf, registry: Arc<UploadRegistry>) -> Self {
		Self { name, root, registry }
	}

	fn guard(&self, relative: &str) -> GatewayResult<PathBuf> {
		pathguard::resolve(&self.root, relative)
	}

	fn upload_key(&self, relative: &str) -> GatewayResult<UploadKey> {
		Ok((self.name.clone(), pathguard::normalize_key(relative)?))
	}

	async fn item_info(&self, dir_key: &str, entry: &tokio::fs::DirEntry) -> GatewayResult<ItemInfo> {
		let name = entry.file_name().to_string_lossy().into_owned();
		let metadata = entry.metadata().await?;

		let modified: DateTime<Utc> = metadata
			.modified()
			.map(DateTime::<Utc>::from)
			.unwrap_or_else(|_| Utc::now());

		let path = if dir_key.is_empty() {
			name.clone()
		} else {
			format!("{}/{}", dir_key, name)
		};

		Ok(ItemInfo {
			name,
			path,
			is_directory: metadata.is_dir(),
			size: if metadata.is_dir() { 0 } else { metadata.len() },
			modified
		})
	}

	/// Streams the finished file through SHA-256.
	async fn hash_file(&self, cancel: &CancellationToken, target: &PathBuf) -> GatewayResult<String> {
		let mut file = File::open(target).await?;
		let mut hasher = Sha256::new();
		let mut buffer = vec![0u8; HASH_READ_BUFFER_SIZE];

		loop {
			ensure_not_cancelled(cancel)?;

			let read = file.read(&mut buffer).await?;

			if read == 0 {
				break;
			}

			hasher.update(&buffer[..read]);
		}

		Ok(hex::encode(hasher.finalize()))
	}
}

#[async_trait]
impl StorageProvider for LocalProvider {
	fn kind(&self) -> StoreKind {
		StoreKind::Local
	}

	fn store_name(&self) -> &str {
		&self.name
	}

	async fn list(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		dir: &str,
		options: ListOptions
	) -> GatewayResult<ListingPage> {
		let guarded = self.guard(dir)?;
		let dir_key = pathguard::normalize_key(dir)?;

		debug!("[{}] list '{}' for {}", self.name, dir_key, claims.display());

		let metadata = fs::metadata(&guarded).await?;

		if !metadata.is_dir() {
			return Err(GatewayError::NotDirectory { path: dir_key });
		}

		let mut reader = fs::read_dir(&guarded).await?;
		let mut items = Vec::new();

		while let Some(entry) = reader.next_entry().await? {
			ensure_not_cancelled(cancel)?;
			items.push(self.item_info(&dir_key, &entry).await?);
		}

		Ok(paginate(items, &options))
	}

	async fn open_read(
		&self,
		_cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<ByteReader> {
		let guarded = self.guard(path)?;

		debug!("[{}] open '{}' for {}", self.name, path, claims.display());

		let metadata = fs::metadata(&guarded).await?;

		if metadata.is_dir() {
			return Err(GatewayError::IsDirectory { path: path.to_string() });
		}

		let file = File::open(&guarded).await?;

		Ok(Box::new(file))
	}

	async fn create_dir(
		&self,
		_cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()> {
		let guarded = self.guard(path)?;

		debug!("[{}] create dir '{}' for {}", self.name, path, claims.display());

		if fs::metadata(&guarded).await.is_ok() {
			return Err(GatewayError::AlreadyExists { target: path.to_string() });
		}

		fs::create_dir_all(&guarded).await?;

		Ok(())
	}

	async fn delete(
		&self,
		_cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()> {
		let guarded = self.guard(path)?;

		debug!("[{}] delete '{}' for {}", self.name, path, claims.display());

		let metadata = fs::metadata(&guarded).await?;

		if metadata.is_dir() {
			fs::remove_dir_all(&guarded).await?;
		} else {
			fs::remove_file(&guarded).await?;
		}

		Ok(())
	}

	async fn initiate_upload(
		&self,
		_cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str,
		total_size: u64,
		_chunk_size: u64
	) -> GatewayResult<u64> {
		let guarded = self.guard(path)?;
		let key = self.upload_key(path)?;

		if let Some(parent) = guarded.parent() {
			fs::create_dir_all(parent).await?;
		}

		let file = OpenOptions::new()
			.append(true)
			.create(true)
			.open(&guarded)
			.await?;

		let uploaded_size = file.metadata().await?.len();

		let entry = UploadEntry::new(
			claims.clone(),
			key.0.clone(),
			key.1.clone(),
			StoreKind::Local,
			UploadState::Local { file, target: guarded }
		);

		self.registry.insert(key, entry)?;

		debug!(
			"[{}] upload '{}' initiated by {}: {} of {} bytes present",
			self.name, path, claims.display(), uploaded_size, total_size
		);

		Ok(uploaded_size)
	}

	async fn write_chunk(
		&self,
		cancel: &CancellationToken,
		_claims: &UserClaims,
		path: &str,
		_chunk_index: u64,
		_block_id: Option<&str>,
		bytes: &[u8]
	) -> GatewayResult<()> {
		let key = self.upload_key(path)?;

		let entry = self
			.registry
			.get(&key)
			.ok_or_else(|| GatewayError::NoUploadSession { path: key.1.clone() })?;

		entry.touch();

		let mut state = entry.state.lock().await;

		ensure_not_cancelled(cancel)?;

		match &mut *state {
			UploadState::Local { file, .. } => {
				file.write_all(bytes).await?;
				Ok(())
			},
			UploadState::Blob { .. } => Err(GatewayError::backend("upload entry has wrong provider state"))
		}
	}

	async fn finalize_upload(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str,
		_ordered_block_ids: &[String],
		expected_size: u64,
		expected_sha256_hex: &str
	) -> GatewayResult<()> {
		let key = self.upload_key(path)?;

		let entry = self
			.registry
			.get(&key)
			.ok_or_else(|| GatewayError::NoUploadSession { path: key.1.clone() })?;

		// Hold the state lock for the whole verification so no chunk can land
		// between the flush and the hash.
		let mut state = entry.state.lock().await;

		let target = match &mut *state {
			UploadState::Local { file, target } => {
				file.flush().await?;
				file.sync_all().await?;
				target.clone()
			},
			UploadState::Blob { .. } => return Err(GatewayError::backend("upload entry has wrong provider state"))
		};

		let actual_size = fs::metadata(&target).await?.len();

		if actual_size != expected_size {
			// Partial state stays on disk; the client may resume or cancel.
			return Err(GatewayError::SizeMismatch { expected: expected_size, actual: actual_size });
		}

		let actual_digest = self.hash_file(cancel, &target).await?;

		if !actual_digest.eq_ignore_ascii_case(expected_sha256_hex) {
			// A corrupt file must not stay visible at the target path.
			drop(state);
			self.registry.remove(&key);

			if let Err(err) = fs::remove_file(&target).await {
				warn!("[{}] failed to unlink corrupt upload '{}': {}", self.name, key.1, err);
			}

			return Err(GatewayError::DigestMismatch {
				expected: expected_sha256_hex.to_string(),
				actual: actual_digest
			});
		}

		drop(state);
		self.registry.remove(&key);

		debug!("[{}] upload '{}' finalized by {} ({} bytes)", self.name, key.1, claims.display(), actual_size);

		Ok(())
	}

	async fn cancel_upload(
		&self,
		_cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()> {
		let key = self.upload_key(path)?;

		// Missing session: already cleaned up, nothing to reclaim.
		let entry = match self.registry.remove(&key) {
			Some(entry) => entry,
			None => return Ok(())
		};

		let state = entry.state.lock().await;

		let target = match &*state {
			UploadState::Local { target, .. } => target.clone(),
			UploadState::Blob { .. } => return Err(GatewayError::backend("upload entry has wrong provider state"))
		};

		drop(state);

		match fs::remove_file(&target).await {
			Ok(()) => {},
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
			Err(err) => return Err(err.into())
		}

		debug!("[{}] upload '{}' cancelled by {}", self.name, key.1, claims.display());

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use nanoid::nanoid;

	fn test_claims() -> UserClaims {
		UserClaims {
			subject: "tester".to_string(),
			email: Some("tester@x.io".to_string()),
			groups: Vec::new()
		}
	}

	fn temp_root() -> PathBuf {
		let root = std::env::temp_dir().join(format!("filegate-local-{}", nanoid!(8)));
		std::fs::create_dir_all(&root).unwrap();
		root
	}

	fn provider(root: &PathBuf) -> (LocalProvider, Arc<UploadRegistry>) {
		let registry = Arc::new(UploadRegistry::new());
		(LocalProvider::new("files".to_string(), root.clone(), registry.clone()), registry)
	}

	fn sha256_hex(bytes: &[u8]) -> String {
		hex::encode(Sha256::digest(bytes))
	}

	async fn read_all(mut reader: ByteReader) -> Vec<u8> {
		let mut out = Vec::new();
		reader.read_to_end(&mut out).await.unwrap();
		out
	}

	#[tokio::test]
	async fn chunked_upload_round_trips() {
		let root = temp_root();
		let (provider, registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		let payload: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
		let digest = sha256_hex(&payload);

		let offset = provider.initiate_upload(&cancel, &claims, "data.bin", payload.len() as u64, 4096).await.unwrap();
		assert_eq!(offset, 0);

		for (index, chunk) in payload.chunks(4096).enumerate() {
			provider.write_chunk(&cancel, &claims, "data.bin", index as u64, None, chunk).await.unwrap();
		}

		provider
			.finalize_upload(&cancel, &claims, "data.bin", &[], payload.len() as u64, &digest)
			.await
			.unwrap();

		assert!(registry.is_empty());

		let reader = provider.open_read(&cancel, &claims, "data.bin").await.unwrap();
		assert_eq!(read_all(reader).await, payload);
	}

	#[tokio::test]
	async fn second_initiate_on_same_path_conflicts() {
		let root = temp_root();
		let (provider, _registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		provider.initiate_upload(&cancel, &claims, "f.bin", 10, 4).await.unwrap();
		let second = provider.initiate_upload(&cancel, &claims, "f.bin", 10, 4).await;

		assert_eq!(second.unwrap_err().error_type(), "AlreadyExists");
	}

	#[tokio::test]
	async fn initiate_after_entry_loss_resumes_from_current_length() {
		let root = temp_root();
		let (provider, registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		provider.initiate_upload(&cancel, &claims, "f.bin", 10, 5).await.unwrap();
		provider.write_chunk(&cancel, &claims, "f.bin", 0, None, b"hello").await.unwrap();

		// Simulates the crash/reap case where only the registry entry is gone.
		registry.remove(&("files".to_string(), "f.bin".to_string()));

		let offset = provider.initiate_upload(&cancel, &claims, "f.bin", 10, 5).await.unwrap();
		assert_eq!(offset, 5);
	}

	#[tokio::test]
	async fn size_mismatch_keeps_partial_state() {
		let root = temp_root();
		let (provider, registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		provider.initiate_upload(&cancel, &claims, "f.bin", 6, 6).await.unwrap();
		provider.write_chunk(&cancel, &claims, "f.bin", 0, None, b"abcde").await.unwrap();

		let result = provider
			.finalize_upload(&cancel, &claims, "f.bin", &[], 6, &sha256_hex(b"abcdef"))
			.await;

		assert_eq!(result.unwrap_err().error_type(), "SizeMismatch");
		assert_eq!(registry.len(), 1);
		assert!(root.join("f.bin").exists());
	}

	#[tokio::test]
	async fn digest_mismatch_leaves_no_artifact() {
		let root = temp_root();
		let (provider, registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		provider.initiate_upload(&cancel, &claims, "f.bin", 5, 5).await.unwrap();
		provider.write_chunk(&cancel, &claims, "f.bin", 0, None, b"abcde").await.unwrap();

		let result = provider
			.finalize_upload(&cancel, &claims, "f.bin", &[], 5, &sha256_hex(b"zzzzz"))
			.await;

		assert_eq!(result.unwrap_err().error_type(), "DigestMismatch");
		assert!(registry.is_empty());
		assert!(!root.join("f.bin").exists());
	}

	#[tokio::test]
	async fn cancel_unlinks_partial_file_and_is_idempotent() {
		let root = temp_root();
		let (provider, registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		provider.initiate_upload(&cancel, &claims, "f.bin", 10, 5).await.unwrap();
		provider.write_chunk(&cancel, &claims, "f.bin", 0, None, b"hello").await.unwrap();

		provider.cancel_upload(&cancel, &claims, "f.bin").await.unwrap();
		assert!(registry.is_empty());
		assert!(!root.join("f.bin").exists());

		// A second cancel finds nothing and still succeeds.
		provider.cancel_upload(&cancel, &claims, "f.bin").await.unwrap();
	}

	#[tokio::test]
	async fn chunk_without_session_is_rejected() {
		let root = temp_root();
		let (provider, _registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		let result = provider.write_chunk(&cancel, &claims, "ghost.bin", 0, None, b"data").await;

		assert_eq!(result.unwrap_err().error_type(), "NoUploadSession");
	}

	#[tokio::test]
	async fn created_directories_show_up_in_listings() {
		let root = temp_root();
		let (provider, _registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		provider.create_dir(&cancel, &claims, "reports").await.unwrap();
		tokio::fs::write(root.join("a.txt"), b"hi").await.unwrap();

		let page = provider.list(&cancel, &claims, "", ListOptions::first_page(10)).await.unwrap();

		assert_eq!(page.total_items, 2);
		assert_eq!(page.items[0].name, "reports");
		assert!(page.items[0].is_directory);
		assert_eq!(page.items[1].name, "a.txt");

		let again = provider.create_dir(&cancel, &claims, "reports").await;
		assert_eq!(again.unwrap_err().error_type(), "AlreadyExists");
	}

	#[tokio::test]
	async fn deleted_items_disappear_from_listings() {
		let root = temp_root();
		let (provider, _registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		tokio::fs::write(root.join("gone.txt"), b"bye").await.unwrap();
		provider.delete(&cancel, &claims, "gone.txt").await.unwrap();

		let page = provider.list(&cancel, &claims, "", ListOptions::first_page(10)).await.unwrap();
		assert!(page.items.iter().all(|item| item.name != "gone.txt"));

		let missing = provider.delete(&cancel, &claims, "gone.txt").await;
		assert_eq!(missing.unwrap_err().error_type(), "NotFound");
	}

	#[tokio::test]
	async fn reading_a_directory_is_an_error() {
		let root = temp_root();
		let (provider, _registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		provider.create_dir(&cancel, &claims, "d").await.unwrap();

		let result = provider.open_read(&cancel, &claims, "d").await;
		assert_eq!(result.map(|_| ()).unwrap_err().error_type(), "IsDirectory");
	}

	#[tokio::test]
	async fn escaping_paths_never_reach_the_filesystem() {
		let root = temp_root();
		let (provider, _registry) = provider(&root);
		let cancel = CancellationToken::new();
		let claims = test_claims();

		let result = provider.list(&cancel, &claims, "../..", ListOptions::first_page(10)).await;
		assert_eq!(result.map(|_| ()).unwrap_err().error_type(), "PathEscape");

		let result = provider.delete(&cancel, &claims, "../../etc/hosts").await;
		assert_eq!(result.unwrap_err().error_type(), "PathEscape");
	}
}
