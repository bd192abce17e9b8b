use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::claims::UserClaims;
use crate::config::StoreKind;
use crate::constants;
use crate::error::{GatewayError, GatewayResult};
use crate::pathguard;
use crate::uploads::{StagedBlock, UploadEntry, UploadKey, UploadRegistry, UploadState};

use super::{ensure_not_cancelled, paginate, ByteReader, ItemInfo, ListOptions, ListingPage, StorageProvider};

lazy_static! {
	// Block ids arrive as opaque fixed-width base64 strings derived from the
	// chunk index; anything else is rejected before it reaches the backend.
	static ref BLOCK_ID_REGEX: Regex = Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap();
}

#[derive(Clone, Debug)]
pub struct RemoteObject {
	pub key: String,
	pub size: u64,
	pub modified: DateTime<Utc>
}

/// The narrow surface the gateway needs from a block-commit blob backend.
/// The vendor SDK adapter implements this out of tree; `MemoryBlockStore`
/// below covers development and tests.
#[async_trait]
pub trait BlockStore: Send + Sync {
	/// Stages one block under an opaque id. Staged blocks are invisible to
	/// readers until committed and expire on the backend's own schedule.
	async fn put_block(&self, container: &str, key: &str, block_id: &str, bytes: &[u8]) -> GatewayResult<()>;

	/// Atomically commits the ordered block list as the blob's content. When
	/// a digest is supplied the backend verifies it and reports a checksum
	/// mismatch without committing.
	async fn commit_block_list(
		&self,
		container: &str,
		key: &str,
		ordered_block_ids: &[String],
		expected_sha256_hex: Option<&str>
	) -> GatewayResult<()>;

	/// Drops staged, uncommitted blocks. Best-effort.
	async fn discard_staged(&self, container: &str, key: &str) -> GatewayResult<()>;

	async fn delete_blob(&self, container: &str, key: &str) -> GatewayResult<()>;

	async fn fetch_blob(&self, container: &str, key: &str) -> GatewayResult<Vec<u8>>;

	/// All committed objects whose key starts with `prefix`.
	async fn list_keys(&self, container: &str, prefix: &str) -> GatewayResult<Vec<RemoteObject>>;
}

// ----------------------------------------------
// In-memory block store
// ----------------------------------------------

struct CommittedBlob {
	bytes: Vec<u8>,
	modified: DateTime<Utc>
}

/// Block store kept entirely in memory. Backs `kind = blob` stores in
/// development and the test suite; production deployments swap in a vendor
/// adapter implementing [`BlockStore`].
#[derive(Default)]
pub struct MemoryBlockStore {
	committed: DashMap<(String, String), CommittedBlob>,
	staged: DashMap<(String, String), HashMap<String, Vec<u8>>>
}

impl MemoryBlockStore {
	pub fn new() -> Self {
		Self { committed: DashMap::new(), staged: DashMap::new() }
	}

	fn slot(container: &str, key: &str) -> (String, String) {
		(container.to_string(), key.to_string())
	}
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
	async fn put_block(&self, container: &str, key: &str, block_id: &str, bytes: &[u8]) -> GatewayResult<()> {
		self.staged
			.entry(Self::slot(container, key))
			.or_default()
			.insert(block_id.to_string(), bytes.to_vec());

		Ok(())
	}

	async fn commit_block_list(
		&self,
		container: &str,
		key: &str,
		ordered_block_ids: &[String],
		expected_sha256_hex: Option<&str>
	) -> GatewayResult<()> {
		let slot = Self::slot(container, key);

		let mut content = Vec::new();

		{
			let staged = self
				.staged
				.get(&slot)
				.ok_or_else(|| GatewayError::backend(format!("no staged blocks for '{}'", key)))?;

			for id in ordered_block_ids {
				let block = staged
					.get(id)
					.ok_or_else(|| GatewayError::backend(format!("block '{}' was never staged for '{}'", id, key)))?;

				content.extend_from_slice(block);
			}
		}

		if let Some(expected) = expected_sha256_hex {
			let actual = hex::encode(Sha256::digest(&content));

			if !actual.eq_ignore_ascii_case(expected) {
				// Checksum mismatch: nothing is committed, staging survives.
				return Err(GatewayError::DigestMismatch {
					expected: expected.to_string(),
					actual
				});
			}
		}

		self.committed.insert(slot.clone(), CommittedBlob { bytes: content, modified: Utc::now() });
		self.staged.remove(&slot);

		Ok(())
	}

	async fn discard_staged(&self, container: &str, key: &str) -> GatewayResult<()> {
		self.staged.remove(&Self::slot(container, key));
		Ok(())
	}

	async fn delete_blob(&self, container: &str, key: &str) -> GatewayResult<()> {
		self.committed
			.remove(&Self::slot(container, key))
			.map(|_| ())
			.ok_or_else(|| GatewayError::NotFound { target: key.to_string() })
	}

	async fn fetch_blob(&self, container: &str, key: &str) -> GatewayResult<Vec<u8>> {
		self.committed
			.get(&Self::slot(container, key))
			.map(|blob| blob.bytes.clone())
			.ok_or_else(|| GatewayError::NotFound { target: key.to_string() })
	}

	async fn list_keys(&self, container: &str, prefix: &str) -> GatewayResult<Vec<RemoteObject>> {
		Ok(self
			.committed
			.iter()
			.filter(|entry| entry.key().0 == container && entry.key().1.starts_with(prefix))
			.map(|entry| RemoteObject {
				key: entry.key().1.clone(),
				size: entry.value().bytes.len() as u64,
				modified: entry.value().modified
			})
			.collect())
	}
}

// ----------------------------------------------
// Blob provider
// ----------------------------------------------

/// Block-blob backed store. Objects live in a flat `/`-delimited key space;
/// directories are virtual, derived from key prefixes.
pub struct BlobProvider {
	name: String,
	container: String,
	client: Arc<dyn BlockStore>,
	registry: Arc<UploadRegistry>
}

impl BlobProvider {
	pub fn new(name: String, container: String, client: Arc<dyn BlockStore>, registry: Arc<UploadRegistry>) -> Self {
		Self { name, container, client, registry }
	}

	fn upload_key(&self, relative: &str) -> GatewayResult<UploadKey> {
		Ok((self.name.clone(), pathguard::normalize_key(relative)?))
	}

	fn validate_block_id(block_id: Option<&str>) -> GatewayResult<&str> {
		let id = block_id.ok_or_else(|| GatewayError::backend("blob uploads require a block id per chunk"))?;

		if id.is_empty() || id.len() > constants::MAX_BLOCK_ID_LENGTH || !BLOCK_ID_REGEX.is_match(id) {
			return Err(GatewayError::backend(format!("malformed block id '{}'", id)));
		}

		Ok(id)
	}

	/// Direct children of `dir`: exact-key objects become files, deeper keys
	/// collapse into virtual directories.
	fn children_of(dir_key: &str, objects: Vec<RemoteObject>) -> Vec<ItemInfo> {
		let prefix = if dir_key.is_empty() { String::new() } else { format!("{}/", dir_key) };

		let mut files = Vec::new();
		let mut dirs: HashMap<String, DateTime<Utc>> = HashMap::new();

		for object in objects {
			let remainder = match object.key.strip_prefix(&prefix) {
				Some(rest) if !rest.is_empty() => rest,
				_ => continue
			};

			match remainder.split_once('/') {
				Some((dir_name, _)) => {
					let newest = dirs.entry(dir_name.to_string()).or_insert(object.modified);

					if object.modified > *newest {
						*newest = object.modified;
					}
				},
				None => files.push(ItemInfo {
					name: remainder.to_string(),
					path: object.key.clone(),
					is_directory: false,
					size: object.size,
					modified: object.modified
				})
			}
		}

		let mut items: Vec<ItemInfo> = dirs
			.into_iter()
			.map(|(name, modified)| ItemInfo {
				path: format!("{}{}", prefix, name),
				name,
				is_directory: true,
				size: 0,
				modified
			})
			.collect();

		items.extend(files);
		items
	}
}

#[async_trait]
impl StorageProvider for BlobProvider {
	fn kind(&self) -> StoreKind {
		StoreKind::Blob
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
		let dir_key = pathguard::normalize_key(dir)?;

		debug!("[{}] list '{}' for {}", self.name, dir_key, claims.display());

		ensure_not_cancelled(cancel)?;

		let prefix = if dir_key.is_empty() { String::new() } else { format!("{}/", dir_key) };
		let objects = self.client.list_keys(&self.container, &prefix).await?;

		if !dir_key.is_empty() && objects.is_empty() {
			// Distinguish an empty virtual directory from a missing one: a
			// flat namespace has no marker objects, so no children means the
			// directory does not exist.
			if self.client.fetch_blob(&self.container, &dir_key).await.is_ok() {
				return Err(GatewayError::NotDirectory { path: dir_key });
			}

			return Err(GatewayError::NotFound { target: dir_key });
		}

		Ok(paginate(Self::children_of(&dir_key, objects), &options))
	}

	async fn open_read(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<ByteReader> {
		let key = pathguard::normalize_key(path)?;

		debug!("[{}] open '{}' for {}", self.name, key, claims.display());

		ensure_not_cancelled(cancel)?;

		match self.client.fetch_blob(&self.container, &key).await {
			Ok(bytes) => Ok(Box::new(Cursor::new(bytes))),
			Err(GatewayError::NotFound { .. }) => {
				let children = self.client.list_keys(&self.container, &format!("{}/", key)).await?;

				if children.is_empty() {
					Err(GatewayError::NotFound { target: key })
				} else {
					Err(GatewayError::IsDirectory { path: key })
				}
			},
			Err(err) => Err(err)
		}
	}

	async fn create_dir(
		&self,
		_cancel: &CancellationToken,
		_claims: &UserClaims,
		_path: &str
	) -> GatewayResult<()> {
		// Directories are implied by key prefixes; there is nothing to create.
		Err(GatewayError::NotSupported { operation: "create_dir on a blob store".to_string() })
	}

	async fn delete(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()> {
		let key = pathguard::normalize_key(path)?;

		debug!("[{}] delete '{}' for {}", self.name, key, claims.display());

		ensure_not_cancelled(cancel)?;

		match self.client.delete_blob(&self.container, &key).await {
			Ok(()) => Ok(()),
			Err(GatewayError::NotFound { .. }) => {
				let children = self.client.list_keys(&self.container, &format!("{}/", key)).await?;

				if children.is_empty() {
					Err(GatewayError::NotFound { target: key })
				} else {
					Err(GatewayError::NotSupported { operation: "delete of a virtual directory".to_string() })
				}
			},
			Err(err) => Err(err)
		}
	}

	async fn initiate_upload(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str,
		total_size: u64,
		_chunk_size: u64
	) -> GatewayResult<u64> {
		let key = self.upload_key(path)?;

		ensure_not_cancelled(cancel)?;

		let entry = UploadEntry::new(
			claims.clone(),
			key.0.clone(),
			key.1.clone(),
			StoreKind::Blob,
			UploadState::Blob { blocks: Vec::new() }
		);

		self.registry.insert(key, entry)?;

		debug!(
			"[{}] blob upload '{}' initiated by {} ({} bytes expected)",
			self.name, path, claims.display(), total_size
		);

		// No durable staging state survives a restart, so resumption always
		// starts over from zero.
		Ok(0)
	}

	async fn write_chunk(
		&self,
		cancel: &CancellationToken,
		_claims: &UserClaims,
		path: &str,
		_chunk_index: u64,
		block_id: Option<&str>,
		bytes: &[u8]
	) -> GatewayResult<()> {
		let key = self.upload_key(path)?;
		let block_id = Self::validate_block_id(block_id)?;

		let entry = self
			.registry
			.get(&key)
			.ok_or_else(|| GatewayError::NoUploadSession { path: key.1.clone() })?;

		entry.touch();

		let mut state = entry.state.lock().await;

		ensure_not_cancelled(cancel)?;

		let blocks = match &mut *state {
			UploadState::Blob { blocks } => blocks,
			UploadState::Local { .. } => return Err(GatewayError::backend("upload entry has wrong provider state"))
		};

		self.client.put_block(&self.container, &key.1, block_id, bytes).await?;

		// Re-staging an id (client retry) replaces the block, it never
		// duplicates the list entry.
		match blocks.iter_mut().find(|block| block.id == block_id) {
			Some(block) => block.size = bytes.len() as u64,
			None => blocks.push(StagedBlock { id: block_id.to_string(), size: bytes.len() as u64 })
		}

		Ok(())
	}

	async fn finalize_upload(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str,
		ordered_block_ids: &[String],
		expected_size: u64,
		expected_sha256_hex: &str
	) -> GatewayResult<()> {
		let key = self.upload_key(path)?;

		let entry = self
			.registry
			.get(&key)
			.ok_or_else(|| GatewayError::NoUploadSession { path: key.1.clone() })?;

		let state = entry.state.lock().await;

		ensure_not_cancelled(cancel)?;

		let blocks = match &*state {
			UploadState::Blob { blocks } => blocks,
			UploadState::Local { .. } => return Err(GatewayError::backend("upload entry has wrong provider state"))
		};

		let mut committed_size: u64 = 0;

		for id in ordered_block_ids {
			let staged = blocks
				.iter()
				.find(|block| &block.id == id)
				.ok_or_else(|| GatewayError::backend(format!("block '{}' was never staged for '{}'", id, key.1)))?;

			committed_size += staged.size;
		}

		if committed_size != expected_size {
			// Staged blocks stay put; the client resolves this with cancel.
			return Err(GatewayError::SizeMismatch { expected: expected_size, actual: committed_size });
		}

		self.client
			.commit_block_list(&self.container, &key.1, ordered_block_ids, Some(expected_sha256_hex))
			.await?;

		drop(state);
		self.registry.remove(&key);

		debug!("[{}] blob upload '{}' finalized by {} ({} bytes)", self.name, key.1, claims.display(), committed_size);

		Ok(())
	}

	async fn cancel_upload(
		&self,
		_cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()> {
		let key = self.upload_key(path)?;

		if self.registry.remove(&key).is_none() {
			return Ok(());
		}

		// Uncommitted blocks also expire on the backend's own schedule, so a
		// failed discard is not an error.
		if let Err(err) = self.client.discard_staged(&self.container, &key.1).await {
			warn!("[{}] discarding staged blocks for '{}' failed: {}", self.name, key.1, err);
		}

		debug!("[{}] blob upload '{}' cancelled by {}", self.name, key.1, claims.display());

		Ok(())
	}
}
