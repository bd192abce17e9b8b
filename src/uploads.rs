use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::fs::File;
use tokio::sync::Mutex;

use crate::claims::UserClaims;
use crate::config::StoreKind;
use crate::error::{GatewayError, GatewayResult};

/// Registry key: (store name, normalised store-relative path).
pub type UploadKey = (String, String);

/// One block staged on a blob backend, as recorded in the registry entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedBlock {
	pub id: String,
	pub size: u64
}

/// Provider-specific upload state. The registry entry is the sole owner of
/// the resources described here; whoever removes the entry must also release
/// them through the provider.
#[derive(Debug)]
pub enum UploadState {
	/// Append-open handle on the target file plus its guarded absolute path.
	Local { file: File, target: PathBuf },

	/// Blocks staged so far, in arrival order. Commit order is fixed by the
	/// client at finalize.
	Blob { blocks: Vec<StagedBlock> }
}

#[derive(Debug)]
pub struct UploadEntry {
	pub owner: UserClaims,
	pub store: String,
	pub path: String,
	pub kind: StoreKind,
	last_activity: StdMutex<Instant>,
	pub state: Mutex<UploadState>
}

impl UploadEntry {
	pub fn new(owner: UserClaims, store: String, path: String, kind: StoreKind, state: UploadState) -> Self {
		Self {
			owner,
			store,
			path,
			kind,
			last_activity: StdMutex::new(Instant::now()),
			state: Mutex::new(state)
		}
	}

	pub fn touch(&self) {
		*self.last_activity.lock().unwrap() = Instant::now();
	}

	pub fn idle_for(&self) -> Duration {
		self.last_activity.lock().unwrap().elapsed()
	}
}

/// Process-wide map of in-flight uploads. At most one entry per key; chunk
/// I/O serialises on the per-entry state mutex so independent uploads never
/// wait on each other.
#[derive(Default)]
pub struct UploadRegistry {
	entries: DashMap<UploadKey, Arc<UploadEntry>>
}

impl UploadRegistry {
	pub fn new() -> Self {
		Self { entries: DashMap::new() }
	}

	/// Inserts a fresh entry, failing when one already exists for the key.
	/// This is what makes concurrent initiates on the same target a conflict.
	pub fn insert(&self, key: UploadKey, entry: UploadEntry) -> GatewayResult<Arc<UploadEntry>> {
		match self.entries.entry(key) {
			Entry::Occupied(occupied) => Err(GatewayError::AlreadyExists {
				target: format!("upload for '{}:{}'", occupied.get().store, occupied.get().path)
			}),
			Entry::Vacant(vacant) => {
				let entry = Arc::new(entry);
				vacant.insert(entry.clone());
				Ok(entry)
			}
		}
	}

	pub fn get(&self, key: &UploadKey) -> Option<Arc<UploadEntry>> {
		self.entries.get(key).map(|entry| entry.value().clone())
	}

	pub fn touch(&self, key: &UploadKey) -> bool {
		match self.entries.get(key) {
			Some(entry) => {
				entry.touch();
				true
			},
			None => false
		}
	}

	pub fn remove(&self, key: &UploadKey) -> Option<Arc<UploadEntry>> {
		self.entries.remove(key).map(|(_, entry)| entry)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Keys whose uploads have been idle longer than `ttl`. Used by the
	/// orphan reaper; entries touched within the TTL are never returned.
	pub fn stale_keys(&self, ttl: Duration) -> Vec<UploadKey> {
		self.entries
			.iter()
			.filter(|entry| entry.value().idle_for() > ttl)
			.map(|entry| entry.key().clone())
			.collect()
	}

	/// Keys owned by the departing identity, per the session-cleanup
	/// ownership rule.
	pub fn keys_owned_by(&self, departing: &UserClaims) -> Vec<UploadKey> {
		self.entries
			.iter()
			.filter(|entry| departing.owns(&entry.value().owner))
			.map(|entry| entry.key().clone())
			.collect()
	}

	/// Snapshot for the operator shell.
	pub fn snapshot(&self) -> Vec<Arc<UploadEntry>> {
		self.entries.iter().map(|entry| entry.value().clone()).collect()
	}
}
