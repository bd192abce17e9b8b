pub mod local;
pub mod blob;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::claims::UserClaims;
use crate::config::StoreKind;
use crate::error::{GatewayError, GatewayResult};

/// Stream handed to download-style consumers.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Clone, Debug, Serialize)]
pub struct ItemInfo {
	pub name: String,

	/// Store-relative path of the item.
	pub path: String,

	#[serde(rename = "isDirectory")]
	pub is_directory: bool,

	pub size: u64,

	pub modified: DateTime<Utc>
}

/// Listing parameters after request validation. `page` is 1-based.
pub struct ListOptions {
	pub page: usize,
	pub page_size: usize,
	pub name_regex: Option<Regex>,
	pub modified_after: Option<DateTime<Utc>>
}

impl ListOptions {
	pub fn first_page(page_size: usize) -> Self {
		Self { page: 1, page_size, name_regex: None, modified_after: None }
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct ListingPage {
	pub items: Vec<ItemInfo>,

	#[serde(rename = "totalItems")]
	pub total_items: usize,

	pub page: usize,

	#[serde(rename = "pageSize")]
	pub page_size: usize
}

/// Uniform contract over physically different stores. Authorization and the
/// outer path checks happen upstream; claims are passed for logging only.
/// Every operation observes the cancellation token at its suspension points.
#[async_trait]
pub trait StorageProvider: Send + Sync {
	fn kind(&self) -> StoreKind;

	fn store_name(&self) -> &str;

	async fn list(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		dir: &str,
		options: ListOptions
	) -> GatewayResult<ListingPage>;

	async fn open_read(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<ByteReader>;

	async fn create_dir(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()>;

	async fn delete(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()>;

	/// Opens (or re-opens) an upload session and returns the byte offset the
	/// client should resume from.
	async fn initiate_upload(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str,
		total_size: u64,
		chunk_size: u64
	) -> GatewayResult<u64>;

	async fn write_chunk(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str,
		chunk_index: u64,
		block_id: Option<&str>,
		bytes: &[u8]
	) -> GatewayResult<()>;

	async fn finalize_upload(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str,
		ordered_block_ids: &[String],
		expected_size: u64,
		expected_sha256_hex: &str
	) -> GatewayResult<()>;

	/// Tears down an upload session and reclaims partial state. Missing
	/// sessions are a success so clients can cancel blindly.
	async fn cancel_upload(
		&self,
		cancel: &CancellationToken,
		claims: &UserClaims,
		path: &str
	) -> GatewayResult<()>;
}

/// Store name → provider. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
	providers: DashMap<String, Arc<dyn StorageProvider>>
}

impl ProviderRegistry {
	pub fn new() -> Self {
		Self { providers: DashMap::new() }
	}

	pub fn register(&self, provider: Arc<dyn StorageProvider>) {
		self.providers.insert(provider.store_name().to_string(), provider);
	}

	pub fn get(&self, store: &str) -> GatewayResult<Arc<dyn StorageProvider>> {
		self.providers
			.get(store)
			.map(|entry| entry.value().clone())
			.ok_or_else(|| GatewayError::NotFound { target: format!("storage '{}'", store) })
	}
}

/// Shared listing post-processing: filters, the stable sort (directories
/// first, then byte-wise ascending names) and pagination. Both providers go
/// through here so ordering is identical across backends.
pub fn paginate(mut items: Vec<ItemInfo>, options: &ListOptions) -> ListingPage {
	if let Some(regex) = &options.name_regex {
		items.retain(|item| regex.is_match(&item.name));
	}

	if let Some(threshold) = options.modified_after {
		items.retain(|item| item.modified > threshold);
	}

	items.sort_by(|a, b| {
		b.is_directory
			.cmp(&a.is_directory)
			.then_with(|| a.name.as_bytes().cmp(b.name.as_bytes()))
	});

	let total_items = items.len();
	let page = options.page.max(1);
	let page_size = options.page_size.max(1);

	let start = (page - 1).saturating_mul(page_size).min(total_items);
	let end = start.saturating_add(page_size).min(total_items);

	ListingPage {
		items: items[start..end].to_vec(),
		total_items,
		page,
		page_size
	}
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> GatewayResult<()> {
	if cancel.is_cancelled() {
		Err(GatewayError::Canceled)
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn item(name: &str, is_directory: bool, modified_secs: i64) -> ItemInfo {
		ItemInfo {
			name: name.to_string(),
			path: name.to_string(),
			is_directory,
			size: 0,
			modified: Utc.timestamp_opt(modified_secs, 0).unwrap()
		}
	}

	#[test]
	fn directories_sort_first_then_names_ascending() {
		// Mirrors a directory containing [b.txt, A/, c/, a.txt].
		let items = vec![
			item("b.txt", false, 0),
			item("A", true, 0),
			item("c", true, 0),
			item("a.txt", false, 0)
		];

		let page = paginate(items, &ListOptions::first_page(2));

		assert_eq!(page.total_items, 4);
		let names: Vec<&str> = page.items.iter().map(|i| i.name.as_str()).collect();
		assert_eq!(names, vec!["A", "c"]);
	}

	#[test]
	fn second_page_continues_the_order() {
		let items = vec![
			item("b.txt", false, 0),
			item("A", true, 0),
			item("c", true, 0),
			item("a.txt", false, 0)
		];

		let mut options = ListOptions::first_page(2);
		options.page = 2;
		let page = paginate(items, &options);

		let names: Vec<&str> = page.items.iter().map(|i| i.name.as_str()).collect();
		assert_eq!(names, vec!["a.txt", "b.txt"]);
	}

	#[test]
	fn page_beyond_the_last_is_empty_with_correct_total() {
		let items = vec![item("a.txt", false, 0), item("b.txt", false, 0)];

		let mut options = ListOptions::first_page(10);
		options.page = 5;
		let page = paginate(items, &options);

		assert!(page.items.is_empty());
		assert_eq!(page.total_items, 2);
		assert_eq!(page.page, 5);
	}

	#[test]
	fn name_filter_applies_before_pagination() {
		let items = vec![
			item("report-1.pdf", false, 0),
			item("report-2.pdf", false, 0),
			item("notes.txt", false, 0)
		];

		let mut options = ListOptions::first_page(10);
		options.name_regex = Some(Regex::new(r"^report-").unwrap());
		let page = paginate(items, &options);

		assert_eq!(page.total_items, 2);
		assert!(page.items.iter().all(|i| i.name.starts_with("report-")));
	}

	#[test]
	fn modified_after_is_strictly_after() {
		let items = vec![
			item("old.txt", false, 100),
			item("exact.txt", false, 200),
			item("new.txt", false, 300)
		];

		let mut options = ListOptions::first_page(10);
		options.modified_after = Some(Utc.timestamp_opt(200, 0).unwrap());
		let page = paginate(items, &options);

		assert_eq!(page.total_items, 1);
		assert_eq!(page.items[0].name, "new.txt");
	}
}
