use crate::claims::UserClaims;
use crate::config::{AccessMode, Config, StoreConfig};
use crate::error::{GatewayError, GatewayResult};

/// Decides whether `claims` may touch `(store, path)` with `mode`.
///
/// Rules in evaluation order: global-admin groups short-circuit every check;
/// the store must exist; a matching permission entry grants access, where a
/// write grant also satisfies a read request. Anything else is a deny.
///
/// The path is accepted for future per-subtree rules but unused today.
pub fn check(config: &Config, claims: &UserClaims, store: &str, _path: &str, mode: AccessMode) -> GatewayResult<()> {
	if is_global_admin(config, claims) {
		return Ok(());
	}

	let store_config = config
		.find_store(store)
		.ok_or_else(|| GatewayError::NotFound { target: format!("storage '{}'", store) })?;

	if permits(store_config, claims, mode) {
		Ok(())
	} else {
		Err(GatewayError::PermissionDenied { store: store.to_string() })
	}
}

pub fn is_global_admin(config: &Config, claims: &UserClaims) -> bool {
	config.global_admin_groups.iter().any(|group| claims.has_group(group))
}

fn permits(store: &StoreConfig, claims: &UserClaims, mode: AccessMode) -> bool {
	store.permissions.iter().any(|entry| {
		claims.has_group(&entry.group)
			&& (entry.mode == mode || (entry.mode == AccessMode::Write && mode == AccessMode::Read))
	})
}

/// The stores `claims` can at least read, in configuration order. Backs the
/// `list_storages` operation.
pub fn accessible_stores<'a>(config: &'a Config, claims: &UserClaims) -> Vec<&'a StoreConfig> {
	config
		.storages
		.iter()
		.filter(|store| check(config, claims, &store.name, "", AccessMode::Read).is_ok())
		.collect()
}
