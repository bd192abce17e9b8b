use std::path::{Path, PathBuf};

use path_absolutize::Absolutize;

use crate::error::{GatewayError, GatewayResult};

/// Joins a user-supplied relative path onto a store root and proves the
/// result stays inside it. Purely lexical; nothing here touches the
/// filesystem, so the guard also works for paths that don't exist yet.
pub fn resolve(base: &Path, relative: &str) -> GatewayResult<PathBuf> {
	let escape = || GatewayError::PathEscape { path: relative.to_string() };

	// The store root itself may be configured relative to the working directory.
	let base = base.absolutize().map_err(|_| escape())?;

	let trimmed = relative.trim_start_matches(['/', '\\']);

	let resolved = Path::new(trimmed)
		.absolutize_virtually(&base)
		.map_err(|_| escape())?
		.into_owned();

	// absolutize_virtually already confines the result; keep the prefix check
	// as the invariant the rest of the gateway relies on.
	if !resolved.starts_with(&base) {
		return Err(escape());
	}

	Ok(resolved)
}

/// Normalises a store-relative path into a clean `/`-separated key: empty and
/// `.` segments collapse, `..` pops, popping past the root is an escape.
/// Blob stores use this to build object keys; handlers use it to echo a
/// canonical path back to clients.
pub fn normalize_key(relative: &str) -> GatewayResult<String> {
	let mut segments: Vec<&str> = Vec::new();

	for segment in relative.split(['/', '\\']) {
		match segment {
			"" | "." => {},
			".." => {
				if segments.pop().is_none() {
					return Err(GatewayError::PathEscape { path: relative.to_string() });
				}
			},
			other => segments.push(other)
		}
	}

	Ok(segments.join("/"))
}

/// The final path segment, used when echoing created/deleted items.
pub fn basename(path: &str) -> &str {
	path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base() -> PathBuf {
		std::env::temp_dir().join("filegate-guard-base")
	}

	#[test]
	fn plain_relative_path_resolves_under_base() {
		let resolved = resolve(&base(), "docs/readme.txt").unwrap();

		assert!(resolved.starts_with(base().absolutize().unwrap()));
		assert!(resolved.ends_with("docs/readme.txt"));
	}

	#[test]
	fn empty_path_resolves_to_base_itself() {
		let resolved = resolve(&base(), "").unwrap();

		assert_eq!(resolved, base().absolutize().unwrap().into_owned());
	}

	#[test]
	fn leading_slash_is_treated_as_store_relative() {
		let with_slash = resolve(&base(), "/a/b.txt").unwrap();
		let without = resolve(&base(), "a/b.txt").unwrap();

		assert_eq!(with_slash, without);
	}

	#[test]
	fn dot_dot_inside_base_collapses() {
		let resolved = resolve(&base(), "a/../b.txt").unwrap();

		assert!(resolved.ends_with("b.txt"));
		assert!(!resolved.to_string_lossy().contains(".."));
	}

	#[test]
	fn escaping_dot_dot_is_rejected() {
		assert_eq!(resolve(&base(), "../outside").unwrap_err().error_type(), "PathEscape");
		assert_eq!(resolve(&base(), "a/../../../etc/passwd").unwrap_err().error_type(), "PathEscape");
	}

	#[test]
	fn keys_normalise_and_reject_escapes() {
		assert_eq!(normalize_key("a//b/./c").unwrap(), "a/b/c");
		assert_eq!(normalize_key("/a/b/").unwrap(), "a/b");
		assert_eq!(normalize_key("a/../b").unwrap(), "b");
		assert_eq!(normalize_key("..").unwrap_err().error_type(), "PathEscape");
		assert_eq!(normalize_key("a/../../b").unwrap_err().error_type(), "PathEscape");
	}

	#[test]
	fn basename_takes_the_final_segment() {
		assert_eq!(basename("a/b/c.txt"), "c.txt");
		assert_eq!(basename("c.txt"), "c.txt");
		assert_eq!(basename("a/b/"), "b");
	}
}
