use http::HeaderMap;
use nanoid::nanoid;
use serde::{Serialize, Deserialize};

use crate::config::AuthConfig;
use crate::constants;

/// The identity attached to a session. Immutable once the session exists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
	pub subject: String,
	pub email: Option<String>,
	pub groups: Vec<String>
}

impl UserClaims {
	pub fn anonymous() -> Self {
		Self {
			subject: format!("{}{}", constants::ANONYMOUS_SUBJECT_PREFIX, nanoid!((constants::ANONYMOUS_ID_LENGTH))),
			email: None,
			groups: Vec::new()
		}
	}

	pub fn is_anonymous(&self) -> bool {
		self.subject.starts_with(constants::ANONYMOUS_SUBJECT_PREFIX)
	}

	pub fn has_group(&self, group: &str) -> bool {
		self.groups.iter().any(|g| g == group)
	}

	/// Display name for logs and the operator shell.
	pub fn display(&self) -> &str {
		match &self.email {
			Some(email) => email.as_str(),
			None => self.subject.as_str()
		}
	}

	/// Ownership rule used when cleaning up uploads left behind by a departing
	/// session: authenticated users match on email, an anonymous session only
	/// matches entries it created itself. Never matches across two different
	/// authenticated users.
	pub fn owns(&self, entry_owner: &UserClaims) -> bool {
		if let (Some(ours), Some(theirs)) = (&self.email, &entry_owner.email) {
			return ours == theirs;
		}

		self.is_anonymous() && self.subject == entry_owner.subject
	}
}

/// Builds claims from reverse-proxy identity headers. The identity provider
/// validated the token upstream; this only parses what it forwarded. Returns
/// None when the subject header is missing.
pub fn claims_from_headers(auth: &AuthConfig, headers: &HeaderMap) -> Option<UserClaims> {
	let subject = header_value(headers, &auth.subject_header)?;

	if subject.trim().is_empty() {
		return None;
	}

	let email = header_value(headers, &auth.email_header).filter(|e| !e.trim().is_empty());

	let groups = header_value(headers, &auth.groups_header)
		.map(|raw| {
			raw.split(',')
				.map(|g| g.trim().to_string())
				.filter(|g| !g.is_empty())
				.collect()
		})
		.unwrap_or_default();

	Some(UserClaims { subject: subject.trim().to_string(), email, groups })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
	headers.get(name).and_then(|v| v.to_str().ok()).map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use http::HeaderValue;

	fn authed(email: &str) -> UserClaims {
		UserClaims {
			subject: format!("sub-{}", email),
			email: Some(email.to_string()),
			groups: Vec::new()
		}
	}

	#[test]
	fn anonymous_claims_have_prefixed_subject_and_no_groups() {
		let claims = UserClaims::anonymous();

		assert!(claims.is_anonymous());
		assert!(claims.email.is_none());
		assert!(claims.groups.is_empty());
	}

	#[test]
	fn ownership_matches_on_email() {
		assert!(authed("a@x.io").owns(&authed("a@x.io")));
		assert!(!authed("a@x.io").owns(&authed("b@x.io")));
	}

	#[test]
	fn anonymous_ownership_matches_own_subject_only() {
		let anon = UserClaims::anonymous();
		let other = UserClaims::anonymous();

		assert!(anon.owns(&anon.clone()));
		assert!(!anon.owns(&other));
		assert!(!anon.owns(&authed("a@x.io")));
	}

	#[test]
	fn claims_parse_from_headers() {
		let auth = AuthConfig::default();
		let mut headers = HeaderMap::new();
		headers.insert("x-auth-subject", HeaderValue::from_static("u1"));
		headers.insert("x-auth-email", HeaderValue::from_static("u1@x.io"));
		headers.insert("x-auth-groups", HeaderValue::from_static("dev, ops,"));

		let claims = claims_from_headers(&auth, &headers).unwrap();

		assert_eq!(claims.subject, "u1");
		assert_eq!(claims.email.as_deref(), Some("u1@x.io"));
		assert_eq!(claims.groups, vec!["dev".to_string(), "ops".to_string()]);
	}

	#[test]
	fn missing_subject_header_yields_none() {
		let auth = AuthConfig::default();
		let headers = HeaderMap::new();

		assert!(claims_from_headers(&auth, &headers).is_none());
	}
}
