//! Deterministic request fingerprints used as throttle cache keys.
//!
//! A thumbprint is the unpadded URL-safe base64 SHA-256 digest of a canonical rendering of the
//! request-identifying fields. Fields are kept in sorted maps and every name/value pair is
//! length-prefixed, so neither insertion order nor embedded separators can change or collide
//! the digest.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::ScopeSet};

/// Which set of request fields a thumbprint covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbprintKind {
	/// Client, authority, scopes, account, and grant.
	Base,
	/// Base fields plus every extra request parameter.
	Full,
}
impl ThumbprintKind {
	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			ThumbprintKind::Base => "base",
			ThumbprintKind::Full => "full",
		}
	}
}

/// Canonical, order-insensitive collection of request-identifying fields.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThumbprintFields {
	base: BTreeMap<String, String>,
	extra: BTreeMap<String, String>,
}
impl ThumbprintFields {
	/// Creates an empty field set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds (or replaces) an identifying field.
	pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.base.insert(name.into(), value.into());

		self
	}

	/// Adds the authority, normalized to lowercase without a trailing slash.
	pub fn with_authority(self, authority: &Url) -> Self {
		let normalized = authority.as_str().trim_end_matches('/').to_lowercase();

		self.with_field("authority", normalized)
	}

	/// Adds the normalized scope set.
	pub fn with_scopes(self, scopes: &ScopeSet) -> Self {
		self.with_field("scopes", scopes.normalized())
	}

	/// Adds a parameter that only participates in [`ThumbprintKind::Full`] thumbprints.
	pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra.insert(name.into(), value.into());

		self
	}

	fn canonical(&self, kind: ThumbprintKind) -> String {
		let mut buf = format!("kind={}\n", kind.as_str());

		push_section(&mut buf, "field", &self.base);

		if matches!(kind, ThumbprintKind::Full) {
			push_section(&mut buf, "extra", &self.extra);
		}

		buf
	}
}

/// Stable fingerprint of a request.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thumbprint(String);
impl Thumbprint {
	/// Computes the thumbprint of `fields` for the requested kind.
	pub fn compute(fields: &ThumbprintFields, kind: ThumbprintKind) -> Self {
		let digest = Sha256::digest(fields.canonical(kind).as_bytes());

		Self(URL_SAFE_NO_PAD.encode(digest))
	}

	/// Returns the encoded thumbprint.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for Thumbprint {
	fn as_ref(&self) -> &str {
		&self.0
	}
}
impl Debug for Thumbprint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Thumbprint({})", self.0)
	}
}
impl Display for Thumbprint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Requests that can be fingerprinted for throttling.
pub trait ThumbprintCalculatable
where
	Self: Send + Sync,
{
	/// Returns the identifying fields of the request.
	fn thumbprint_fields(&self) -> ThumbprintFields;

	/// Computes the thumbprint of the given kind.
	fn thumbprint(&self, kind: ThumbprintKind) -> Thumbprint {
		Thumbprint::compute(&self.thumbprint_fields(), kind)
	}

	/// Whether advisory (non-strict) throttle records may be ignored for this request.
	fn bypasses_advisory_throttling(&self) -> bool {
		false
	}
}

fn push_section(buf: &mut String, label: &str, entries: &BTreeMap<String, String>) {
	for (name, value) in entries {
		buf.push_str(&format!("{label}:{}:{name}={}:{value}\n", name.len(), value.len()));
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn authority() -> Url {
		Url::parse("https://login.example.com/Contoso.onmicrosoft.com/")
			.expect("Authority fixture should parse.")
	}

	fn fields() -> ThumbprintFields {
		ThumbprintFields::new()
			.with_field("client_id", "client-1")
			.with_authority(&authority())
			.with_scopes(&ScopeSet::new(["user.read", "openid"]).expect("Scope fixture should be valid."))
			.with_field("account_id", "uid.utid")
			.with_field("grant_type", "refresh_token")
	}

	#[test]
	fn field_order_does_not_matter() {
		let reordered = ThumbprintFields::new()
			.with_field("grant_type", "refresh_token")
			.with_field("account_id", "uid.utid")
			.with_scopes(&ScopeSet::new(["openid", "User.Read"]).expect("Scope fixture should be valid."))
			.with_authority(
				&Url::parse("https://LOGIN.example.com/contoso.onmicrosoft.com")
					.expect("Authority fixture should parse."),
			)
			.with_field("client_id", "client-1");

		assert_eq!(
			Thumbprint::compute(&fields(), ThumbprintKind::Base),
			Thumbprint::compute(&reordered, ThumbprintKind::Base)
		);
	}

	#[test]
	fn any_identifying_field_changes_the_thumbprint() {
		let base = Thumbprint::compute(&fields(), ThumbprintKind::Base);

		for (name, value) in [
			("client_id", "client-2"),
			("account_id", "other.utid"),
			("grant_type", "client_credentials"),
			("scopes", "openid"),
			("authority", "https://login.example.com/common"),
		] {
			let changed = fields().with_field(name, value);

			assert_ne!(
				base,
				Thumbprint::compute(&changed, ThumbprintKind::Base),
				"Changing `{name}` must change the thumbprint."
			);
		}
	}

	#[test]
	fn extras_only_affect_full_thumbprints() {
		let with_claims = fields().with_extra("claims", "{\"access_token\":{}}");

		assert_eq!(
			Thumbprint::compute(&fields(), ThumbprintKind::Base),
			Thumbprint::compute(&with_claims, ThumbprintKind::Base)
		);
		assert_ne!(
			Thumbprint::compute(&fields(), ThumbprintKind::Full),
			Thumbprint::compute(&with_claims, ThumbprintKind::Full)
		);
	}

	#[test]
	fn base_and_full_thumbprints_never_collide() {
		assert_ne!(
			Thumbprint::compute(&fields(), ThumbprintKind::Base),
			Thumbprint::compute(&fields(), ThumbprintKind::Full)
		);
	}

	#[test]
	fn separators_inside_values_cannot_forge_fields() {
		let forged = ThumbprintFields::new().with_field("a", "1\nfield:1:b=1:2");
		let honest = ThumbprintFields::new().with_field("a", "1").with_field("b", "2");

		assert_ne!(
			Thumbprint::compute(&forged, ThumbprintKind::Base),
			Thumbprint::compute(&honest, ThumbprintKind::Base)
		);
	}

	#[test]
	fn thumbprints_are_url_safe() {
		let thumbprint = Thumbprint::compute(&fields(), ThumbprintKind::Base);

		assert_eq!(thumbprint.as_str().len(), 43);
		assert!(thumbprint.as_str().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
	}
}
