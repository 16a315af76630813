//! Validated identifiers used as thumbprint inputs and partition keys.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Partition used when no access group is supplied.
pub const DEFAULT_ACCESS_GROUP: &str = "default";

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (client, account, access group).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (client, account, access group).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (client, account, access group).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { ClientId, "OAuth client identifier of the requesting application.", "Client" }
def_id! { AccountId, "Home account identifier the token is requested for.", "Account" }
def_id! { AccessGroup, "Storage partition (keychain access group equivalent) for throttle records.", "AccessGroup" }

impl AccessGroup {
	/// Returns the partition used when the host does not supply one.
	pub fn default_group() -> Self {
		Self(DEFAULT_ACCESS_GROUP.to_owned())
	}

	/// Resolves an optional access group to a concrete partition.
	pub fn or_default(group: Option<&AccessGroup>) -> Self {
		group.cloned().unwrap_or_else(Self::default_group)
	}
}
impl Default for AccessGroup {
	fn default() -> Self {
		Self::default_group()
	}
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_empty_values() {
		assert!(ClientId::new(" client").is_err(), "Leading whitespace must be rejected.");
		assert!(AccountId::new("").is_err());
		assert!(AccessGroup::new("com.example shared").is_err());

		let client = ClientId::new("b6c69a37-df96-4db0-9088-2ab96e1d8215")
			.expect("Client fixture should be considered valid.");

		assert_eq!(client.as_ref(), "b6c69a37-df96-4db0-9088-2ab96e1d8215");
	}

	#[test]
	fn serde_enforces_validation() {
		let group: AccessGroup = serde_json::from_str("\"com.example.shared\"")
			.expect("Access group should deserialize successfully.");

		assert_eq!(group.as_ref(), "com.example.shared");
		assert!(serde_json::from_str::<AccessGroup>("\"with space\"").is_err());
	}

	#[test]
	fn length_limit_is_enforced() {
		AccountId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");

		assert!(matches!(
			AccountId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)),
			Err(IdentifierError::TooLong { kind: "Account", .. })
		));
	}

	#[test]
	fn missing_access_group_falls_back_to_default_partition() {
		let custom = AccessGroup::new("com.example.shared").expect("Group fixture should be valid.");

		assert_eq!(AccessGroup::or_default(None).as_ref(), DEFAULT_ACCESS_GROUP);
		assert_eq!(AccessGroup::or_default(Some(&custom)), custom);
		assert_eq!(AccessGroup::default(), AccessGroup::default_group());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<AccessGroup, u8> = HashMap::from_iter([(
			AccessGroup::new("group-a").expect("Group used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("group-a"), Some(&7));
	}
}
