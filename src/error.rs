//! Crate-level error types shared across stores, the throttling service, and controllers.

// self
use crate::{_prelude::*, throttle::ErrorClass};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Request parameters are missing or malformed.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// The request was suppressed in favor of a cached failure.
	#[error(transparent)]
	Throttled(#[from] ThrottledError),
	/// Failure reported by the token request provider.
	#[error(transparent)]
	Provider(#[from] crate::provider::ProviderError),
	/// Throttle policy configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
impl Error {
	/// Returns the OAuth error code carried by throttled or provider failures.
	pub fn error_code(&self) -> Option<&str> {
		match self {
			Self::Throttled(e) => Some(&e.error_code),
			Self::Provider(e) => Some(e.code()),
			_ => None,
		}
	}

	/// Returns the error description carried by throttled or provider failures.
	pub fn error_description(&self) -> Option<&str> {
		match self {
			Self::Throttled(e) => e.error_description.as_deref(),
			Self::Provider(e) => e.description.as_deref(),
			_ => None,
		}
	}
}

/// Request parameter validation failures.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ValidationError {
	/// A required request parameter was not supplied.
	#[error("Request parameter `{field}` is required.")]
	MissingField {
		/// Parameter name.
		field: &'static str,
	},
	/// Identifier validation failed.
	#[error(transparent)]
	Identifier(#[from] crate::auth::IdentifierError),
	/// Scope validation failed.
	#[error(transparent)]
	Scope(#[from] crate::auth::ScopeValidationError),
	/// Authority URL cannot be used for token requests.
	#[error("Authority `{authority}` must be an absolute https URL.")]
	InvalidAuthority {
		/// The rejected authority.
		authority: String,
	},
}

/// Synthetic failure returned instead of contacting the network.
///
/// Carries the failure cached by the last real attempt so callers can surface it verbatim.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Request throttled after `{error_code}` until {expires_at}.")]
pub struct ThrottledError {
	/// OAuth error code captured from the cached attempt.
	pub error_code: String,
	/// Error description captured from the cached attempt.
	pub error_description: Option<String>,
	/// HTTP status captured from the cached attempt, when available.
	pub http_status: Option<u16>,
	/// Classification that produced the cached record.
	pub class: ErrorClass,
	/// Whether the cached record blocks unconditionally.
	pub strict: bool,
	/// Instant at which the throttle lifts.
	pub expires_at: OffsetDateTime,
}

/// Throttle policy configuration failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// The configuration document could not be parsed.
	#[error("Throttle policy could not be parsed at `{path}`.")]
	Parse {
		/// JSON path of the offending value.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// A configured duration is zero or negative.
	#[error("Throttle duration `{field}` must be positive.")]
	NonPositiveDuration {
		/// Configuration field name.
		field: &'static str,
	},
	/// A configured duration reaches past the representable date range.
	#[error("Throttle duration `{field}` is out of range.")]
	DurationOutOfRange {
		/// Configuration field name.
		field: &'static str,
	},
}
impl From<serde_path_to_error::Error<serde_json::Error>> for ConfigError {
	fn from(e: serde_path_to_error::Error<serde_json::Error>) -> Self {
		let path = e.path().to_string();

		Self::Parse { path, source: e.into_inner() }
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn store_error_converts_with_source() {
		let store_error = StoreError::Backend { message: "disk unavailable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("disk unavailable"));

		let source = StdError::source(&error)
			.expect("Storage error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn throttled_error_exposes_cached_payload() {
		let error: Error = ThrottledError {
			error_code: "invalid_client".into(),
			error_description: Some("AADSTS7000215: Invalid client secret.".into()),
			http_status: Some(401),
			class: ErrorClass::ClientConfiguration,
			strict: true,
			expires_at: OffsetDateTime::UNIX_EPOCH,
		}
		.into();

		assert_eq!(error.error_code(), Some("invalid_client"));
		assert_eq!(error.error_description(), Some("AADSTS7000215: Invalid client secret."));
	}

	#[test]
	fn missing_field_message_names_the_field() {
		let error = ValidationError::MissingField { field: "authority" };

		assert_eq!(error.to_string(), "Request parameter `authority` is required.");
	}
}
