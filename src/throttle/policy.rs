//! Error classification and backoff policy.
//!
//! Every [`ProviderError`] maps to exactly one [`ErrorClass`]; each class maps to a
//! [`ThrottleRule`] describing strictness, duration, and which thumbprint the record is keyed
//! on. Codes and durations are configuration and can be loaded from JSON.

// crates.io
use time::PrimitiveDateTime;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	provider::{ProviderError, ProviderErrorKind},
	throttle::ThrottleRecord,
	thumbprint::{ThumbprintCalculatable, ThumbprintKind},
};

const LATEST_EXPIRY: OffsetDateTime = PrimitiveDateTime::MAX.assume_utc();

/// Throttle class assigned to a provider failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
	/// Permanent client misconfiguration (bad credentials, unknown client).
	ClientConfiguration,
	/// The user must interact before the same request can succeed.
	InteractionRequired,
	/// Rate limiting or server overload.
	ServerBusy,
	/// Transport failure; usually unrelated to the request's validity.
	Network,
	/// The exchange was cancelled; never cached.
	Cancelled,
	/// Anything else.
	Unclassified,
}
impl ErrorClass {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorClass::ClientConfiguration => "client_configuration",
			ErrorClass::InteractionRequired => "interaction_required",
			ErrorClass::ServerBusy => "server_busy",
			ErrorClass::Network => "network",
			ErrorClass::Cancelled => "cancelled",
			ErrorClass::Unclassified => "unclassified",
		}
	}
}
impl Display for ErrorClass {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// How a class of failures is throttled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleRule {
	/// Whether the record blocks unconditionally.
	pub strict: bool,
	/// Validity window of the record.
	pub duration: Duration,
	/// Thumbprint the record is keyed on.
	pub kind: ThumbprintKind,
}

/// Configurable classification codes and backoff durations.
///
/// Durations are expressed in whole seconds when (de)serialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlePolicy {
	/// OAuth codes treated as permanent client misconfiguration.
	pub client_configuration_codes: BTreeSet<String>,
	/// OAuth codes that require user interaction.
	pub interaction_required_codes: BTreeSet<String>,
	/// OAuth codes signalling rate limiting or overload.
	pub server_busy_codes: BTreeSet<String>,
	/// Window applied to client configuration failures.
	#[serde(with = "duration_secs")]
	pub client_configuration_duration: Duration,
	/// Window applied to interaction-required failures.
	#[serde(with = "duration_secs")]
	pub interaction_required_duration: Duration,
	/// Window applied to server-busy failures without a `Retry-After` hint.
	#[serde(with = "duration_secs")]
	pub server_busy_duration: Duration,
	/// Window applied to network failures.
	#[serde(with = "duration_secs")]
	pub network_duration: Duration,
	/// Window applied to unclassified failures.
	#[serde(with = "duration_secs")]
	pub unclassified_duration: Duration,
}
impl ThrottlePolicy {
	/// Parses and validates a JSON policy document; missing fields keep their defaults.
	pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_slice(bytes);
		let policy: Self = serde_path_to_error::deserialize(de)?;

		policy.validate()?;

		Ok(policy)
	}

	/// Ensures every configured window is positive and can be added to the current instant.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let now = OffsetDateTime::now_utc();

		for (field, duration) in [
			("client_configuration_duration", self.client_configuration_duration),
			("interaction_required_duration", self.interaction_required_duration),
			("server_busy_duration", self.server_busy_duration),
			("network_duration", self.network_duration),
			("unclassified_duration", self.unclassified_duration),
		] {
			if !duration.is_positive() {
				return Err(ConfigError::NonPositiveDuration { field });
			}
			if now.checked_add(duration).is_none() {
				return Err(ConfigError::DurationOutOfRange { field });
			}
		}

		Ok(())
	}

	/// Assigns the failure to exactly one class.
	pub fn classify(&self, error: &ProviderError) -> ErrorClass {
		match error.kind {
			ProviderErrorKind::Cancelled => return ErrorClass::Cancelled,
			ProviderErrorKind::Network => return ErrorClass::Network,
			ProviderErrorKind::Server => {},
		}

		let code = error.code.as_str();

		if self.client_configuration_codes.contains(code) {
			ErrorClass::ClientConfiguration
		} else if self.interaction_required_codes.contains(code) {
			ErrorClass::InteractionRequired
		} else if self.server_busy_codes.contains(code)
			|| error.http_status.is_some_and(|status| status == 429 || (500..600).contains(&status))
		{
			ErrorClass::ServerBusy
		} else {
			ErrorClass::Unclassified
		}
	}

	/// Returns the rule for a classified failure, or `None` when it must not be cached.
	pub fn rule(&self, class: ErrorClass, error: &ProviderError) -> Option<ThrottleRule> {
		let (strict, duration, kind) = match class {
			ErrorClass::ClientConfiguration =>
				(true, self.client_configuration_duration, ThumbprintKind::Base),
			ErrorClass::InteractionRequired =>
				(true, self.interaction_required_duration, ThumbprintKind::Full),
			ErrorClass::ServerBusy =>
				(true, error.retry_after.unwrap_or(self.server_busy_duration), ThumbprintKind::Base),
			ErrorClass::Network => (false, self.network_duration, ThumbprintKind::Base),
			ErrorClass::Unclassified => (false, self.unclassified_duration, ThumbprintKind::Base),
			ErrorClass::Cancelled => return None,
		};

		duration.is_positive().then_some(ThrottleRule { strict, duration, kind })
	}

	/// Builds the record caching `error` for `request`, if the failure is cacheable.
	///
	/// Windows reaching past the last representable instant are cut off there.
	pub fn record_for(
		&self,
		error: &ProviderError,
		request: &dyn ThumbprintCalculatable,
		now: OffsetDateTime,
	) -> Option<ThrottleRecord> {
		let class = self.classify(error);
		let rule = self.rule(class, error)?;
		let expires_at = now.checked_add(rule.duration).unwrap_or(LATEST_EXPIRY);

		ThrottleRecord::builder(request.thumbprint(rule.kind), rule.kind)
			.error(error)
			.class(class)
			.strict(rule.strict)
			.created_at(now)
			.expires_at(expires_at)
			.build()
			.ok()
	}
}
impl Default for ThrottlePolicy {
	fn default() -> Self {
		fn codes(values: &[&str]) -> BTreeSet<String> {
			values.iter().map(|code| (*code).to_owned()).collect()
		}

		Self {
			client_configuration_codes: codes(&[
				"invalid_client",
				"unauthorized_client",
				"unsupported_grant_type",
				"invalid_scope",
			]),
			interaction_required_codes: codes(&[
				"invalid_grant",
				"interaction_required",
				"login_required",
				"consent_required",
			]),
			server_busy_codes: codes(&["temporarily_unavailable", "server_error", "slow_down"]),
			client_configuration_duration: Duration::minutes(5),
			interaction_required_duration: Duration::seconds(120),
			server_busy_duration: Duration::seconds(60),
			network_duration: Duration::seconds(15),
			unclassified_duration: Duration::seconds(30),
		}
	}
}

mod duration_secs {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(duration.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}
