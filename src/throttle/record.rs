//! Immutable throttle records and their builder.

// self
use crate::{
	_prelude::*,
	error::ThrottledError,
	provider::ProviderError,
	throttle::ErrorClass,
	thumbprint::{Thumbprint, ThumbprintKind},
};

/// Errors produced by [`ThrottleRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ThrottleRecordBuilderError {
	/// No failure was attached to the record.
	#[error("The cached failure is required.")]
	MissingError,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// The validity window is empty or negative.
	#[error("Record must expire after it was created.")]
	EmptyWindow,
	/// The relative expiry lands beyond the representable date range.
	#[error("Record expiry is out of range.")]
	WindowOverflow,
}

/// Cached outcome of a failed token request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleRecord {
	/// Cache key.
	pub thumbprint: Thumbprint,
	/// Which request fields the key covers.
	pub kind: ThumbprintKind,
	/// Classification that produced the record.
	pub class: ErrorClass,
	/// OAuth error code captured from the failed attempt.
	pub error_code: String,
	/// Error description captured from the failed attempt.
	pub error_description: Option<String>,
	/// HTTP status captured from the failed attempt.
	pub http_status: Option<u16>,
	/// Strict records throttle unconditionally; others are advisory.
	pub strict: bool,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Instant from which the record is void.
	pub expires_at: OffsetDateTime,
}
impl ThrottleRecord {
	/// Returns a builder for a record keyed by `thumbprint`.
	pub fn builder(thumbprint: Thumbprint, kind: ThumbprintKind) -> ThrottleRecordBuilder {
		ThrottleRecordBuilder::new(thumbprint, kind)
	}

	/// Returns `true` once the record no longer applies at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at <= instant
	}

	/// Returns `true` if the record predates (or shares) the partition's refresh watermark.
	pub fn is_stale(&self, last_refresh: Option<OffsetDateTime>) -> bool {
		last_refresh.is_some_and(|watermark| self.created_at <= watermark)
	}

	/// Returns `true` if the record honors the validity-window invariant.
	pub fn has_valid_window(&self) -> bool {
		self.expires_at > self.created_at
	}

	/// Builds the synthetic error surfaced instead of contacting the network.
	pub fn to_throttled_error(&self) -> ThrottledError {
		ThrottledError {
			error_code: self.error_code.clone(),
			error_description: self.error_description.clone(),
			http_status: self.http_status,
			class: self.class,
			strict: self.strict,
			expires_at: self.expires_at,
		}
	}
}

/// Builder for [`ThrottleRecord`].
#[derive(Clone, Debug)]
pub struct ThrottleRecordBuilder {
	thumbprint: Thumbprint,
	kind: ThumbprintKind,
	class: ErrorClass,
	error: Option<(String, Option<String>, Option<u16>)>,
	strict: bool,
	created_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl ThrottleRecordBuilder {
	fn new(thumbprint: Thumbprint, kind: ThumbprintKind) -> Self {
		Self {
			thumbprint,
			kind,
			class: ErrorClass::Unclassified,
			error: None,
			strict: false,
			created_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Captures the code, description, and status of a provider failure.
	pub fn error(mut self, error: &ProviderError) -> Self {
		self.error = Some((error.code.clone(), error.description.clone(), error.http_status));

		self
	}

	/// Captures a bare error code.
	pub fn error_code(mut self, code: impl Into<String>) -> Self {
		self.error = Some((code.into(), None, None));

		self
	}

	/// Sets the classification.
	pub fn class(mut self, class: ErrorClass) -> Self {
		self.class = class;

		self
	}

	/// Marks the record strict (or advisory).
	pub fn strict(mut self, strict: bool) -> Self {
		self.strict = strict;

		self
	}

	/// Sets the creation instant.
	pub fn created_at(mut self, instant: OffsetDateTime) -> Self {
		self.created_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the validity window relative to the creation instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces a [`ThrottleRecord`].
	pub fn build(self) -> Result<ThrottleRecord, ThrottleRecordBuilderError> {
		let (error_code, error_description, http_status) =
			self.error.ok_or(ThrottleRecordBuilderError::MissingError)?;
		let created_at = self.created_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) =>
				created_at.checked_add(delta).ok_or(ThrottleRecordBuilderError::WindowOverflow)?,
			(None, None) => return Err(ThrottleRecordBuilderError::MissingExpiry),
		};

		if expires_at <= created_at {
			return Err(ThrottleRecordBuilderError::EmptyWindow);
		}

		Ok(ThrottleRecord {
			thumbprint: self.thumbprint,
			kind: self.kind,
			class: self.class,
			error_code,
			error_description,
			http_status,
			strict: self.strict,
			created_at,
			expires_at,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::thumbprint::ThumbprintFields;

	fn thumbprint() -> Thumbprint {
		Thumbprint::compute(&ThumbprintFields::new().with_field("client_id", "c"), ThumbprintKind::Base)
	}

	#[test]
	fn builder_handles_relative_expiry_and_error_payload() {
		let error = ProviderError::server("invalid_client")
			.with_description("Bad secret")
			.with_http_status(401);
		let record = ThrottleRecord::builder(thumbprint(), ThumbprintKind::Base)
			.error(&error)
			.class(ErrorClass::ClientConfiguration)
			.strict(true)
			.created_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::minutes(5))
			.build()
			.expect("Record builder should succeed for a relative expiry.");

		assert_eq!(record.expires_at, macros::datetime!(2025-01-01 00:05 UTC));
		assert_eq!(record.error_code, "invalid_client");
		assert_eq!(record.http_status, Some(401));

		let throttled = record.to_throttled_error();

		assert_eq!(throttled.error_description.as_deref(), Some("Bad secret"));
		assert!(throttled.strict);
	}

	#[test]
	fn builder_rejects_empty_windows_and_missing_parts() {
		let start = macros::datetime!(2025-01-01 00:00 UTC);

		assert_eq!(
			ThrottleRecord::builder(thumbprint(), ThumbprintKind::Base)
				.error_code("server_error")
				.created_at(start)
				.expires_in(Duration::ZERO)
				.build(),
			Err(ThrottleRecordBuilderError::EmptyWindow)
		);
		assert_eq!(
			ThrottleRecord::builder(thumbprint(), ThumbprintKind::Base)
				.created_at(start)
				.expires_in(Duration::MINUTE)
				.build(),
			Err(ThrottleRecordBuilderError::MissingError)
		);
		assert_eq!(
			ThrottleRecord::builder(thumbprint(), ThumbprintKind::Base).error_code("x").build(),
			Err(ThrottleRecordBuilderError::MissingExpiry)
		);
	}

	#[test]
	fn builder_reports_out_of_range_expiry() {
		assert_eq!(
			ThrottleRecord::builder(thumbprint(), ThumbprintKind::Base)
				.error_code("slow_down")
				.created_at(macros::datetime!(2025-01-01 00:00 UTC))
				.expires_in(Duration::seconds(1_000_000_000_000))
				.build(),
			Err(ThrottleRecordBuilderError::WindowOverflow)
		);
	}

	#[test]
	fn expiry_and_staleness_boundaries() {
		let record = ThrottleRecord::builder(thumbprint(), ThumbprintKind::Base)
			.error_code("slow_down")
			.created_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 00:01 UTC))
			.build()
			.expect("Record builder should succeed.");

		assert!(!record.is_expired_at(macros::datetime!(2025-01-01 00:00:59 UTC)));
		assert!(record.is_expired_at(macros::datetime!(2025-01-01 00:01 UTC)));
		assert!(!record.is_stale(None));
		assert!(!record.is_stale(Some(macros::datetime!(2024-12-31 23:59 UTC))));
		assert!(record.is_stale(Some(macros::datetime!(2025-01-01 00:00 UTC))));
	}
}
