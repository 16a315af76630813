//! Optional observability helpers for throttling decisions.
//!
//! # Feature Flags
//!
//! - Enable `tracing` (default) to emit spans named `oauth2_throttle.op` carrying the `op`,
//!   `partition`, and `correlation_id` fields plus the `outcome` recorded when the operation
//!   finishes, and to log fail-open and write-failure warnings.
//! - Enable `metrics` to increment `oauth2_throttle_decision_total` (labels `op`, `outcome`) for
//!   every finished operation and to sample `oauth2_throttle_cached_window_seconds` (label
//!   `class`) whenever a failure is cached.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the throttling layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThrottleOp {
	/// Admission check before a token request.
	ShouldThrottle,
	/// Cache update after a token request completed.
	Update,
	/// Partition watermark refresh.
	RefreshWatermark,
	/// Controller-driven token acquisition.
	AcquireToken,
	/// Opportunistic eviction performed by a store.
	StorePurge,
}
impl ThrottleOp {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ThrottleOp::ShouldThrottle => "should_throttle",
			ThrottleOp::Update => "update",
			ThrottleOp::RefreshWatermark => "refresh_watermark",
			ThrottleOp::AcquireToken => "acquire_token",
			ThrottleOp::StorePurge => "store_purge",
		}
	}
}
impl Display for ThrottleOp {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ThrottleOutcome {
	/// The request may go to the network.
	Proceed,
	/// The request may go to the network, but the store could not be consulted.
	Degraded,
	/// The request was answered from a cached failure.
	Throttled,
	/// A failure was cached.
	Cached,
	/// Cached failures were cleared after a success.
	Cleared,
	/// The outcome left the cache unchanged.
	Skipped,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl ThrottleOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ThrottleOutcome::Proceed => "proceed",
			ThrottleOutcome::Degraded => "degraded",
			ThrottleOutcome::Throttled => "throttled",
			ThrottleOutcome::Cached => "cached",
			ThrottleOutcome::Cleared => "cleared",
			ThrottleOutcome::Skipped => "skipped",
			ThrottleOutcome::Success => "success",
			ThrottleOutcome::Failure => "failure",
		}
	}
}
impl Display for ThrottleOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
