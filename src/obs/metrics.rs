// self
use crate::{
	_prelude::*,
	obs::{ThrottleOp, ThrottleOutcome},
	throttle::ErrorClass,
};

/// Counts one operation outcome on `oauth2_throttle_decision_total` (when enabled).
pub fn record_outcome(op: ThrottleOp, outcome: ThrottleOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(
		"oauth2_throttle_decision_total",
		"op" => op.as_str(),
		"outcome" => outcome.as_str()
	)
	.increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (op, outcome);
}

/// Samples the validity window of a freshly cached failure, labeled by its class.
pub fn record_cached_window(class: ErrorClass, window: Duration) {
	#[cfg(feature = "metrics")]
	metrics::histogram!("oauth2_throttle_cached_window_seconds", "class" => class.as_str())
		.record(window.as_seconds_f64());
	#[cfg(not(feature = "metrics"))]
	let _ = (class, window);
}
