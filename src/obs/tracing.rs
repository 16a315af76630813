// self
use crate::{
	_prelude::*,
	auth::AccessGroup,
	obs::{self, ThrottleOp, ThrottleOutcome},
};

/// Future returned by [`ThrottleSpan::instrument`].
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Future returned by [`ThrottleSpan::instrument`].
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// Span covering one throttling operation against one partition.
///
/// The `outcome` field stays empty until [`finish`](Self::finish) records it, so spans of
/// operations abandoned mid-flight are recognizable in the output.
#[derive(Clone, Debug)]
pub struct ThrottleSpan {
	op: ThrottleOp,
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl ThrottleSpan {
	/// Opens a span for `op` on `partition`, tagged with the caller's correlation id.
	pub fn new(op: ThrottleOp, partition: &AccessGroup, correlation_id: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"oauth2_throttle.op",
				op = op.as_str(),
				partition = &**partition,
				correlation_id,
				outcome = tracing::field::Empty,
			);

			Self { op, span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (partition, correlation_id);

			Self { op }
		}
	}

	/// Operation this span covers.
	pub fn op(&self) -> ThrottleOp {
		self.op
	}

	/// Runs `fut` inside the span.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}

	/// Stamps `outcome` on the span and counts it under the span's operation.
	pub fn finish(&self, outcome: ThrottleOutcome) {
		#[cfg(feature = "tracing")]
		self.span.record("outcome", outcome.as_str());

		obs::record_outcome(self.op, outcome);
	}
}

/// Logs a non-fatal problem (fail-open read, dropped write) for the given operation.
///
/// `context` is the correlation id or, for store-internal work, the partition name.
pub fn record_warning(op: ThrottleOp, context: &str, error: &dyn Display, message: &'static str) {
	#[cfg(feature = "tracing")]
	tracing::warn!(op = op.as_str(), context, error = %error, "{message}");
	#[cfg(not(feature = "tracing"))]
	let _ = (op, context, error, message);
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn span_keeps_its_operation_and_finishes_without_a_subscriber() {
		let span =
			ThrottleSpan::new(ThrottleOp::RefreshWatermark, &AccessGroup::default_group(), "corr");

		assert_eq!(span.op(), ThrottleOp::RefreshWatermark);

		span.finish(ThrottleOutcome::Success);
	}

	#[test]
	fn record_warning_accepts_any_display() {
		record_warning(ThrottleOp::Update, "corr", &"disk full", "Failed to cache failure.");
	}

	#[cfg(feature = "tracing")]
	#[tokio::test]
	async fn instrumented_futures_resolve_to_their_output() {
		let span =
			ThrottleSpan::new(ThrottleOp::ShouldThrottle, &AccessGroup::default_group(), "corr");
		let decision = span.instrument(async { ThrottleOutcome::Proceed }).await;

		assert_eq!(decision, ThrottleOutcome::Proceed);
	}
}
