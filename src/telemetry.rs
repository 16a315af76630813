//! Start/stop telemetry events bracketing each token acquisition.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{_prelude::*, provider::ProviderErrorKind};

const EVENT_ID_LEN: usize = 16;

/// Final classification of a bracketed token acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryOutcome {
	/// The provider returned a token.
	Success,
	/// The request was answered from a cached failure.
	Throttled,
	/// The attempt failed.
	Failure,
	/// The attempt was cancelled by the provider or by dropping the future.
	Cancelled,
}
impl TelemetryOutcome {
	/// Derives the outcome from the error an attempt ended with.
	pub fn from_error(error: Option<&Error>) -> Self {
		match error {
			None => Self::Success,
			Some(Error::Throttled(_)) => Self::Throttled,
			Some(Error::Provider(e)) if e.kind == ProviderErrorKind::Cancelled => Self::Cancelled,
			Some(_) => Self::Failure,
		}
	}

	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			TelemetryOutcome::Success => "success",
			TelemetryOutcome::Throttled => "throttled",
			TelemetryOutcome::Failure => "failure",
			TelemetryOutcome::Cancelled => "cancelled",
		}
	}
}
impl Display for TelemetryOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// API event describing one token acquisition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryApiEvent {
	/// Unique event identifier.
	pub event_id: String,
	/// Correlation identifier of the request.
	pub correlation_id: String,
	/// Partition the throttling check ran against.
	pub access_group: String,
	/// Instant the event was started.
	pub started_at: OffsetDateTime,
	/// Instant the event was stopped; `None` while running.
	pub stopped_at: Option<OffsetDateTime>,
	/// Outcome recorded at stop.
	pub outcome: Option<TelemetryOutcome>,
	/// OAuth error code of a failed or throttled attempt.
	pub error_code: Option<String>,
	/// Error description of a failed or throttled attempt.
	pub error_description: Option<String>,
	/// Non-fatal storage problem observed during the attempt.
	pub storage_error: Option<String>,
}
impl TelemetryApiEvent {
	/// Starts a new event at `started_at`.
	pub fn start(
		correlation_id: impl Into<String>,
		access_group: impl Into<String>,
		started_at: OffsetDateTime,
	) -> Self {
		let event_id =
			rand::rng().sample_iter(Alphanumeric).take(EVENT_ID_LEN).map(char::from).collect();

		Self {
			event_id,
			correlation_id: correlation_id.into(),
			access_group: access_group.into(),
			started_at,
			stopped_at: None,
			outcome: None,
			error_code: None,
			error_description: None,
			storage_error: None,
		}
	}

	/// Returns `true` once the event has been stopped.
	pub fn is_stopped(&self) -> bool {
		self.stopped_at.is_some()
	}

	/// Elapsed time between start and stop.
	pub fn duration(&self) -> Option<Duration> {
		self.stopped_at.map(|stopped| stopped - self.started_at)
	}

	/// Closes the event with the attempt's final error (if any).
	///
	/// Returns `false` and leaves the event untouched if it was already stopped.
	pub fn stop(&mut self, error: Option<&Error>, stopped_at: OffsetDateTime) -> bool {
		if self.is_stopped() {
			return false;
		}

		self.stopped_at = Some(stopped_at);
		self.outcome = Some(TelemetryOutcome::from_error(error));
		self.error_code = error.and_then(Error::error_code).map(ToOwned::to_owned);
		self.error_description = error.and_then(Error::error_description).map(ToOwned::to_owned);

		true
	}
}

/// Destination for stopped telemetry events.
pub trait TelemetrySink
where
	Self: Send + Sync,
{
	/// Receives a stopped event. Called exactly once per event.
	fn dispatch(&self, event: TelemetryApiEvent);
}

/// Sink that keeps dispatched events in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryTelemetrySink(Arc<Mutex<Vec<TelemetryApiEvent>>>);
impl MemoryTelemetrySink {
	/// Creates an empty sink.
	pub fn new() -> Self {
		Self::default()
	}

	/// Snapshot of the dispatched events, oldest first.
	pub fn events(&self) -> Vec<TelemetryApiEvent> {
		self.0.lock().clone()
	}
}
impl TelemetrySink for MemoryTelemetrySink {
	fn dispatch(&self, event: TelemetryApiEvent) {
		self.0.lock().push(event);
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::provider::ProviderError;

	#[test]
	fn stop_records_outcome_once() {
		let mut event =
			TelemetryApiEvent::start("corr", "default", macros::datetime!(2025-01-01 00:00 UTC));
		let error = Error::Provider(
			ProviderError::server("invalid_client").with_description("Bad secret"),
		);

		assert!(event.stop(Some(&error), macros::datetime!(2025-01-01 00:00:02 UTC)));
		assert!(!event.stop(None, macros::datetime!(2025-01-01 00:00:05 UTC)));
		assert_eq!(event.outcome, Some(TelemetryOutcome::Failure));
		assert_eq!(event.error_code.as_deref(), Some("invalid_client"));
		assert_eq!(event.error_description.as_deref(), Some("Bad secret"));
		assert_eq!(event.duration(), Some(Duration::seconds(2)));
	}

	#[test]
	fn outcome_distinguishes_cancellation() {
		assert_eq!(TelemetryOutcome::from_error(None), TelemetryOutcome::Success);
		assert_eq!(
			TelemetryOutcome::from_error(Some(&Error::Provider(ProviderError::cancelled()))),
			TelemetryOutcome::Cancelled
		);
		assert_eq!(
			TelemetryOutcome::from_error(Some(&Error::Provider(ProviderError::network("reset")))),
			TelemetryOutcome::Failure
		);
	}

	#[test]
	fn memory_sink_collects_in_order() {
		let sink = MemoryTelemetrySink::new();
		let first = TelemetryApiEvent::start("a", "default", OffsetDateTime::UNIX_EPOCH);
		let second = TelemetryApiEvent::start("b", "default", OffsetDateTime::UNIX_EPOCH);

		sink.dispatch(first.clone());
		sink.dispatch(second.clone());

		assert_eq!(sink.events(), vec![first, second]);
	}
}
