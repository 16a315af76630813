//! Orchestration of a single token acquisition: admission check, provider call, cache update,
//! and the telemetry event bracketing all three.

// self
use crate::{
	_prelude::*,
	obs::{self, ThrottleOp, ThrottleOutcome, ThrottleSpan},
	provider::{ProviderError, TokenRequestProvider},
	request::RequestParameters,
	store::StoreError,
	telemetry::{TelemetryApiEvent, TelemetrySink},
	throttle::{ThrottleDecision, ThrottlingService},
};

#[derive(Debug, Default)]
struct TelemetryState {
	event: Option<TelemetryApiEvent>,
	storage_error: Option<String>,
}

/// Drives one token acquisition for validated request parameters.
///
/// A controller owns a single telemetry event; once stopped, later stops are ignored.
pub struct RequestController<P>
where
	P: ?Sized + TokenRequestProvider,
{
	parameters: RequestParameters,
	provider: Arc<P>,
	throttling: ThrottlingService,
	sink: Option<Arc<dyn TelemetrySink>>,
	telemetry: Mutex<TelemetryState>,
}
impl<P> RequestController<P>
where
	P: ?Sized + TokenRequestProvider,
{
	/// Validates `parameters` and binds them to a provider and throttling service.
	pub fn new(
		parameters: RequestParameters,
		provider: Arc<P>,
		throttling: ThrottlingService,
	) -> Result<Self> {
		parameters.validate()?;

		Ok(Self {
			parameters,
			provider,
			throttling,
			sink: None,
			telemetry: Mutex::new(TelemetryState::default()),
		})
	}

	/// Dispatches stopped telemetry events to `sink`.
	pub fn with_telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
		self.sink = Some(sink);

		self
	}

	/// Validated request parameters.
	pub fn parameters(&self) -> &RequestParameters {
		&self.parameters
	}

	/// Throttling service consulted by this controller.
	pub fn throttling(&self) -> &ThrottlingService {
		&self.throttling
	}

	/// Returns the controller's telemetry event, starting it on first use.
	///
	/// Returns `None` when no sink is attached.
	pub fn telemetry_api_event(&self) -> Option<TelemetryApiEvent> {
		self.sink.as_ref()?;

		let mut state = self.telemetry.lock();
		let event = state.event.get_or_insert_with(|| {
			TelemetryApiEvent::start(
				self.parameters.context.correlation_id.clone(),
				self.throttling.access_group().to_string(),
				OffsetDateTime::now_utc(),
			)
		});

		Some(event.clone())
	}

	/// Stops `event` with the attempt's final error and dispatches it to the sink.
	///
	/// Stopping an event twice, or an event this controller did not start, does nothing.
	pub fn stop_telemetry_event(&self, event: &TelemetryApiEvent, error: Option<&Error>) {
		let Some(sink) = &self.sink else { return };
		let stopped = {
			let mut state = self.telemetry.lock();
			let TelemetryState { event: current, storage_error } = &mut *state;
			let Some(current) = current.as_mut().filter(|current| current.event_id == event.event_id)
			else {
				return;
			};

			if !current.stop(error, OffsetDateTime::now_utc()) {
				return;
			}

			current.storage_error = storage_error.take();

			current.clone()
		};

		sink.dispatch(stopped);
	}

	/// Acquires a token unless a cached failure throttles the request.
	///
	/// The telemetry event is stopped on every exit path, including when the returned future is
	/// dropped before completion.
	pub async fn acquire_token(&self) -> Result<P::Token> {
		let span = ThrottleSpan::new(
			ThrottleOp::AcquireToken,
			self.throttling.access_group(),
			&self.parameters.context.correlation_id,
		);

		span.instrument(async {
			let scope = TelemetryScope::start(self);

			match self.throttling.should_throttle_request(&self.parameters).await {
				ThrottleDecision::Throttled(cached) => {
					let error = Error::Throttled(cached);

					scope.finish(Some(&error));
					span.finish(ThrottleOutcome::Throttled);

					return Err(error);
				},
				ThrottleDecision::ProceedDegraded(e) => self.attach_storage_error(&e),
				ThrottleDecision::Proceed => {},
			}

			let outcome = self.provider.acquire_token(&self.parameters).await;

			if let Err(e) = self
				.throttling
				.update_throttling_service(outcome.as_ref().err(), &self.parameters)
				.await
			{
				obs::record_warning(
					ThrottleOp::Update,
					&self.parameters.context.correlation_id,
					&e,
					"Failed to update the throttle cache after a token request.",
				);

				if let Error::Storage(e) = &e {
					self.attach_storage_error(e);
				}
			}

			let result = outcome.map_err(Error::from);

			scope.finish(result.as_ref().err());
			span.finish(if result.is_ok() {
				ThrottleOutcome::Success
			} else {
				ThrottleOutcome::Failure
			});

			result
		})
		.await
	}

	fn attach_storage_error(&self, error: &StoreError) {
		self.telemetry.lock().storage_error = Some(error.to_string());
	}
}
impl<P> Debug for RequestController<P>
where
	P: ?Sized + TokenRequestProvider,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestController")
			.field("parameters", &self.parameters)
			.field("throttling", &self.throttling)
			.field("telemetry", &*self.telemetry.lock())
			.finish_non_exhaustive()
	}
}

/// Keeps the telemetry event open for the lifetime of one acquisition.
///
/// Dropping the scope without [`finish`](Self::finish) stops the event as cancelled.
struct TelemetryScope<'a, P>
where
	P: ?Sized + TokenRequestProvider,
{
	controller: &'a RequestController<P>,
	event: Option<TelemetryApiEvent>,
}
impl<'a, P> TelemetryScope<'a, P>
where
	P: ?Sized + TokenRequestProvider,
{
	fn start(controller: &'a RequestController<P>) -> Self {
		Self { controller, event: controller.telemetry_api_event() }
	}

	fn finish(mut self, error: Option<&Error>) {
		if let Some(event) = self.event.take() {
			self.controller.stop_telemetry_event(&event, error);
		}
	}
}
impl<P> Drop for TelemetryScope<'_, P>
where
	P: ?Sized + TokenRequestProvider,
{
	fn drop(&mut self) {
		if let Some(event) = self.event.take() {
			let cancelled = Error::Provider(ProviderError::cancelled());

			self.controller.stop_telemetry_event(&event, Some(&cancelled));
		}
	}
}
