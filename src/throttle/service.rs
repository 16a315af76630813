//! Admission decisions and cache updates for a single access-group partition.

// self
use crate::{
	_prelude::*,
	auth::AccessGroup,
	clock::{Clock, SystemClock},
	error::ThrottledError,
	obs::{self, ThrottleOp, ThrottleOutcome, ThrottleSpan},
	provider::ProviderError,
	request::RequestContext,
	store::{StoreError, ThrottleStore},
	throttle::ThrottlePolicy,
	thumbprint::{ThumbprintCalculatable, ThumbprintKind},
};

/// Result of an admission check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThrottleDecision {
	/// No live record matches; the request may go to the network.
	Proceed,
	/// The store could not be consulted; the request may go to the network anyway.
	ProceedDegraded(StoreError),
	/// A live record matches; the cached failure must be returned instead.
	Throttled(ThrottledError),
}
impl ThrottleDecision {
	/// Returns `true` when the request must not reach the network.
	pub fn should_throttle(&self) -> bool {
		matches!(self, Self::Throttled(_))
	}

	/// Returns the cached failure for throttled requests.
	pub fn error(&self) -> Option<&ThrottledError> {
		match self {
			Self::Throttled(e) => Some(e),
			_ => None,
		}
	}

	/// Returns the non-fatal storage diagnostic of a degraded decision.
	pub fn storage_error(&self) -> Option<&StoreError> {
		match self {
			Self::ProceedDegraded(e) => Some(e),
			_ => None,
		}
	}
}

/// Throttling policy bound to one store partition.
///
/// Cloning is cheap; clones share the store, policy, and clock.
#[derive(Clone)]
pub struct ThrottlingService {
	store: Arc<dyn ThrottleStore>,
	access_group: AccessGroup,
	context: RequestContext,
	policy: Arc<ThrottlePolicy>,
	clock: Arc<dyn Clock>,
}
impl ThrottlingService {
	/// Binds a service to `access_group` (or the default partition) and opens the partition.
	pub async fn new(
		store: Arc<dyn ThrottleStore>,
		access_group: Option<AccessGroup>,
		context: RequestContext,
	) -> Result<Self> {
		let access_group = access_group.unwrap_or_default();

		store.open_partition(&access_group).await?;

		Ok(Self {
			store,
			access_group,
			context,
			policy: Arc::new(ThrottlePolicy::default()),
			clock: Arc::new(SystemClock),
		})
	}

	/// Replaces the classification policy.
	pub fn with_policy(mut self, policy: ThrottlePolicy) -> Self {
		self.policy = Arc::new(policy);

		self
	}

	/// Replaces the clock used to stamp and expire records.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Partition this service reads and writes.
	pub fn access_group(&self) -> &AccessGroup {
		&self.access_group
	}

	/// Diagnostic context attached to spans and warnings.
	pub fn context(&self) -> &RequestContext {
		&self.context
	}

	/// Active classification policy.
	pub fn policy(&self) -> &ThrottlePolicy {
		&self.policy
	}

	/// Decides whether `request` must be answered from a cached failure.
	///
	/// Storage failures never block a request: they yield [`ThrottleDecision::ProceedDegraded`].
	pub async fn should_throttle_request(
		&self,
		request: &dyn ThumbprintCalculatable,
	) -> ThrottleDecision {
		let span = ThrottleSpan::new(
			ThrottleOp::ShouldThrottle,
			&self.access_group,
			&self.context.correlation_id,
		);

		span.instrument(async {
			let decision = match self.lookup(request).await {
				Ok(Some(cached)) => ThrottleDecision::Throttled(cached),
				Ok(None) => ThrottleDecision::Proceed,
				Err(e) => {
					obs::record_warning(
						ThrottleOp::ShouldThrottle,
						&self.context.correlation_id,
						&e,
						"Throttle store unavailable; letting the request through.",
					);

					ThrottleDecision::ProceedDegraded(e)
				},
			};
			let outcome = match &decision {
				ThrottleDecision::Proceed => ThrottleOutcome::Proceed,
				ThrottleDecision::ProceedDegraded(_) => ThrottleOutcome::Degraded,
				ThrottleDecision::Throttled(_) => ThrottleOutcome::Throttled,
			};

			span.finish(outcome);

			decision
		})
		.await
	}

	/// Feeds the outcome of a completed token request back into the cache.
	///
	/// `None` means success and clears every record for the request; a failure is classified
	/// and cached unless its class is never cached. The write has completed when the future
	/// resolves.
	pub async fn update_throttling_service(
		&self,
		error: Option<&ProviderError>,
		request: &dyn ThumbprintCalculatable,
	) -> Result<()> {
		let span =
			ThrottleSpan::new(ThrottleOp::Update, &self.access_group, &self.context.correlation_id);

		span.instrument(async {
			let result = self.apply_update(error, request).await;
			let outcome = match &result {
				Ok(outcome) => *outcome,
				Err(_) => ThrottleOutcome::Failure,
			};

			span.finish(outcome);

			result.map(|_| ())
		})
		.await
	}

	/// Marks every record in this service's partition as stale, stamped by the service clock.
	pub async fn update_last_refresh(&self) -> Result<()> {
		Self::update_last_refresh_time_at(
			self.store.as_ref(),
			Some(&self.access_group),
			self.clock.now(),
			&self.context,
		)
		.await
	}

	/// Marks every record currently in the partition as stale.
	///
	/// Records created at or before the refresh are ignored (and purged) by later checks. The
	/// watermark is stamped with the system clock; services running on another [`Clock`] should
	/// use [`update_last_refresh`](Self::update_last_refresh) or
	/// [`update_last_refresh_time_at`](Self::update_last_refresh_time_at).
	pub async fn update_last_refresh_time(
		store: &dyn ThrottleStore,
		access_group: Option<&AccessGroup>,
		context: &RequestContext,
	) -> Result<()> {
		Self::update_last_refresh_time_at(store, access_group, SystemClock.now(), context).await
	}

	/// Same as [`update_last_refresh_time`](Self::update_last_refresh_time) with an explicit
	/// instant.
	pub async fn update_last_refresh_time_at(
		store: &dyn ThrottleStore,
		access_group: Option<&AccessGroup>,
		instant: OffsetDateTime,
		context: &RequestContext,
	) -> Result<()> {
		let access_group = AccessGroup::or_default(access_group);
		let span =
			ThrottleSpan::new(ThrottleOp::RefreshWatermark, &access_group, &context.correlation_id);
		let result = span.instrument(store.set_last_refresh(&access_group, instant)).await;

		span.finish(if result.is_ok() {
			ThrottleOutcome::Success
		} else {
			ThrottleOutcome::Failure
		});

		Ok(result?)
	}

	async fn lookup(
		&self,
		request: &dyn ThumbprintCalculatable,
	) -> Result<Option<ThrottledError>, StoreError> {
		let now = self.clock.now();
		let last_refresh = self.store.last_refresh(&self.access_group).await?;

		for kind in [ThumbprintKind::Base, ThumbprintKind::Full] {
			let thumbprint = request.thumbprint(kind);
			let Some(record) = self.store.get(&self.access_group, &thumbprint, now).await? else {
				continue;
			};

			if let Some(watermark) = last_refresh.filter(|_| record.is_stale(last_refresh)) {
				if let Err(e) = self
					.store
					.remove_if_created_before(&self.access_group, &thumbprint, watermark)
					.await
				{
					obs::record_warning(
						ThrottleOp::ShouldThrottle,
						&self.context.correlation_id,
						&e,
						"Failed to purge a stale throttle record.",
					);
				}

				continue;
			}
			if !record.strict && request.bypasses_advisory_throttling() {
				continue;
			}

			return Ok(Some(record.to_throttled_error()));
		}

		Ok(None)
	}

	async fn apply_update(
		&self,
		error: Option<&ProviderError>,
		request: &dyn ThumbprintCalculatable,
	) -> Result<ThrottleOutcome> {
		let Some(error) = error else {
			for kind in [ThumbprintKind::Base, ThumbprintKind::Full] {
				self.store.delete(&self.access_group, &request.thumbprint(kind)).await?;
			}

			return Ok(ThrottleOutcome::Cleared);
		};

		match self.policy.record_for(error, request, self.clock.now()) {
			Some(record) => {
				let (class, window) = (record.class, record.expires_at - record.created_at);

				self.store.put(&self.access_group, record).await?;
				obs::record_cached_window(class, window);

				Ok(ThrottleOutcome::Cached)
			},
			None => Ok(ThrottleOutcome::Skipped),
		}
	}
}
impl Debug for ThrottlingService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ThrottlingService")
			.field("access_group", &self.access_group)
			.field("context", &self.context)
			.field("policy", &self.policy)
			.finish_non_exhaustive()
	}
}
