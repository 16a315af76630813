//! Storage contracts and built-in partitioned stores for throttle records.
//!
//! Every operation is scoped to exactly one [`AccessGroup`] partition. Implementations must
//! serialize mutations within a partition, let reads proceed concurrently, replace records
//! atomically, and bound every wait so a stuck medium surfaces as [`StoreError::Timeout`].

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// std
use std::time::Duration as StdDuration;
// self
use crate::{_prelude::*, auth::AccessGroup, throttle::ThrottleRecord, thumbprint::Thumbprint};

/// Default bound on partition lock waits.
pub const DEFAULT_LOCK_TIMEOUT: StdDuration = StdDuration::from_secs(2);

/// Boxed future returned by [`ThrottleStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Partitioned persistence contract for throttle records.
pub trait ThrottleStore
where
	Self: Send + Sync,
{
	/// Prepares the partition (loading persisted state when needed).
	fn open_partition<'a>(&'a self, partition: &'a AccessGroup) -> StoreFuture<'a, ()>;

	/// Fetches the live record for `thumbprint`; records expired at `now` read as absent.
	fn get<'a>(
		&'a self,
		partition: &'a AccessGroup,
		thumbprint: &'a Thumbprint,
		now: OffsetDateTime,
	) -> StoreFuture<'a, Option<ThrottleRecord>>;

	/// Inserts or replaces the record for its thumbprint.
	fn put<'a>(&'a self, partition: &'a AccessGroup, record: ThrottleRecord) -> StoreFuture<'a, ()>;

	/// Removes the record for `thumbprint`; missing records are not an error.
	fn delete<'a>(
		&'a self,
		partition: &'a AccessGroup,
		thumbprint: &'a Thumbprint,
	) -> StoreFuture<'a, ()>;

	/// Atomically removes the record only if it was created at or before `watermark`.
	///
	/// Returns `true` when a record was removed.
	fn remove_if_created_before<'a>(
		&'a self,
		partition: &'a AccessGroup,
		thumbprint: &'a Thumbprint,
		watermark: OffsetDateTime,
	) -> StoreFuture<'a, bool>;

	/// Moves the partition's refresh watermark.
	fn set_last_refresh<'a>(
		&'a self,
		partition: &'a AccessGroup,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, ()>;

	/// Reads the partition's refresh watermark.
	fn last_refresh<'a>(&'a self, partition: &'a AccessGroup)
	-> StoreFuture<'a, Option<OffsetDateTime>>;
}

/// Error type produced by [`ThrottleStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage medium.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A partition lock could not be acquired in time.
	#[error("Timed out waiting for partition `{partition}`.")]
	Timeout {
		/// Partition whose lock was contended.
		partition: String,
	},
}

/// In-process state of a single partition.
#[derive(Clone, Debug, Default)]
pub(crate) struct PartitionState {
	pub(crate) last_refresh: Option<OffsetDateTime>,
	pub(crate) records: HashMap<Thumbprint, ThrottleRecord>,
}
impl PartitionState {
	pub(crate) fn live(&self, thumbprint: &Thumbprint, now: OffsetDateTime) -> LiveLookup {
		match self.records.get(thumbprint) {
			Some(record) if record.is_expired_at(now) => LiveLookup::Expired,
			Some(record) => LiveLookup::Live(record.clone()),
			None => LiveLookup::Missing,
		}
	}

	/// Removes the record if it is still expired at `now`; returns whether it was removed.
	pub(crate) fn evict_expired(&mut self, thumbprint: &Thumbprint, now: OffsetDateTime) -> bool {
		if self.records.get(thumbprint).is_some_and(|record| record.is_expired_at(now)) {
			self.records.remove(thumbprint);

			return true;
		}

		false
	}

	pub(crate) fn remove_if_created_before(
		&mut self,
		thumbprint: &Thumbprint,
		watermark: OffsetDateTime,
	) -> bool {
		if self.records.get(thumbprint).is_some_and(|record| record.created_at <= watermark) {
			self.records.remove(thumbprint);

			return true;
		}

		false
	}
}

pub(crate) enum LiveLookup {
	Live(ThrottleRecord),
	Expired,
	Missing,
}

/// Handle to a partition's lock, shared by clones of a store.
pub(crate) type PartitionHandle = Arc<RwLock<PartitionState>>;

pub(crate) fn timeout_error(partition: &AccessGroup) -> StoreError {
	StoreError::Timeout { partition: partition.to_string() }
}
