//! Thread-safe in-memory [`ThrottleStore`] for tests and hosts without persistent storage.

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	auth::AccessGroup,
	store::{
		DEFAULT_LOCK_TIMEOUT, LiveLookup, PartitionHandle, PartitionState, StoreError, StoreFuture,
		ThrottleStore, timeout_error,
	},
	throttle::ThrottleRecord,
	thumbprint::Thumbprint,
};

type PartitionMap = Arc<RwLock<HashMap<AccessGroup, PartitionHandle>>>;

/// Storage backend that keeps partitions in-process; clones share the same partitions.
#[derive(Clone, Debug)]
pub struct MemoryStore {
	partitions: PartitionMap,
	lock_timeout: StdDuration,
}
impl MemoryStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self { partitions: Default::default(), lock_timeout: DEFAULT_LOCK_TIMEOUT }
	}

	/// Overrides the bound on partition lock waits.
	pub fn with_lock_timeout(mut self, timeout: StdDuration) -> Self {
		self.lock_timeout = timeout;

		self
	}

	/// Number of records currently held by `partition`, expired ones included.
	pub fn len(&self, partition: &AccessGroup) -> Result<usize, StoreError> {
		let Some(handle) = self.existing(partition)? else { return Ok(0) };
		let guard = handle.try_read_for(self.lock_timeout).ok_or_else(|| timeout_error(partition))?;

		Ok(guard.records.len())
	}

	fn existing(&self, group: &AccessGroup) -> Result<Option<PartitionHandle>, StoreError> {
		let partitions =
			self.partitions.try_read_for(self.lock_timeout).ok_or_else(|| timeout_error(group))?;

		Ok(partitions.get(group).cloned())
	}

	fn partition(&self, group: &AccessGroup) -> Result<PartitionHandle, StoreError> {
		if let Some(handle) = self.existing(group)? {
			return Ok(handle);
		}

		let mut partitions =
			self.partitions.try_write_for(self.lock_timeout).ok_or_else(|| timeout_error(group))?;

		Ok(partitions.entry(group.clone()).or_default().clone())
	}

	fn get_now(
		&self,
		group: &AccessGroup,
		thumbprint: &Thumbprint,
		now: OffsetDateTime,
	) -> Result<Option<ThrottleRecord>, StoreError> {
		let handle = self.partition(group)?;
		let lookup = handle
			.try_read_for(self.lock_timeout)
			.ok_or_else(|| timeout_error(group))?
			.live(thumbprint, now);

		match lookup {
			LiveLookup::Live(record) => Ok(Some(record)),
			LiveLookup::Expired => {
				if let Some(mut guard) = handle.try_write() {
					guard.evict_expired(thumbprint, now);
				}

				Ok(None)
			},
			LiveLookup::Missing => Ok(None),
		}
	}

	fn mutate<T>(
		&self,
		group: &AccessGroup,
		f: impl FnOnce(&mut PartitionState) -> T,
	) -> Result<T, StoreError> {
		let handle = self.partition(group)?;
		let mut guard = handle.try_write_for(self.lock_timeout).ok_or_else(|| timeout_error(group))?;

		Ok(f(&mut *guard))
	}
}
impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}
impl ThrottleStore for MemoryStore {
	fn open_partition<'a>(&'a self, partition: &'a AccessGroup) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.partition(partition).map(|_| ()) })
	}

	fn get<'a>(
		&'a self,
		partition: &'a AccessGroup,
		thumbprint: &'a Thumbprint,
		now: OffsetDateTime,
	) -> StoreFuture<'a, Option<ThrottleRecord>> {
		Box::pin(async move { self.get_now(partition, thumbprint, now) })
	}

	fn put<'a>(&'a self, partition: &'a AccessGroup, record: ThrottleRecord) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.mutate(partition, |state| {
				state.records.insert(record.thumbprint.clone(), record);
			})
		})
	}

	fn delete<'a>(
		&'a self,
		partition: &'a AccessGroup,
		thumbprint: &'a Thumbprint,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.mutate(partition, |state| {
				state.records.remove(thumbprint);
			})
		})
	}

	fn remove_if_created_before<'a>(
		&'a self,
		partition: &'a AccessGroup,
		thumbprint: &'a Thumbprint,
		watermark: OffsetDateTime,
	) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			self.mutate(partition, |state| state.remove_if_created_before(thumbprint, watermark))
		})
	}

	fn set_last_refresh<'a>(
		&'a self,
		partition: &'a AccessGroup,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.mutate(partition, |state| {
				state.last_refresh = Some(instant);
			})
		})
	}

	fn last_refresh<'a>(
		&'a self,
		partition: &'a AccessGroup,
	) -> StoreFuture<'a, Option<OffsetDateTime>> {
		Box::pin(async move {
			let handle = self.partition(partition)?;
			let guard =
				handle.try_read_for(self.lock_timeout).ok_or_else(|| timeout_error(partition))?;

			Ok(guard.last_refresh)
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::thumbprint::{ThumbprintFields, ThumbprintKind};

	fn record_key() -> Thumbprint {
		Thumbprint::compute(&ThumbprintFields::new().with_field("client_id", "c"), ThumbprintKind::Base)
	}

	fn record(created: OffsetDateTime, expires: OffsetDateTime) -> ThrottleRecord {
		ThrottleRecord::builder(record_key(), ThumbprintKind::Base)
		.error_code("server_error")
		.created_at(created)
		.expires_at(expires)
		.build()
		.expect("Record fixture should build.")
	}

	#[test]
	fn expired_reads_purge_opportunistically() {
		let rt = Runtime::new().expect("Failed to build Tokio runtime for memory store test.");
		let store = MemoryStore::new();
		let group = AccessGroup::default_group();
		let fixture = record(
			macros::datetime!(2025-01-01 00:00 UTC),
			macros::datetime!(2025-01-01 00:01 UTC),
		);
		let key = fixture.thumbprint.clone();

		rt.block_on(store.put(&group, fixture)).expect("Put should succeed.");

		assert_eq!(store.len(&group), Ok(1));

		let fetched = rt
			.block_on(store.get(&group, &key, macros::datetime!(2025-01-01 00:02 UTC)))
			.expect("Get should succeed.");

		assert!(fetched.is_none());
		assert_eq!(store.len(&group), Ok(0));
	}

	#[test]
	fn contended_partition_times_out_instead_of_hanging() {
		let rt = Runtime::new().expect("Failed to build Tokio runtime for memory store test.");
		let store = MemoryStore::new().with_lock_timeout(StdDuration::from_millis(20));
		let group = AccessGroup::default_group();
		let handle = store.partition(&group).expect("Partition should open.");
		let _held = handle.write();
		let err = rt
			.block_on(store.set_last_refresh(&group, OffsetDateTime::UNIX_EPOCH))
			.expect_err("A held partition lock must surface as a timeout.");

		assert_eq!(err, StoreError::Timeout { partition: "default".into() });
	}

	#[test]
	fn contended_partition_map_times_out_instead_of_hanging() {
		let rt = Runtime::new().expect("Failed to build Tokio runtime for memory store test.");
		let store = MemoryStore::new().with_lock_timeout(StdDuration::from_millis(20));
		let group = AccessGroup::default_group();

		rt.block_on(store.open_partition(&group)).expect("Partition should open.");

		let _held = store.partitions.write();
		let err = rt
			.block_on(store.get(&group, &record_key(), OffsetDateTime::UNIX_EPOCH))
			.expect_err("A held partition map must surface as a timeout on reads.");

		assert_eq!(err, StoreError::Timeout { partition: "default".into() });
		assert_eq!(store.len(&group), Err(StoreError::Timeout { partition: "default".into() }));
	}
}
