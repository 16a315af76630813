//! File-backed [`ThrottleStore`] that survives process restarts.
//!
//! Each partition lives in its own JSON file under the store root, named by the unpadded
//! URL-safe base64 of the access group. The file is the source of truth: every mutation reloads
//! it under the partition lock, applies the change, and persists through a uniquely named temp
//! file + fsync + rename. Reads reuse the cached copy until the file's modification stamp moves,
//! so stores opened on the same root observe each other's writes.

// std
use std::{
	fs::{self, File},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
	process,
	sync::atomic::{AtomicU64, Ordering},
	time::{Duration as StdDuration, SystemTime},
};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	auth::AccessGroup,
	obs::{self, ThrottleOp},
	store::{
		DEFAULT_LOCK_TIMEOUT, LiveLookup, PartitionState, StoreError, StoreFuture, ThrottleStore,
		timeout_error,
	},
	throttle::ThrottleRecord,
	thumbprint::Thumbprint,
};

static TMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

type FilePartition = Arc<RwLock<CachedPartition>>;

#[derive(Default, Serialize, Deserialize)]
struct PartitionSnapshot {
	last_refresh: Option<OffsetDateTime>,
	records: Vec<ThrottleRecord>,
}

/// Modification time and length of a partition file at the moment it was read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
	modified: SystemTime,
	len: u64,
}
impl FileStamp {
	fn of(path: &Path) -> Result<Option<Self>, StoreError> {
		let metadata = match fs::metadata(path) {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to stat {}: {e}", path.display()),
				}),
		};
		let modified = metadata.modified().map_err(|e| StoreError::Backend {
			message: format!("Failed to read the modification time of {}: {e}", path.display()),
		})?;

		Ok(Some(Self { modified, len: metadata.len() }))
	}
}

#[derive(Debug, Default)]
struct CachedPartition {
	state: PartitionState,
	stamp: Option<FileStamp>,
}

/// Persists each access-group partition to a JSON file after every mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	root: PathBuf,
	partitions: Arc<RwLock<HashMap<AccessGroup, FilePartition>>>,
	lock_timeout: StdDuration,
}
impl FileStore {
	/// Opens (or creates) a store rooted at the provided directory.
	pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let root = root.into();

		fs::create_dir_all(&root).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", root.display()),
		})?;

		Ok(Self { root, partitions: Default::default(), lock_timeout: DEFAULT_LOCK_TIMEOUT })
	}

	/// Overrides the bound on partition lock waits.
	pub fn with_lock_timeout(mut self, timeout: StdDuration) -> Self {
		self.lock_timeout = timeout;

		self
	}

	/// Path of the file backing `partition`.
	pub fn partition_path(&self, partition: &AccessGroup) -> PathBuf {
		self.root.join(format!("{}.json", URL_SAFE_NO_PAD.encode(partition.as_bytes())))
	}

	fn partition(&self, group: &AccessGroup) -> Result<FilePartition, StoreError> {
		let cached = self
			.partitions
			.try_read_for(self.lock_timeout)
			.ok_or_else(|| timeout_error(group))?
			.get(group)
			.cloned();

		if let Some(handle) = cached {
			return Ok(handle);
		}

		let mut partitions =
			self.partitions.try_write_for(self.lock_timeout).ok_or_else(|| timeout_error(group))?;

		if let Some(handle) = partitions.get(group) {
			return Ok(handle.clone());
		}

		let handle = Arc::new(RwLock::new(Self::load(&self.partition_path(group))?));

		partitions.insert(group.clone(), handle.clone());

		Ok(handle)
	}

	fn load(path: &Path) -> Result<CachedPartition, StoreError> {
		// Stamp first: a write racing the read leaves an old stamp and forces another reload.
		let stamp = FileStamp::of(path)?;

		if stamp.is_none() {
			return Ok(CachedPartition::default());
		}

		Ok(CachedPartition { state: Self::load_snapshot(path)?, stamp })
	}

	fn load_snapshot(path: &Path) -> Result<PartitionState, StoreError> {
		let bytes = match fs::read(path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PartitionState::default()),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", path.display()),
				}),
		};

		if bytes.is_empty() {
			return Ok(PartitionState::default());
		}

		let snapshot: PartitionSnapshot =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;
		let records = snapshot
			.records
			.into_iter()
			.filter(ThrottleRecord::has_valid_window)
			.map(|record| (record.thumbprint.clone(), record))
			.collect();

		Ok(PartitionState { last_refresh: snapshot.last_refresh, records })
	}

	fn persist(path: &Path, state: &PartitionState) -> Result<(), StoreError> {
		let snapshot = PartitionSnapshot {
			last_refresh: state.last_refresh,
			records: state.records.values().cloned().collect(),
		};
		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize partition snapshot: {e}"),
			})?;
		let tmp_path = path.with_extension(format!(
			"{}.{}.tmp",
			process::id(),
			TMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
		));
		let written = Self::write_synced(&tmp_path, &serialized).and_then(|()| {
			fs::rename(&tmp_path, path).map_err(|e| StoreError::Backend {
				message: format!("Failed to replace {}: {e}", path.display()),
			})
		});

		if written.is_err() {
			let _ = fs::remove_file(&tmp_path);
		}

		written
	}

	fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
		let mut file = File::create(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to create {}: {e}", path.display()),
		})?;

		file.write_all(bytes).map_err(|e| StoreError::Backend {
			message: format!("Failed to write {}: {e}", path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", path.display()),
		})
	}

	/// Runs `f` against the partition as it currently is on disk.
	fn read<T>(
		&self,
		group: &AccessGroup,
		f: impl FnOnce(&PartitionState) -> T,
	) -> Result<T, StoreError> {
		let handle = self.partition(group)?;
		let path = self.partition_path(group);
		let stamp = FileStamp::of(&path)?;

		{
			let guard =
				handle.try_read_for(self.lock_timeout).ok_or_else(|| timeout_error(group))?;

			if guard.stamp == stamp {
				return Ok(f(&guard.state));
			}
		}

		let mut guard = handle.try_write_for(self.lock_timeout).ok_or_else(|| timeout_error(group))?;

		*guard = Self::load(&path)?;

		Ok(f(&guard.state))
	}

	/// Reloads the partition, applies `f`, and persists the result before publishing it.
	fn mutate<T>(
		&self,
		group: &AccessGroup,
		f: impl FnOnce(&mut PartitionState) -> T,
	) -> Result<T, StoreError> {
		let handle = self.partition(group)?;
		let mut guard = handle.try_write_for(self.lock_timeout).ok_or_else(|| timeout_error(group))?;
		let path = self.partition_path(group);
		let mut next = Self::load_snapshot(&path)?;
		let output = f(&mut next);

		Self::persist(&path, &next)?;
		*guard = CachedPartition { state: next, stamp: FileStamp::of(&path).unwrap_or_default() };

		Ok(output)
	}

	fn purge_expired(
		&self,
		group: &AccessGroup,
		thumbprint: &Thumbprint,
		now: OffsetDateTime,
	) -> Result<(), StoreError> {
		let handle = self.partition(group)?;
		let Some(mut guard) = handle.try_write() else { return Ok(()) };
		let path = self.partition_path(group);
		let mut next = Self::load(&path)?;

		if next.state.evict_expired(thumbprint, now) {
			Self::persist(&path, &next.state)?;

			next.stamp = FileStamp::of(&path).unwrap_or_default();
		}

		*guard = next;

		Ok(())
	}

	fn get_now(
		&self,
		group: &AccessGroup,
		thumbprint: &Thumbprint,
		now: OffsetDateTime,
	) -> Result<Option<ThrottleRecord>, StoreError> {
		match self.read(group, |state| state.live(thumbprint, now))? {
			LiveLookup::Live(record) => Ok(Some(record)),
			LiveLookup::Expired => {
				if let Err(e) = self.purge_expired(group, thumbprint, now) {
					obs::record_warning(
						ThrottleOp::StorePurge,
						group,
						&e,
						"Failed to persist expired record eviction.",
					);
				}

				Ok(None)
			},
			LiveLookup::Missing => Ok(None),
		}
	}
}
impl ThrottleStore for FileStore {
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
			let present = self.read(partition, |state| state.records.contains_key(thumbprint))?;

			if !present {
				return Ok(());
			}

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
		Box::pin(async move { self.read(partition, |state| state.last_refresh) })
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// crates.io
	use time::macros;
	use tokio::runtime::Runtime;
	// self
	use super::*;
	use crate::thumbprint::{ThumbprintFields, ThumbprintKind};

	fn temp_root() -> PathBuf {
		let unique = format!(
			"oauth2_throttle_file_store_{}_{}",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_record(client: &str) -> ThrottleRecord {
		ThrottleRecord::builder(
			Thumbprint::compute(
				&ThumbprintFields::new().with_field("client_id", client),
				ThumbprintKind::Base,
			),
			ThumbprintKind::Base,
		)
		.error_code("invalid_client")
		.strict(true)
		.created_at(macros::datetime!(2025-01-01 00:00 UTC))
		.expires_in(Duration::minutes(5))
		.build()
		.expect("Failed to build file-store test record.")
	}

	#[test]
	fn records_and_watermark_survive_reopen() {
		let root = temp_root();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let group = AccessGroup::new("com.example.shared").expect("Group fixture should be valid.");
		let record = build_record("client-1");
		let watermark = macros::datetime!(2024-12-31 00:00 UTC);

		{
			let store = FileStore::open(&root).expect("Failed to open file store.");

			rt.block_on(store.put(&group, record.clone())).expect("Failed to save fixture record.");
			rt.block_on(store.set_last_refresh(&group, watermark))
				.expect("Failed to save fixture watermark.");
		}

		let reopened = FileStore::open(&root).expect("Failed to reopen file store.");
		let fetched = rt
			.block_on(reopened.get(
				&group,
				&record.thumbprint,
				macros::datetime!(2025-01-01 00:01 UTC),
			))
			.expect("Failed to fetch fixture record from file store.")
			.expect("File store lost record after reopen.");

		assert_eq!(fetched, record);
		assert_eq!(
			rt.block_on(reopened.last_refresh(&group)).expect("Failed to read watermark."),
			Some(watermark)
		);

		fs::remove_dir_all(&root).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store root {}: {e}", root.display())
		});
	}

	#[test]
	fn partitions_use_separate_files() {
		let root = temp_root();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let store = FileStore::open(&root).expect("Failed to open file store.");
		let group_a = AccessGroup::new("group-a").expect("Group fixture should be valid.");
		let group_b = AccessGroup::new("group-b").expect("Group fixture should be valid.");
		let record = build_record("client-1");

		rt.block_on(store.put(&group_a, record.clone())).expect("Failed to save fixture record.");

		assert!(store.partition_path(&group_a).exists());
		assert!(!store.partition_path(&group_b).exists());
		assert!(
			rt.block_on(store.get(&group_b, &record.thumbprint, macros::datetime!(2025-01-01 00:01 UTC)))
				.expect("Reading an empty partition should succeed.")
				.is_none()
		);

		fs::remove_dir_all(&root).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store root {}: {e}", root.display())
		});
	}

	#[test]
	fn corrupt_partition_surfaces_serialization_error() {
		let root = temp_root();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let store = FileStore::open(&root).expect("Failed to open file store.");
		let group = AccessGroup::default_group();

		fs::write(store.partition_path(&group), b"{not json").expect("Failed to corrupt partition.");

		let err = rt
			.block_on(store.open_partition(&group))
			.expect_err("Corrupt partitions must not open silently.");

		assert!(matches!(err, StoreError::Serialization { .. }));

		fs::remove_dir_all(&root).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store root {}: {e}", root.display())
		});
	}

	#[test]
	fn contended_partition_map_times_out_instead_of_hanging() {
		let root = temp_root();
		let rt = Runtime::new().expect("Failed to build Tokio runtime for file store test.");
		let store = FileStore::open(&root)
			.expect("Failed to open file store.")
			.with_lock_timeout(StdDuration::from_millis(20));
		let group = AccessGroup::default_group();

		rt.block_on(store.open_partition(&group)).expect("Empty partitions should open.");

		let held = store.partitions.write();
		let err = rt
			.block_on(store.last_refresh(&group))
			.expect_err("A held partition map must surface as a timeout.");

		assert_eq!(err, StoreError::Timeout { partition: "default".into() });

		drop(held);
		fs::remove_dir_all(&root).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store root {}: {e}", root.display())
		});
	}
}
