//! Wall-clock sources used to stamp and expire throttle records.

// self
use crate::_prelude::*;

/// Source of the current UTC instant.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;
}

/// Clock backed by the operating system's UTC time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Manually advanced clock for deterministic expiry checks.
#[derive(Clone, Debug)]
pub struct ManualClock(Arc<Mutex<OffsetDateTime>>);
impl ManualClock {
	/// Creates a clock frozen at `start`.
	pub fn new(start: OffsetDateTime) -> Self {
		Self(Arc::new(Mutex::new(start)))
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		*self.0.lock() += delta;
	}

	/// Jumps the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}
}
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn manual_clock_advances_shared_state() {
		let clock = ManualClock::new(macros::datetime!(2025-01-01 00:00 UTC));
		let shared = clock.clone();

		shared.advance(Duration::minutes(6));

		assert_eq!(clock.now(), macros::datetime!(2025-01-01 00:06 UTC));

		clock.set(macros::datetime!(2025-02-01 00:00 UTC));

		assert_eq!(shared.now(), macros::datetime!(2025-02-01 00:00 UTC));
	}

	#[test]
	fn system_clock_is_monotonic_enough() {
		let first = SystemClock.now();
		let second = SystemClock.now();

		assert!(second >= first);
	}
}
