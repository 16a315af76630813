//! Request-admission throttling for OAuth 2.0 token clients: thumbprinted failure caches,
//! partitioned persistent stores, and telemetry-bracketed request controllers.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod controller;
pub mod error;
pub mod obs;
pub mod provider;
pub mod request;
pub mod store;
pub mod telemetry;
pub mod throttle;
pub mod thumbprint;

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use url;
#[cfg(test)] use color_eyre as _;
