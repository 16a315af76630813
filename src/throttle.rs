//! Throttle records, the error classification policy, and the throttling service.
//!
//! A failed token request leaves a [`ThrottleRecord`] behind, keyed by the request's
//! thumbprint inside the caller's access-group partition. [`ThrottlingService`] consults those
//! records before the next attempt and replaces or clears them once the attempt completes.

pub mod policy;
pub mod record;
pub mod service;

pub use policy::*;
pub use record::*;
pub use service::*;
