//! Auth-domain identifiers, scope sets, and grant types that feed request thumbprints.

pub mod grant;
pub mod id;
pub mod scope;

pub use grant::*;
pub use id::*;
pub use scope::*;
