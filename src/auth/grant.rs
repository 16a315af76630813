//! OAuth 2.0 grant types used when building token requests.

// self
use crate::_prelude::*;

/// OAuth 2.0 grant types a token request can use.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
	/// Authorization Code grant.
	AuthorizationCode,
	/// Refresh Token grant used for silent acquisition.
	RefreshToken,
	/// Client Credentials grant for app-only tokens.
	ClientCredentials,
	/// Device Authorization grant.
	DeviceCode,
}
impl GrantType {
	/// Returns the wire identifier for the grant type.
	pub fn as_str(self) -> &'static str {
		match self {
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::RefreshToken => "refresh_token",
			GrantType::ClientCredentials => "client_credentials",
			GrantType::DeviceCode => "urn:ietf:params:oauth:grant-type:device_code",
		}
	}
}
impl Display for GrantType {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
