//! Contract for the external capability that performs the actual token exchange.
//!
//! The crate never talks to the network itself. Hosts plug in a [`TokenRequestProvider`]
//! (HTTP client, platform broker, test double) and report failures as [`ProviderError`] values,
//! which the throttling policy classifies and caches.

// self
use crate::{_prelude::*, request::RequestParameters};

/// Boxed future returned by [`TokenRequestProvider::acquire_token`].
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + 'a + Send>>;

/// Performs the token exchange for validated request parameters.
pub trait TokenRequestProvider
where
	Self: Send + Sync,
{
	/// Token (or token response) produced on success.
	type Token: Send;

	/// Executes the exchange. Cancellation is the provider's concern; a cancelled exchange
	/// resolves to [`ProviderError::cancelled`].
	fn acquire_token<'a>(&'a self, parameters: &'a RequestParameters) -> ProviderFuture<'a, Self::Token>;
}

/// Origin of a provider failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
	/// The token endpoint answered with an error response.
	Server,
	/// The request never produced a response (DNS, TCP, TLS, timeout).
	Network,
	/// The exchange was cancelled before completing.
	Cancelled,
}

/// Opaque failure passed through from the token request provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
#[error("Token request failed with `{code}`{}.", .description.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct ProviderError {
	/// Failure origin.
	pub kind: ProviderErrorKind,
	/// OAuth `error` code (or a synthetic code for network/cancellation failures).
	pub code: String,
	/// OAuth `error_description`, when supplied.
	pub description: Option<String>,
	/// HTTP status code, when a response was received.
	pub http_status: Option<u16>,
	/// Server-supplied `Retry-After` hint.
	pub retry_after: Option<Duration>,
}
impl ProviderError {
	/// Synthetic code used for network failures.
	pub const NETWORK_CODE: &'static str = "network_error";
	/// Synthetic code used for cancelled exchanges.
	pub const CANCELLED_CODE: &'static str = "cancelled";

	/// Creates an error for an OAuth error response.
	pub fn server(code: impl Into<String>) -> Self {
		Self {
			kind: ProviderErrorKind::Server,
			code: code.into(),
			description: None,
			http_status: None,
			retry_after: None,
		}
	}

	/// Creates an error for a transport failure.
	pub fn network(message: impl Display) -> Self {
		Self {
			kind: ProviderErrorKind::Network,
			code: Self::NETWORK_CODE.into(),
			description: Some(message.to_string()),
			http_status: None,
			retry_after: None,
		}
	}

	/// Creates an error for a cancelled exchange.
	pub fn cancelled() -> Self {
		Self {
			kind: ProviderErrorKind::Cancelled,
			code: Self::CANCELLED_CODE.into(),
			description: None,
			http_status: None,
			retry_after: None,
		}
	}

	/// Attaches the error description.
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());

		self
	}

	/// Attaches the HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Attaches the server's `Retry-After` hint.
	pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
		self.retry_after = Some(retry_after);

		self
	}

	/// Returns the OAuth error code.
	pub fn code(&self) -> &str {
		&self.code
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn display_includes_description_when_present() {
		let bare = ProviderError::server("invalid_client");
		let described = ProviderError::server("invalid_client").with_description("Bad secret");

		assert_eq!(bare.to_string(), "Token request failed with `invalid_client`.");
		assert_eq!(described.to_string(), "Token request failed with `invalid_client`: Bad secret.");
	}

	#[test]
	fn synthetic_constructors_use_stable_codes() {
		assert_eq!(ProviderError::network("connection reset").code(), ProviderError::NETWORK_CODE);
		assert_eq!(ProviderError::cancelled().kind, ProviderErrorKind::Cancelled);
	}
}
