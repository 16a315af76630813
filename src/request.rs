//! Token request parameters and the diagnostic context that travels with them.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	auth::{AccountId, ClientId, GrantType, ScopeSet},
	error::ValidationError,
	thumbprint::{ThumbprintCalculatable, ThumbprintFields},
};

const CORRELATION_ID_LEN: usize = 32;

/// Diagnostic context correlating logs and telemetry for one caller.
///
/// The context never influences throttling decisions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
	/// Correlation identifier attached to spans, warnings, and telemetry events.
	pub correlation_id: String,
}
impl RequestContext {
	/// Creates a context with a freshly generated correlation identifier.
	pub fn new() -> Self {
		let correlation_id =
			rand::rng().sample_iter(Alphanumeric).take(CORRELATION_ID_LEN).map(char::from).collect();

		Self { correlation_id }
	}

	/// Creates a context reusing a caller-provided correlation identifier.
	pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
		Self { correlation_id: correlation_id.into() }
	}
}
impl Default for RequestContext {
	fn default() -> Self {
		Self::new()
	}
}

/// Parameters of a single token request.
///
/// Required fields are optional at the type level so hosts can assemble parameters
/// incrementally; [`validate`](Self::validate) enforces them before a controller accepts the
/// request.
#[derive(Clone, Debug)]
pub struct RequestParameters {
	/// Authority (token issuer) URL.
	pub authority: Option<Url>,
	/// Client identifier of the requesting application.
	pub client_id: Option<ClientId>,
	/// Normalized target scopes.
	pub scopes: ScopeSet,
	/// Account the token is requested for, when known.
	pub account: Option<AccountId>,
	/// Grant used for the exchange.
	pub grant: GrantType,
	/// Additional request parameters (claims, extra query/body values).
	pub extra_parameters: BTreeMap<String, String>,
	/// Allows advisory (non-strict) throttle records to be overridden.
	pub bypass_advisory_throttling: bool,
	/// Diagnostic context.
	pub context: RequestContext,
}
impl RequestParameters {
	/// Creates empty parameters for the provided grant.
	pub fn new(grant: GrantType) -> Self {
		Self {
			authority: None,
			client_id: None,
			scopes: ScopeSet::default(),
			account: None,
			grant,
			extra_parameters: BTreeMap::new(),
			bypass_advisory_throttling: false,
			context: RequestContext::new(),
		}
	}

	/// Sets the authority URL.
	pub fn with_authority(mut self, authority: Url) -> Self {
		self.authority = Some(authority);

		self
	}

	/// Sets the client identifier.
	pub fn with_client_id(mut self, client_id: ClientId) -> Self {
		self.client_id = Some(client_id);

		self
	}

	/// Sets the target scopes.
	pub fn with_scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Sets the account identifier.
	pub fn with_account(mut self, account: AccountId) -> Self {
		self.account = Some(account);

		self
	}

	/// Adds an extra request parameter (e.g. `claims`).
	pub fn with_extra_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_parameters.insert(key.into(), value.into());

		self
	}

	/// Lets the request proceed past advisory throttle records.
	pub fn with_advisory_bypass(mut self, bypass: bool) -> Self {
		self.bypass_advisory_throttling = bypass;

		self
	}

	/// Replaces the diagnostic context.
	pub fn with_context(mut self, context: RequestContext) -> Self {
		self.context = context;

		self
	}

	/// Checks that the fields required for a token request are present and usable.
	pub fn validate(&self) -> Result<(), ValidationError> {
		let authority =
			self.authority.as_ref().ok_or(ValidationError::MissingField { field: "authority" })?;

		if authority.scheme() != "https" || authority.host_str().is_none() {
			return Err(ValidationError::InvalidAuthority { authority: authority.to_string() });
		}
		if self.client_id.is_none() {
			return Err(ValidationError::MissingField { field: "client_id" });
		}

		Ok(())
	}
}
impl ThumbprintCalculatable for RequestParameters {
	fn thumbprint_fields(&self) -> ThumbprintFields {
		let mut fields = ThumbprintFields::new()
			.with_scopes(&self.scopes)
			.with_field("grant_type", self.grant.as_str());

		if let Some(authority) = &self.authority {
			fields = fields.with_authority(authority);
		}
		if let Some(client_id) = &self.client_id {
			fields = fields.with_field("client_id", client_id.as_ref());
		}
		if let Some(account) = &self.account {
			fields = fields.with_field("account_id", account.as_ref());
		}

		for (key, value) in &self.extra_parameters {
			fields = fields.with_extra(key, value);
		}

		fields
	}

	fn bypasses_advisory_throttling(&self) -> bool {
		self.bypass_advisory_throttling
	}
}
