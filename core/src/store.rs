//! Blocking executor for key-value operations.
//!
//! # Design
//! `KeyValueStore` is the capability consumers depend on; `AppConfigClient`
//! is its HTTP implementation. One call is one round trip: build the request
//! with `KeyValueClient`, let the `Authorizer` decorate it, send it through
//! the `Transport`, then parse. Nothing is retried and nothing is cached.
//!
//! The client is immutable after construction. Cloning is cheap, which is
//! also how a per-call deadline is set: `client.clone().with_timeout(..)`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{Authorizer, CliAuthorizer, ClientCredentialsAuthorizer};
use crate::client::KeyValueClient;
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{Transport, UreqTransport};
use crate::types::{CreateOrUpdateKeyValueArgs, Credentials, KeyValue, KeyValues, ListKeyValuesArgs};

pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Operations on App Configuration key-values.
pub trait KeyValueStore {
    /// List entries matching `args`. Empty key or label match anything.
    fn list_key_values(&self, args: &ListKeyValuesArgs) -> Result<KeyValues, ApiError>;

    /// Fetch one entry. An empty `label` addresses the unlabeled entry.
    fn get_key_value(&self, key: &str, label: &str) -> Result<KeyValue, ApiError>;

    /// Create or replace an entry and return the stored state.
    fn create_or_update_key_value(&self, args: &CreateOrUpdateKeyValueArgs) -> Result<KeyValue, ApiError>;

    fn delete_key_value(&self, key: &str, label: &str) -> Result<(), ApiError>;
}

/// HTTP-backed `KeyValueStore`.
#[derive(Clone)]
pub struct AppConfigClient<T = UreqTransport> {
    core: KeyValueClient,
    authorizer: Arc<dyn Authorizer>,
    transport: T,
    timeout: Option<Duration>,
}

impl<T: Transport> AppConfigClient<T> {
    pub fn new(endpoint: &str, authorizer: impl Authorizer + 'static, transport: T) -> Result<Self, ApiError> {
        Ok(Self {
            core: KeyValueClient::new(endpoint)?,
            authorizer: Arc::new(authorizer),
            transport,
            timeout: None,
        })
    }

    /// Client authenticated as a service principal. The resource endpoint
    /// doubles as the store endpoint.
    pub fn from_client_credentials(credentials: &Credentials, transport: T) -> Result<Self, ApiError>
    where
        T: Clone + 'static,
    {
        let authorizer = ClientCredentialsAuthorizer::new(credentials, transport.clone())?;
        Self::new(&credentials.resource_endpoint, authorizer, transport)
    }

    /// Client authenticated as the operator logged in with the Azure CLI.
    pub fn from_cli(endpoint: &str, transport: T) -> Result<Self, ApiError> {
        let authorizer = CliAuthorizer::new(endpoint)?;
        Self::new(endpoint, authorizer, transport)
    }

    /// Apply `timeout` to every request sent by this client value, including
    /// the token request an authorizer makes on its behalf.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &str {
        self.core.endpoint()
    }

    /// The request builder and parser used by this client.
    pub fn core(&self) -> &KeyValueClient {
        &self.core
    }

    fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let request_id = Uuid::new_v4();
        request.timeout = self.timeout;
        request.set_header(CLIENT_REQUEST_ID_HEADER, request_id.to_string());
        self.authorizer.authorize(&mut request)?;

        debug!(method = request.method.as_str(), url = %request.url, %request_id, "sending request");
        let response = self.transport.send(&request)?;
        if response.status >= 400 {
            warn!(
                method = request.method.as_str(),
                url = %request.url,
                %request_id,
                status = response.status,
                "request failed"
            );
        } else {
            debug!(%request_id, status = response.status, "request completed");
        }
        Ok(response)
    }
}

impl<T: Transport> KeyValueStore for AppConfigClient<T> {
    fn list_key_values(&self, args: &ListKeyValuesArgs) -> Result<KeyValues, ApiError> {
        let request = self.core.build_list_key_values(args)?;
        self.core.parse_list_key_values(self.execute(request)?)
    }

    fn get_key_value(&self, key: &str, label: &str) -> Result<KeyValue, ApiError> {
        let request = self.core.build_get_key_value(key, label)?;
        self.core.parse_get_key_value(self.execute(request)?)
    }

    fn create_or_update_key_value(&self, args: &CreateOrUpdateKeyValueArgs) -> Result<KeyValue, ApiError> {
        let request = self.core.build_create_or_update_key_value(args)?;
        self.core.parse_create_or_update_key_value(self.execute(request)?)
    }

    fn delete_key_value(&self, key: &str, label: &str) -> Result<(), ApiError> {
        let request = self.core.build_delete_key_value(key, label)?;
        self.core.parse_delete_key_value(self.execute(request)?)
    }
}

impl<T> std::fmt::Debug for AppConfigClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfigClient")
            .field("endpoint", &self.core.endpoint())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
