//! Authorizers that attach credentials to outgoing requests.
//!
//! # Design
//! The executor never talks to an identity provider itself. It hands every
//! request to an `Authorizer`, which adds whatever header proves the
//! caller's identity. Token-based authorizers keep the last token and reuse
//! it until shortly before it expires.

use std::process::Command;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::debug;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest};
use crate::transport::Transport;
use crate::types::Credentials;

pub const DEFAULT_AAD_ENDPOINT: &str = "https://login.microsoftonline.com/";

/// Tokens are refreshed this long before the provider says they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

/// Decorates a request with authorization.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, request: &mut HttpRequest) -> Result<(), ApiError>;
}

/// Leaves requests untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuthorizer;

impl Authorizer for NullAuthorizer {
    fn authorize(&self, _request: &mut HttpRequest) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Sends a fixed bearer token.
#[derive(Clone)]
pub struct BearerTokenAuthorizer {
    token: String,
}

impl BearerTokenAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl std::fmt::Debug for BearerTokenAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenAuthorizer").finish_non_exhaustive()
    }
}

impl Authorizer for BearerTokenAuthorizer {
    fn authorize(&self, request: &mut HttpRequest) -> Result<(), ApiError> {
        set_bearer(request, &self.token);
        Ok(())
    }
}

/// Service-principal authorizer using the OAuth2 client-credentials grant.
pub struct ClientCredentialsAuthorizer<T> {
    token_url: String,
    client_id: String,
    client_secret: String,
    resource: String,
    transport: T,
    cache: TokenCache,
}

impl<T: Transport> ClientCredentialsAuthorizer<T> {
    /// Validate `credentials` and prepare the token request. No network
    /// traffic happens until the first request is authorized.
    pub fn new(credentials: &Credentials, transport: T) -> Result<Self, ApiError> {
        let required = [
            ("client_id", &credentials.client_id),
            ("client_secret", &credentials.client_secret),
            ("tenant_id", &credentials.tenant_id),
            ("resource", &credentials.resource_endpoint),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(ApiError::authorization(format!("parameter '{name}' cannot be empty")));
        }

        let aad = credentials.aad_endpoint.as_deref().unwrap_or(DEFAULT_AAD_ENDPOINT);
        let token_url = format!("{}/{}/oauth2/token", aad.trim_end_matches('/'), credentials.tenant_id);
        url::Url::parse(&token_url).map_err(|e| ApiError::authorization(format!("invalid token endpoint {token_url:?}: {e}")))?;

        Ok(Self {
            token_url,
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
            resource: credentials.resource_endpoint.clone(),
            transport,
            cache: TokenCache::default(),
        })
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// The token round trip runs under the same deadline as the request it
    /// authorizes.
    fn fetch_token(&self, timeout: Option<Duration>) -> Result<FreshToken, ApiError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("resource", &self.resource)
            .finish();
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.token_url.clone(),
            headers: vec![(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(body),
            timeout,
        };

        debug!(token_url = %self.token_url, client_id = %self.client_id, "requesting access token");
        let response = self.transport.send(&request)?;
        if response.status >= 400 {
            return Err(ApiError::authorization(format!(
                "token request failed with status {}: {}",
                response.status, response.body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| ApiError::authorization(format!("malformed token response: {e}")))?;
        Ok(FreshToken {
            access_token: token.access_token,
            lifetime: token.expires_in.map(|n| Duration::from_secs(n.as_secs())),
        })
    }
}

impl<T> std::fmt::Debug for ClientCredentialsAuthorizer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsAuthorizer")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Authorizer for ClientCredentialsAuthorizer<T> {
    fn authorize(&self, request: &mut HttpRequest) -> Result<(), ApiError> {
        let timeout = request.timeout;
        let token = self.cache.get_or_fetch(|| self.fetch_token(timeout))?;
        set_bearer(request, &token);
        Ok(())
    }
}

/// Authorizer that borrows the identity of the operator logged in with the
/// Azure CLI (`az login`).
#[derive(Debug)]
pub struct CliAuthorizer {
    resource: String,
    program: String,
    cache: TokenCache,
}

impl CliAuthorizer {
    pub fn new(resource: &str) -> Result<Self, ApiError> {
        Self::with_program(resource, "az")
    }

    /// Like `new`, but runs `program` instead of `az`.
    pub fn with_program(resource: &str, program: &str) -> Result<Self, ApiError> {
        validate_resource(resource)?;
        Ok(Self {
            resource: resource.to_string(),
            program: program.to_string(),
            cache: TokenCache::default(),
        })
    }

    fn fetch_token(&self) -> Result<FreshToken, ApiError> {
        debug!(resource = %self.resource, program = %self.program, "requesting access token from CLI");
        let output = Command::new(&self.program)
            .args(["account", "get-access-token", "--resource", self.resource.as_str(), "--output", "json"])
            .output()
            .map_err(|e| ApiError::authorization(format!("running {}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(ApiError::authorization(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token: CliTokenResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| ApiError::authorization(format!("malformed CLI token: {e}")))?;
        let lifetime = token.expires_on.map(|n| {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            Duration::from_secs(n.as_secs().saturating_sub(now))
        });
        Ok(FreshToken {
            access_token: token.access_token,
            lifetime,
        })
    }
}

impl Authorizer for CliAuthorizer {
    fn authorize(&self, request: &mut HttpRequest) -> Result<(), ApiError> {
        let token = self.cache.get_or_fetch(|| self.fetch_token())?;
        set_bearer(request, &token);
        Ok(())
    }
}

/// Resources handed to the CLI may only contain alphanumerics, `.`, `:`,
/// `-` and `/`.
fn validate_resource(resource: &str) -> Result<(), ApiError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '/');
    if resource.is_empty() || !resource.chars().all(allowed) {
        return Err(ApiError::authorization(format!(
            "Resource {resource} is not in expected format. Only alphanumeric characters, [dot], [colon], [hyphen], and [forward slash] are allowed."
        )));
    }
    Ok(())
}

fn set_bearer(request: &mut HttpRequest, token: &str) {
    request.set_header("authorization", format!("Bearer {token}"));
}

struct FreshToken {
    access_token: String,
    /// `None` when the provider did not say; the token is then used once.
    lifetime: Option<Duration>,
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Single-slot token store shared by the token-based authorizers.
#[derive(Default)]
struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCache")
    }
}

impl TokenCache {
    /// Return the cached token, or fetch a new one when it is missing or due
    /// for refresh. The lock is held across the fetch so concurrent callers
    /// wait for one token instead of each requesting their own.
    fn get_or_fetch(&self, fetch: impl FnOnce() -> Result<FreshToken, ApiError>) -> Result<String, ApiError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(cached) = slot.as_ref() {
            if now < cached.refresh_at {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = fetch()?;
        match fresh.lifetime {
            Some(lifetime) if lifetime > REFRESH_MARGIN => {
                *slot = Some(CachedToken {
                    access_token: fresh.access_token.clone(),
                    refresh_at: now + (lifetime - REFRESH_MARGIN),
                });
            }
            _ => *slot = None,
        }
        Ok(fresh.access_token)
    }
}

/// Identity providers send numeric fields either as JSON numbers or as
/// strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

impl Seconds {
    fn as_secs(&self) -> u64 {
        match self {
            Seconds::Number(n) => *n,
            Seconds::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Seconds>,
}

#[derive(Deserialize)]
struct CliTokenResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(default)]
    expires_on: Option<Seconds>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::http::HttpResponse;

    fn credentials() -> Credentials {
        Credentials {
            client_id: "fakeID".to_string(),
            client_secret: "fakeSecret".to_string(),
            tenant_id: "fakeTenant".to_string(),
            resource_endpoint: "https://fake.azconfig.io".to_string(),
            aad_endpoint: Some("http://127.0.0.1:9999/".to_string()),
        }
    }

    fn request() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "https://fake.azconfig.io/kv".to_string(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    fn token_transport(
        calls: Arc<AtomicUsize>,
        body: &'static str,
    ) -> impl Fn(&HttpRequest) -> Result<HttpResponse, ApiError> + Send + Sync {
        move |req: &HttpRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.method, HttpMethod::Post);
            assert_eq!(req.url, "http://127.0.0.1:9999/fakeTenant/oauth2/token");
            let form = req.body.as_deref().unwrap();
            assert!(form.contains("grant_type=client_credentials"));
            assert!(form.contains("resource=https%3A%2F%2Ffake.azconfig.io"));
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: body.to_string(),
            })
        }
    }

    #[test]
    fn null_authorizer_adds_nothing() {
        let mut req = request();
        NullAuthorizer.authorize(&mut req).unwrap();
        assert!(req.headers.is_empty());
    }

    #[test]
    fn bearer_authorizer_sets_header() {
        let mut req = request();
        BearerTokenAuthorizer::new("abc").authorize(&mut req).unwrap();
        assert_eq!(req.header("Authorization"), Some("Bearer abc"));
    }

    #[test]
    fn client_credentials_reject_empty_resource() {
        let mut creds = credentials();
        creds.resource_endpoint = String::new();
        let err = ClientCredentialsAuthorizer::new(&creds, token_transport(Arc::default(), "{}")).unwrap_err();
        assert_eq!(err.to_string(), "authorization failed: parameter 'resource' cannot be empty");
    }

    #[test]
    fn client_credentials_default_to_public_authority() {
        let mut creds = credentials();
        creds.aad_endpoint = None;
        let auth = ClientCredentialsAuthorizer::new(&creds, token_transport(Arc::default(), "{}")).unwrap();
        assert_eq!(auth.token_url(), "https://login.microsoftonline.com/fakeTenant/oauth2/token");
    }

    #[test]
    fn client_credentials_reuse_token_until_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = token_transport(calls.clone(), r#"{"access_token":"t1","token_type":"Bearer","expires_in":"3599"}"#);
        let auth = ClientCredentialsAuthorizer::new(&credentials(), transport).unwrap();

        let mut first = request();
        auth.authorize(&mut first).unwrap();
        let mut second = request();
        auth.authorize(&mut second).unwrap();

        assert_eq!(first.header("authorization"), Some("Bearer t1"));
        assert_eq!(second.header("authorization"), Some("Bearer t1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_credentials_token_request_inherits_timeout() {
        let seen = Arc::new(Mutex::new(None));
        let recorded = seen.clone();
        let transport = move |req: &HttpRequest| -> Result<HttpResponse, ApiError> {
            *recorded.lock().unwrap() = Some(req.timeout);
            Ok(HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: r#"{"access_token":"t1","expires_in":3599}"#.to_string(),
            })
        };
        let auth = ClientCredentialsAuthorizer::new(&credentials(), transport).unwrap();

        let mut req = request();
        req.timeout = Some(Duration::from_secs(3));
        auth.authorize(&mut req).unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(Some(Duration::from_secs(3))));
        assert_eq!(req.header("authorization"), Some("Bearer t1"));
    }

    #[test]
    fn client_credentials_refetch_short_lived_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = token_transport(calls.clone(), r#"{"access_token":"t1","expires_in":60}"#);
        let auth = ClientCredentialsAuthorizer::new(&credentials(), transport).unwrap();

        auth.authorize(&mut request()).unwrap();
        auth.authorize(&mut request()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn client_credentials_surface_provider_errors() {
        let transport = |_: &HttpRequest| -> Result<HttpResponse, ApiError> {
            Ok(HttpResponse {
                status: 401,
                headers: Vec::new(),
                body: "invalid_client".to_string(),
            })
        };
        let auth = ClientCredentialsAuthorizer::new(&credentials(), transport).unwrap();
        let err = auth.authorize(&mut request()).unwrap_err();
        assert!(matches!(err, ApiError::Authorization(ref msg) if msg.contains("401") && msg.contains("invalid_client")));
    }

    #[test]
    fn client_credentials_reject_malformed_token() {
        let auth = ClientCredentialsAuthorizer::new(&credentials(), token_transport(Arc::default(), "{}")).unwrap();
        let err = auth.authorize(&mut request()).unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
    }

    #[test]
    fn cli_rejects_malformed_resource() {
        let err = CliAuthorizer::new("").unwrap_err();
        assert_eq!(
            err.to_string(),
            "authorization failed: Resource  is not in expected format. Only alphanumeric characters, [dot], [colon], [hyphen], and [forward slash] are allowed."
        );
        assert!(CliAuthorizer::new("https://my-config.azconfig.io?x=1").is_err());
        assert!(CliAuthorizer::new("https://my-config.azconfig.io").is_ok());
    }

    #[test]
    fn cli_reports_missing_program() {
        let auth = CliAuthorizer::with_program("https://my-config.azconfig.io", "definitely-not-az-cli").unwrap();
        let err = auth.authorize(&mut request()).unwrap_err();
        assert!(matches!(err, ApiError::Authorization(ref msg) if msg.contains("definitely-not-az-cli")));
    }

    #[test]
    fn seconds_accept_numbers_and_strings() {
        let n: Seconds = serde_json::from_str("42").unwrap();
        let s: Seconds = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(n.as_secs(), 42);
        assert_eq!(s.as_secs(), 42);
    }
}
