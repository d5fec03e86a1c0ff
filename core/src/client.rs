//! Stateless HTTP request builder and response parser for the key-value API.
//!
//! # Design
//! `KeyValueClient` holds only the parsed endpoint and carries no mutable
//! state between calls. Each operation is split into a `build_*` method that
//! produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`.
//!
//! Addressing differs per operation shape. Single-entry operations put the
//! key in the path (path-segment encoded) and pass the label through as-is,
//! so an empty label reaches the server as `label=` ("no label"). Listing
//! puts both key and label in the query (query encoded) and defaults empty
//! ones to `*`.

use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::types::{CreateOrUpdateKeyValueArgs, KeyValue, KeyValues, ListKeyValuesArgs};

pub const API_VERSION: &str = "1.0";
pub const KV_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.kv+json";
pub const KV_SET_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.kvset+json";
pub const KEY_VAULT_REF_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.keyvaultref+json;charset=utf-8";

/// Synchronous, stateless request builder and response parser.
#[derive(Debug, Clone)]
pub struct KeyValueClient {
    endpoint: Url,
}

impl KeyValueClient {
    /// Parse `endpoint` as the store's base URL. Trailing slashes are ignored.
    pub fn new(endpoint: &str) -> Result<Self, ApiError> {
        let trimmed = endpoint.trim_end_matches('/');
        let endpoint = Url::parse(trimmed).map_err(|e| ApiError::InvalidEndpoint(format!("{endpoint:?}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(ApiError::InvalidEndpoint(format!("{trimmed:?} cannot be a base URL")));
        }
        Ok(Self { endpoint })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    pub fn build_list_key_values(&self, args: &ListKeyValuesArgs) -> Result<HttpRequest, ApiError> {
        let args = args.normalized();
        let mut url = self.kv_url(None)?;
        url.query_pairs_mut()
            .append_pair("key", &args.key)
            .append_pair("label", &args.label)
            .append_pair("api-version", API_VERSION);
        Ok(HttpRequest {
            method: HttpMethod::Get,
            url: url.into(),
            headers: vec![accept(KV_SET_CONTENT_TYPE)],
            body: None,
            timeout: None,
        })
    }

    pub fn build_get_key_value(&self, key: &str, label: &str) -> Result<HttpRequest, ApiError> {
        Ok(HttpRequest {
            method: HttpMethod::Get,
            url: self.entry_url(key, label)?,
            headers: vec![accept(KV_CONTENT_TYPE)],
            body: None,
            timeout: None,
        })
    }

    /// Build the PUT for `args`, applying the secret-reference rewrite first.
    pub fn build_create_or_update_key_value(&self, args: &CreateOrUpdateKeyValueArgs) -> Result<HttpRequest, ApiError> {
        let (args, defaulted) = prepare_write(args.clone());
        let content_type = if defaulted {
            KEY_VAULT_REF_CONTENT_TYPE
        } else {
            KV_CONTENT_TYPE
        };
        let body = serde_json::to_string(&args).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        Ok(HttpRequest {
            method: HttpMethod::Put,
            url: self.entry_url(&args.key, &args.label)?,
            headers: vec![
                ("content-type".to_string(), content_type.to_string()),
                accept(KV_CONTENT_TYPE),
            ],
            body: Some(body),
            timeout: None,
        })
    }

    pub fn build_delete_key_value(&self, key: &str, label: &str) -> Result<HttpRequest, ApiError> {
        Ok(HttpRequest {
            method: HttpMethod::Delete,
            url: self.entry_url(key, label)?,
            headers: Vec::new(),
            body: None,
            timeout: None,
        })
    }

    pub fn parse_list_key_values(&self, response: HttpResponse) -> Result<KeyValues, ApiError> {
        check_status(&response)?;
        decode(&response)
    }

    pub fn parse_get_key_value(&self, response: HttpResponse) -> Result<KeyValue, ApiError> {
        check_status(&response)?;
        decode(&response)
    }

    pub fn parse_create_or_update_key_value(&self, response: HttpResponse) -> Result<KeyValue, ApiError> {
        check_status(&response)?;
        decode(&response)
    }

    /// Delete responses carry no content; only the status matters.
    pub fn parse_delete_key_value(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response)
    }

    /// `{endpoint}/kv` or `{endpoint}/kv/{key}` with `key` as one encoded segment.
    fn kv_url(&self, key: Option<&str>) -> Result<Url, ApiError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| ApiError::InvalidEndpoint(self.endpoint.to_string()))?;
            segments.pop_if_empty().push("kv");
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    fn entry_url(&self, key: &str, label: &str) -> Result<String, ApiError> {
        let mut url = self.kv_url(Some(key))?;
        url.query_pairs_mut()
            .append_pair("label", label)
            .append_pair("api-version", API_VERSION);
        Ok(url.into())
    }
}

/// Wrap a secret identifier into its reference form and default the content
/// type. Plain entries pass through untouched.
///
/// The flag is `true` only when the Key Vault reference content type was
/// filled in here; it selects the request's `Content-Type` header.
pub fn prepare_write(mut args: CreateOrUpdateKeyValueArgs) -> (CreateOrUpdateKeyValueArgs, bool) {
    let mut defaulted = false;
    if args.is_secret {
        args.value = serde_json::json!({ "uri": args.value }).to_string();
        if args.content_type.is_empty() {
            args.content_type = KEY_VAULT_REF_CONTENT_TYPE.to_string();
            defaulted = true;
        }
    }
    (args, defaulted)
}

fn accept(media_type: &str) -> (String, String) {
    ("accept".to_string(), media_type.to_string())
}

/// Map status codes of 400 and above to `ApiError::HttpError`.
fn check_status(response: &HttpResponse) -> Result<(), ApiError> {
    if response.status < 400 {
        return Ok(());
    }
    Err(ApiError::http(response.status, response.body.clone()))
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}
