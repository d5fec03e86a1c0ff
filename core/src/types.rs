//! Domain DTOs for the key-value API.
//!
//! # Design
//! Response types mirror the service schema with every field optional: the
//! server omits what it does not know, and callers decide what is required.
//! Request types are defined independently from the mock-server crate;
//! integration tests catch schema drift between the two.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// A single key-value entry returned by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
}

impl KeyValue {
    /// Extract the secret URI when this entry is a Key Vault reference.
    pub fn secret_uri(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct Reference {
            uri: String,
        }

        let value = self.value.as_deref()?;
        serde_json::from_str::<Reference>(value).ok().map(|r| r.uri)
    }
}

/// One page of entries returned by the list endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValues {
    #[serde(default)]
    pub items: Vec<KeyValue>,
}

/// Filter for listing entries. Empty fields match any key or label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListKeyValuesArgs {
    pub key: String,
    pub label: String,
}

impl ListKeyValuesArgs {
    pub const WILDCARD: &'static str = "*";

    /// Replace empty filter fields with the wildcard.
    pub fn normalized(&self) -> Self {
        let or_wildcard = |s: &str| {
            if s.is_empty() {
                Self::WILDCARD.to_string()
            } else {
                s.to_string()
            }
        };
        Self {
            key: or_wildcard(&self.key),
            label: or_wildcard(&self.label),
        }
    }
}

/// Payload for creating or updating an entry.
///
/// `is_secret` marks the entry as a Key Vault reference. In that case
/// `value` must be a secret identifier such as
/// `https://my-vault.vault.azure.net/secrets/mysecret`; it is wrapped into
/// `{"uri":"..."}` before transmission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateOrUpdateKeyValueArgs {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
    #[serde(default, rename = "isSecret", skip_serializing_if = "std::ops::Not::not")]
    pub is_secret: bool,
}

impl CreateOrUpdateKeyValueArgs {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn secret(mut self) -> Self {
        self.is_secret = true;
        self
    }
}

/// Service-principal credentials for the client-credentials grant.
///
/// `aad_endpoint` overrides the identity provider, which is mostly useful
/// for pointing at a local simulator.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    pub resource_endpoint: String,
    pub aad_endpoint: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("tenant_id", &self.tenant_id)
            .field("resource_endpoint", &self.resource_endpoint)
            .field("aad_endpoint", &self.aad_endpoint)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub const CLIENT_ID_VAR: &'static str = "AZURE_CLIENT_ID";
    pub const CLIENT_SECRET_VAR: &'static str = "AZURE_CLIENT_SECRET";
    pub const TENANT_ID_VAR: &'static str = "AZURE_TENANT_ID";
    pub const ENDPOINT_VAR: &'static str = "APPCONFIG_ENDPOINT";
    pub const AUTHORITY_HOST_VAR: &'static str = "AZURE_AUTHORITY_HOST";

    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ApiError::authorization(format!("environment variable {name} is not set")))
        };
        Ok(Self {
            client_id: required(Self::CLIENT_ID_VAR)?,
            client_secret: required(Self::CLIENT_SECRET_VAR)?,
            tenant_id: required(Self::TENANT_ID_VAR)?,
            resource_endpoint: required(Self::ENDPOINT_VAR)?,
            aad_endpoint: lookup(Self::AUTHORITY_HOST_VAR).filter(|v| !v.is_empty()),
        })
    }
}
