//! In-process App Configuration simulator.
//!
//! Serves the key-value endpoints (`/kv`, `/kv/{key}`) and a client-credentials
//! token endpoint (`/{tenant}/oauth2/token`) so the client can be exercised
//! over real HTTP without a cloud account. Only bearer tokens issued by the
//! token endpoint are accepted on the key-value routes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const KV_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.kv+json";
pub const KV_SET_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.kvset+json";
pub const KEY_VAULT_REF_CONTENT_TYPE: &str = "application/vnd.microsoft.appconfig.keyvaultref+json;charset=utf-8";
pub const TOKEN_LIFETIME_SECS: u64 = 3599;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyValue {
    pub etag: String,
    pub key: String,
    pub label: Option<String>,
    pub content_type: Option<String>,
    pub value: Option<String>,
    pub last_modified: String,
    pub locked: bool,
    pub tags: HashMap<String, String>,
}

/// Body accepted by `PUT /kv/{key}`. Unknown fields such as `isSecret` are
/// ignored, as the real service does.
#[derive(Deserialize)]
pub struct PutKeyValue {
    pub content_type: Option<String>,
    pub value: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Serialize)]
pub struct KeyValueSet {
    pub items: Vec<KeyValue>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub key: Option<String>,
    pub label: Option<String>,
    #[serde(rename = "api-version")]
    pub api_version: Option<String>,
}

#[derive(Deserialize)]
pub struct EntryQuery {
    pub label: Option<String>,
    #[serde(rename = "api-version")]
    pub api_version: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: String,
    pub resource: String,
}

#[derive(Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: String,
    pub resource: String,
}

/// Entries keyed by `(key, label)`; an empty label is the unlabeled entry.
/// Each client id holds at most one live token.
#[derive(Default)]
pub struct Store {
    pub entries: BTreeMap<(String, String), KeyValue>,
    pub tokens: HashMap<String, String>,
}

pub type Db = Arc<RwLock<Store>>;

pub fn app() -> Router {
    app_with_state(Db::default())
}

/// Router over an existing store, so tests can seed or inspect it.
pub fn app_with_state(db: Db) -> Router {
    Router::new()
        .route("/kv", get(list_key_values))
        .route(
            "/kv/{key}",
            get(get_key_value).put(put_key_value).delete(delete_key_value),
        )
        .route("/{tenant}/oauth2/token", post(issue_token))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// `*` matches anything, a trailing `*` matches a prefix, otherwise exact.
pub fn matches_filter(filter: &str, candidate: &str) -> bool {
    match filter.strip_suffix('*') {
        Some(prefix) => candidate.starts_with(prefix),
        None => filter == candidate,
    }
}

fn problem(status: StatusCode, detail: impl Into<String>) -> Response {
    let body = serde_json::json!({
        "type": "https://azconfig.io/errors/mock",
        "title": status.canonical_reason().unwrap_or_default(),
        "status": status.as_u16(),
        "detail": detail.into(),
    });
    (status, Json(body)).into_response()
}

async fn authorize(db: &Db, headers: &HeaderMap) -> Result<(), Response> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let known = match token {
        Some(token) => db.read().await.tokens.values().any(|issued| issued == token),
        None => false,
    };
    if known {
        Ok(())
    } else {
        Err(problem(StatusCode::UNAUTHORIZED, "missing or unknown bearer token"))
    }
}

fn require_api_version(api_version: Option<&str>) -> Result<(), Response> {
    match api_version {
        Some("1.0") => Ok(()),
        Some(other) => Err(problem(
            StatusCode::BAD_REQUEST,
            format!("unsupported api-version {other}"),
        )),
        None => Err(problem(StatusCode::BAD_REQUEST, "api-version is required")),
    }
}

fn entry_response(status: StatusCode, kv: KeyValue) -> Response {
    let etag = format!("\"{}\"", kv.etag);
    (
        status,
        [
            (header::CONTENT_TYPE, KV_CONTENT_TYPE.to_string()),
            (header::ETAG, etag),
        ],
        Json(kv),
    )
        .into_response()
}

async fn list_key_values(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Response {
    if let Err(resp) = authorize(&db, &headers).await {
        return resp;
    }
    if let Err(resp) = require_api_version(query.api_version.as_deref()) {
        return resp;
    }
    let key_filter = query.key.unwrap_or_else(|| "*".to_string());
    let label_filter = query.label.unwrap_or_else(|| "*".to_string());

    let store = db.read().await;
    let items = store
        .entries
        .iter()
        .filter(|((key, label), _)| matches_filter(&key_filter, key) && matches_filter(&label_filter, label))
        .map(|(_, kv)| kv.clone())
        .collect();
    tracing::debug!(key = %key_filter, label = %label_filter, "listed key-values");
    (
        [(header::CONTENT_TYPE, KV_SET_CONTENT_TYPE)],
        Json(KeyValueSet { items }),
    )
        .into_response()
}

async fn get_key_value(
    State(db): State<Db>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Query(query): Query<EntryQuery>,
) -> Response {
    if let Err(resp) = authorize(&db, &headers).await {
        return resp;
    }
    if let Err(resp) = require_api_version(query.api_version.as_deref()) {
        return resp;
    }
    let label = query.label.unwrap_or_default();
    let store = db.read().await;
    match store.entries.get(&(key.clone(), label.clone())) {
        Some(kv) => entry_response(StatusCode::OK, kv.clone()),
        None => problem(
            StatusCode::NOT_FOUND,
            format!("key-value {key:?} with label {label:?} not found"),
        ),
    }
}

async fn put_key_value(
    State(db): State<Db>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Query(query): Query<EntryQuery>,
    body: String,
) -> Response {
    if let Err(resp) = authorize(&db, &headers).await {
        return resp;
    }
    if let Err(resp) = require_api_version(query.api_version.as_deref()) {
        return resp;
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != KV_CONTENT_TYPE && content_type != KEY_VAULT_REF_CONTENT_TYPE {
        return problem(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("unsupported content type {content_type:?}"),
        );
    }
    let input: PutKeyValue = match serde_json::from_str(&body) {
        Ok(input) => input,
        Err(e) => return problem(StatusCode::BAD_REQUEST, format!("invalid body: {e}")),
    };

    let label = query.label.unwrap_or_default();
    let mut store = db.write().await;
    let id = (key.clone(), label.clone());
    if store.entries.get(&id).is_some_and(|kv| kv.locked) {
        return problem(StatusCode::CONFLICT, format!("key-value {key:?} is locked"));
    }
    let kv = KeyValue {
        etag: Uuid::new_v4().simple().to_string(),
        key,
        label: (!label.is_empty()).then_some(label),
        content_type: input.content_type,
        value: input.value,
        last_modified: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        locked: false,
        tags: input.tags,
    };
    store.entries.insert(id, kv.clone());
    tracing::debug!(key = %kv.key, label = ?kv.label, "stored key-value");
    entry_response(StatusCode::OK, kv)
}

async fn delete_key_value(
    State(db): State<Db>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Query(query): Query<EntryQuery>,
) -> Response {
    if let Err(resp) = authorize(&db, &headers).await {
        return resp;
    }
    if let Err(resp) = require_api_version(query.api_version.as_deref()) {
        return resp;
    }
    let label = query.label.unwrap_or_default();
    let mut store = db.write().await;
    if store.entries.get(&(key.clone(), label.clone())).is_some_and(|kv| kv.locked) {
        return problem(StatusCode::CONFLICT, format!("key-value {key:?} is locked"));
    }
    match store.entries.remove(&(key, label)) {
        Some(kv) => entry_response(StatusCode::OK, kv),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn issue_token(
    State(db): State<Db>,
    Path(tenant): Path<String>,
    Form(input): Form<TokenRequest>,
) -> Response {
    if input.grant_type != "client_credentials" {
        return problem(StatusCode::BAD_REQUEST, "unsupported_grant_type");
    }
    if input.client_id.is_empty() || input.client_secret.is_empty() {
        return problem(StatusCode::UNAUTHORIZED, "invalid_client");
    }
    let access_token = format!("mock-{}", Uuid::new_v4().simple());
    let replaced = db
        .write()
        .await
        .tokens
        .insert(input.client_id.clone(), access_token.clone())
        .is_some();
    tracing::debug!(%tenant, client_id = %input.client_id, replaced, "issued token");
    Json(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: TOKEN_LIFETIME_SECS.to_string(),
        resource: input.resource,
    })
    .into_response()
}
