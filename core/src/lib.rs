//! Synchronous client for the App Configuration key-value API.
//!
//! # Overview
//! `KeyValueClient` builds `HttpRequest` values and parses `HttpResponse`
//! values without touching the network (host-does-IO pattern).
//! `AppConfigClient` wires that core to an `Authorizer` and a `Transport` and
//! exposes the four key-value operations through the `KeyValueStore` trait.
//!
//! # Design
//! - `KeyValueClient` is stateless; it holds only the parsed endpoint.
//! - Each operation is split into `build_*` (produces request) and `parse_*`
//!   (consumes response), so the I/O boundary stays explicit.
//! - Authorization and transport are traits, so tests substitute fakes
//!   without an identity-provider round trip.
//! - `KeyValueStore` is the seam consumers mock in their own test suites.

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod store;
pub mod transport;
pub mod types;

pub use auth::{Authorizer, BearerTokenAuthorizer, ClientCredentialsAuthorizer, CliAuthorizer, NullAuthorizer};
pub use client::KeyValueClient;
pub use error::ApiError;
pub use crate::http::{HttpMethod, HttpRequest, HttpResponse};
pub use store::{AppConfigClient, KeyValueStore};
pub use transport::{Transport, UreqTransport};
pub use types::{CreateOrUpdateKeyValueArgs, Credentials, KeyValue, KeyValues, ListKeyValuesArgs};
