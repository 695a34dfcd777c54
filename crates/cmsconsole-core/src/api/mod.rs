//! HTTP layer: request/response types, the transport seam and the typed
//! CRUD client.
//!
//! - `Transport` / `ReqwestTransport`: issue one request, return the full response
//! - `CookieJar`: renewal credential cookies, optionally persisted
//! - `ApiRequest`, `Body`, `Multipart`: cloneable request description
//! - `ApiClient`: typed helpers used by screens, built on `SessionClient`

pub mod client;
pub mod cookies;
pub mod error;
pub mod request;
pub mod response;
pub mod transport;

pub use client::ApiClient;
pub use cookies::CookieJar;
pub use error::ApiError;
pub use request::{ApiRequest, Body, CredentialsMode, Multipart, Part, PartContent};
pub use response::ApiResponse;
pub use transport::{ReqwestTransport, Transport};
