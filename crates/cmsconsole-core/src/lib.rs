//! Core library for cmsconsole.
//!
//! The interesting part is [`auth::SessionClient`]: it keeps one valid access
//! token available to any number of concurrent callers, renewing it through
//! the server-managed renewal cookie when a call comes back expired, with at
//! most one renewal in flight.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use cmsconsole_core::{ApiClient, Config, SessionClient};
//!
//! let config = Config::load()?;
//! let session = Arc::new(SessionClient::from_config(&config)?);
//! if !session.is_authenticated() {
//!     session.login("editor", "hunter2").await;
//! }
//! let api = ApiClient::new(Arc::clone(&session), config.base_url.clone());
//! let pages: serde_json::Value = api.get("/pages").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, Body, CookieJar, CredentialsMode, Multipart};
pub use auth::{AccessToken, LoginOutcome, SessionClient, SessionError, SessionEvent, SessionSettings};
pub use config::Config;
