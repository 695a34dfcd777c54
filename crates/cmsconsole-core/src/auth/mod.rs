//! Authentication module: the session manager and access token storage.
//!
//! This module provides:
//! - `SessionClient`: attaches the access token to calls and renews it,
//!   single-flight, when the server reports it expired
//! - `TokenStore` implementations for the durable token mirror: file,
//!   OS keychain, or memory

pub mod credentials;
pub mod error;
mod renewal;
pub mod session;
pub mod store;
pub mod token;

pub use credentials::KeyringTokenStore;
pub use error::SessionError;
pub use session::{LoginOutcome, SessionClient, SessionEvent, SessionSettings};
pub use store::{FileTokenStore, MemoryTokenStore, StoredToken, TokenStore, TOKEN_KEY};
pub use token::AccessToken;
