use thiserror::Error;

use crate::api::ApiError;

/// Failures surfaced by `SessionClient::authenticated_call` and `renew`.
///
/// An expired access token is not an error here: it is recovered internally
/// with one renewal and one resend.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not authenticated - please log in")]
    Unauthenticated,

    #[error("Session expired: {reason}")]
    SessionExpired { reason: String },

    #[error(transparent)]
    Transport(#[from] ApiError),
}

impl SessionError {
    pub fn expired(reason: impl Into<String>) -> Self {
        SessionError::SessionExpired {
            reason: reason.into(),
        }
    }

    /// True for the errors after which the user has to log in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, SessionError::Unauthenticated | SessionError::SessionExpired { .. })
    }
}
