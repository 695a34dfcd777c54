use std::fmt;

use serde::Deserialize;

/// Opaque short-lived access credential.
///
/// The value is never interpreted. `Debug` is redacted so tokens do not end
/// up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} chars>)", self.0.len())
    }
}

impl From<String> for AccessToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Body returned by the login and renewal endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "token", alias = "accessToken")]
    pub access_token: String,
}
