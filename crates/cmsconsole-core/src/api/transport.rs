//! HTTP transport abstraction.
//!
//! The session layer only ever talks to a `Transport`. The production
//! implementation is `ReqwestTransport`; tests plug in a scripted double.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderValue};
use reqwest::{multipart, Client};
use tracing::{debug, warn};

use super::cookies::CookieJar;
use super::request::{ApiRequest, Body, CredentialsMode, Multipart, PartContent};
use super::response::ApiResponse;
use super::ApiError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request and return the fully-read response. Non-2xx statuses
    /// are responses, not errors; `Err` means no response was obtained.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;

    /// Drop the ambient credentials (cookies) sent with `CredentialsMode::Include`.
    fn forget_credentials(&self) {}
}

/// reqwest-backed transport.
///
/// Requests made with `CredentialsMode::Include` go through a client that owns
/// the cookie jar, which is where the server keeps the renewal credential.
/// The jar is saved after each of those exchanges. Everything else goes
/// through a client with no cookie store at all.
/// Clone is cheap - both clients and the jar are reference counted.
#[derive(Clone)]
pub struct ReqwestTransport {
    with_credentials: Client,
    without_credentials: Client,
    jar: CookieJar,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, jar: CookieJar) -> Result<Self, ApiError> {
        let with_credentials = Client::builder()
            .timeout(timeout)
            .cookie_provider(jar.provider())
            .build()?;
        let without_credentials = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            with_credentials,
            without_credentials,
            jar,
        })
    }

    fn client_for(&self, mode: CredentialsMode) -> &Client {
        match mode {
            CredentialsMode::Include => &self.with_credentials,
            CredentialsMode::Omit => &self.without_credentials,
        }
    }

    fn build_form(form: Multipart) -> Result<multipart::Form, ApiError> {
        let mut out = multipart::Form::new();
        for part in form.parts {
            out = match part.content {
                PartContent::Text(value) => out.text(part.name, value),
                PartContent::File {
                    filename,
                    content_type,
                    data,
                } => {
                    let mut file = multipart::Part::bytes(data.to_vec()).file_name(filename);
                    if let Some(ct) = content_type {
                        file = file.mime_str(&ct)?;
                    }
                    out.part(part.name, file)
                }
            };
        }
        Ok(out)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let ApiRequest {
            method,
            url,
            mut headers,
            body,
            credentials,
        } = request;

        debug!(%method, url = %url, body = body.kind(), ?credentials, "Sending request");

        let has_content_type = headers.contains_key(header::CONTENT_TYPE);
        let mut builder = self.client_for(credentials).request(method, &url);

        builder = match body {
            Body::Empty => builder.headers(headers),
            // reqwest only sets application/json when no content type is present
            Body::Json(value) => builder.headers(headers).json(&value),
            Body::Text(text) => {
                if !has_content_type {
                    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
                }
                builder.headers(headers).body(text)
            }
            Body::Bytes { content_type, data } => {
                if let (false, Some(ct)) = (has_content_type, content_type) {
                    let value = HeaderValue::from_str(&ct)
                        .map_err(|_| ApiError::InvalidRequest(format!("Invalid content type: {}", ct)))?;
                    headers.insert(header::CONTENT_TYPE, value);
                }
                builder.headers(headers).body(data)
            }
            Body::Multipart(form) => {
                // The boundary is generated here; a caller-supplied content type would not carry it
                headers.remove(header::CONTENT_TYPE);
                builder.headers(headers).multipart(Self::build_form(form)?)
            }
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if credentials == CredentialsMode::Include {
            if let Err(e) = self.jar.save() {
                warn!(error = %e, "Failed to save cookie jar");
            }
        }

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Received response");

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    fn forget_credentials(&self) {
        if let Err(e) = self.jar.clear() {
            warn!(error = %e, "Failed to clear cookie jar");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::cookies::COOKIE_FILE;

    #[test]
    fn test_build_form_accepts_text_and_files() {
        let form = Multipart::new()
            .text("alt", "Company logo")
            .file("file", "logo.png", Some("image/png".to_string()), vec![1u8, 2, 3]);
        assert!(ReqwestTransport::build_form(form).is_ok());
    }

    #[test]
    fn test_build_form_rejects_bad_mime() {
        let form = Multipart::new().file("file", "x.bin", Some("not a mime".to_string()), vec![0u8]);
        assert!(ReqwestTransport::build_form(form).is_err());
    }

    #[test]
    fn test_forget_credentials_clears_persisted_jar() {
        let dir = tempfile::tempdir().unwrap();
        let jar = CookieJar::open(dir.path()).unwrap();
        jar.save().unwrap();
        let transport = ReqwestTransport::new(Duration::from_secs(5), jar).unwrap();
        assert!(dir.path().join(COOKIE_FILE).exists());

        transport.forget_credentials();

        assert!(!dir.path().join(COOKIE_FILE).exists());
        assert_eq!(transport.jar.path(), Some(dir.path().join(COOKIE_FILE).as_path()));
    }
}
