//! Typed client for the CMS REST API.
//!
//! `ApiClient` is what list views, forms and upload widgets use. Every call
//! goes through `SessionClient::authenticated_call`, so token renewal is
//! invisible here. Non-2xx responses are turned into `ApiError`s; nothing is
//! retried at this level.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::auth::SessionClient;
use crate::config::join_url;

use super::request::{ApiRequest, Multipart};
use super::response::ApiResponse;

/// API client for the CMS.
/// Clone is cheap - the session is shared behind an `Arc`.
#[derive(Clone)]
pub struct ApiClient {
    session: Arc<SessionClient>,
    base_url: String,
}

impl ApiClient {
    pub fn new(session: Arc<SessionClient>, base_url: impl Into<String>) -> Self {
        Self {
            session,
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Send a request and fail on any non-2xx status.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let method = request.method.clone();
        let url = request.url.clone();
        let response = self
            .session
            .authenticated_call(request)
            .await
            .with_context(|| format!("{} {} failed", method, url))?;
        debug!(%method, url = %url, status = response.status.as_u16(), "API call completed");
        Ok(response.error_for_status()?)
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let url = request.url.clone();
        let response = self.execute(request).await?;
        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute_json(ApiRequest::get(self.url(path))).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.execute_json(ApiRequest::post(self.url(path)).json(body)?).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.execute_json(ApiRequest::put(self.url(path)).json(body)?).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.execute_json(ApiRequest::patch(self.url(path)).json(body)?).await
    }

    /// DELETE a resource; the response body, if any, is ignored.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute(ApiRequest::delete(self.url(path))).await?;
        Ok(())
    }

    /// POST a multipart form (file uploads). The form is sent as-is.
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, form: Multipart) -> Result<T> {
        self.execute_json(ApiRequest::post(self.url(path)).multipart(form)).await
    }

    // ===== Resource helpers =====

    /// GET `/{resource}`
    pub async fn list<T: DeserializeOwned>(&self, resource: &str) -> Result<Vec<T>> {
        self.get(resource).await
    }

    /// GET `/{resource}/{id}`
    pub async fn fetch<T: DeserializeOwned>(&self, resource: &str, id: &str) -> Result<T> {
        self.get(&resource_path(resource, id)).await
    }

    /// POST `/{resource}`
    pub async fn create<T: DeserializeOwned, B: Serialize + ?Sized>(&self, resource: &str, body: &B) -> Result<T> {
        self.post(resource, body).await
    }

    /// PUT `/{resource}/{id}`
    pub async fn update<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        resource: &str,
        id: &str,
        body: &B,
    ) -> Result<T> {
        self.put(&resource_path(resource, id), body).await
    }

    /// DELETE `/{resource}/{id}`
    pub async fn remove(&self, resource: &str, id: &str) -> Result<()> {
        self.delete(&resource_path(resource, id)).await
    }
}

fn resource_path(resource: &str, id: &str) -> String {
    format!("{}/{}", resource.trim_end_matches('/'), id)
}
