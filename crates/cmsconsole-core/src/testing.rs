//! Scripted transport double for unit tests.
//!
//! Models a small CMS API: issued tokens stay valid, anything else is
//! reported as expired, and the renewal endpoint (or one other path) can be
//! held shut with a semaphore so concurrent scenarios interleave
//! deterministically.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Semaphore;

use crate::api::{ApiError, ApiRequest, ApiResponse, Body, Transport};

pub(crate) const BASE_URL: &str = "http://cms.test/api";

pub(crate) fn url(path: &str) -> String {
    format!("{}{}", BASE_URL, path)
}

/// Yield until `condition` holds.
pub(crate) async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[derive(Default)]
struct ServerState {
    valid_tokens: HashSet<String>,
    logins: u32,
    renewals: u32,
    refresh_ok: bool,
    refresh_unreachable: bool,
    always_expired: bool,
    logout_fails: bool,
}

pub(crate) struct MockTransport {
    requests: Mutex<Vec<ApiRequest>>,
    server: Mutex<ServerState>,
    refresh_gate: Option<Arc<Semaphore>>,
    held_path: Option<(String, Arc<Semaphore>)>,
    forgotten: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            server: Mutex::new(ServerState {
                refresh_ok: true,
                ..ServerState::default()
            }),
            refresh_gate: None,
            held_path: None,
            forgotten: AtomicUsize::new(0),
        }
    }

    /// Hold requests to `path` until `release_held` is called. The request is
    /// logged before it waits.
    pub fn holding(mut self, path: &str) -> Self {
        self.held_path = Some((path.to_string(), Arc::new(Semaphore::new(0))));
        self
    }

    pub fn release_held(&self) {
        if let Some((_, gate)) = &self.held_path {
            gate.add_permits(1);
        }
    }

    /// How many times the ambient credentials were dropped.
    pub fn forgotten(&self) -> usize {
        self.forgotten.load(Ordering::SeqCst)
    }

    /// Hold every renewal request until `release_refresh` is called.
    pub fn gated(mut self) -> Self {
        self.refresh_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release_refresh(&self) {
        if let Some(gate) = &self.refresh_gate {
            gate.add_permits(1);
        }
    }

    pub fn accept_token(&self, token: &str) {
        self.server.lock().unwrap().valid_tokens.insert(token.to_string());
    }

    pub fn set_refresh_ok(&self, ok: bool) {
        self.server.lock().unwrap().refresh_ok = ok;
    }

    pub fn set_refresh_unreachable(&self, unreachable: bool) {
        self.server.lock().unwrap().refresh_unreachable = unreachable;
    }

    pub fn set_always_expired(&self, expired: bool) {
        self.server.lock().unwrap().always_expired = expired;
    }

    pub fn set_logout_fails(&self, fails: bool) {
        self.server.lock().unwrap().logout_fails = fails;
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        let target = url(path);
        self.requests().into_iter().filter(|r| r.url == target).collect()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    fn login(&self, request: &ApiRequest) -> ApiResponse {
        let password = match &request.body {
            Body::Json(value) => value["password"].as_str().unwrap_or_default().to_string(),
            _ => String::new(),
        };
        if password != "secret" {
            return ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"code": "INVALID_CREDENTIALS", "message": "Invalid username or password"}),
            );
        }
        let mut server = self.server.lock().unwrap();
        server.logins += 1;
        let token = format!("login-{}", server.logins);
        server.valid_tokens.insert(token.clone());
        ApiResponse::json_body(StatusCode::OK, &json!({"access_token": token}))
    }

    fn refresh(&self) -> Result<ApiResponse, ApiError> {
        let mut server = self.server.lock().unwrap();
        if server.refresh_unreachable {
            return Err(ApiError::ConnectionFailed("connection refused".to_string()));
        }
        if !server.refresh_ok {
            return Ok(ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"code": "REFRESH_INVALID", "message": "refresh token revoked"}),
            ));
        }
        server.renewals += 1;
        let token = format!("renewed-{}", server.renewals);
        server.valid_tokens.insert(token.clone());
        Ok(ApiResponse::json_body(StatusCode::OK, &json!({"access_token": token})))
    }

    fn protected(&self, path: &str, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        if path == "/offline" {
            return Err(ApiError::ConnectionFailed("network unreachable".to_string()));
        }
        if path == "/admin/locked" {
            return Ok(ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"code": "UNAUTHORIZED", "message": "Missing permission"}),
            ));
        }
        let Some(token) = request.bearer_token() else {
            return Ok(ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"code": "UNAUTHORIZED", "message": "No token"}),
            ));
        };
        let server = self.server.lock().unwrap();
        if server.always_expired || !server.valid_tokens.contains(token) {
            return Ok(ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({"code": "TOKEN_EXPIRED", "message": "jwt expired"}),
            ));
        }
        if path == "/missing" {
            return Ok(ApiResponse::json_body(StatusCode::NOT_FOUND, &json!({"message": "No such page"})));
        }
        let status = if request.method == reqwest::Method::POST {
            StatusCode::CREATED
        } else if request.method == reqwest::Method::DELETE {
            return Ok(ApiResponse::new(StatusCode::NO_CONTENT, ""));
        } else {
            StatusCode::OK
        };
        let echo = match &request.body {
            Body::Json(value) => value.clone(),
            _ => serde_json::Value::Null,
        };
        Ok(ApiResponse::json_body(
            status,
            &json!({"path": path, "method": request.method.as_str(), "body": echo}),
        ))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let path = request.url.strip_prefix(BASE_URL).unwrap_or(&request.url).to_string();

        if let Some((held, gate)) = &self.held_path {
            if *held == path {
                let permit = gate.acquire().await.map_err(|e| ApiError::ConnectionFailed(e.to_string()))?;
                permit.forget();
            }
        }

        match path.as_str() {
            "/auth/login" => Ok(self.login(&request)),
            "/auth/refresh" => {
                if let Some(gate) = &self.refresh_gate {
                    let permit = gate.acquire().await.map_err(|e| ApiError::ConnectionFailed(e.to_string()))?;
                    permit.forget();
                }
                self.refresh()
            }
            "/auth/logout" => {
                if self.server.lock().unwrap().logout_fails {
                    Err(ApiError::ConnectionFailed("connection reset by peer".to_string()))
                } else {
                    Ok(ApiResponse::new(StatusCode::NO_CONTENT, ""))
                }
            }
            _ => self.protected(&path, &request),
        }
    }

    fn forget_credentials(&self) {
        self.forgotten.fetch_add(1, Ordering::SeqCst);
    }
}
