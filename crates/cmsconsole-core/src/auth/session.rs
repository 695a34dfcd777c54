//! Session manager: owns the access token and keeps it usable.
//!
//! `SessionClient` attaches the current access token to every call, and when
//! the server reports that token as expired it renews it once, shared by
//! every caller that hit the expiry at the same time, and resends the
//! original request exactly once.
//!
//! Login and logout bump the session epoch. A renewal that settles under an
//! older epoch than the one it started in never writes the credential back,
//! so an explicit logout cannot be undone by a renewal that was already in
//! flight. The durable store is written outside the state lock, and the
//! epoch orders those writes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{ApiRequest, ApiResponse, CookieJar, CredentialsMode, ReqwestTransport, Transport};
use crate::config::{Config, TokenStoreKind};

use super::credentials::KeyringTokenStore;
use super::error::SessionError;
use super::renewal::{RenewalOutcome, RenewalState, Role};
use super::store::{FileTokenStore, MemoryTokenStore, TokenStore};
use super::token::{AccessToken, TokenResponse};

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

const RENEWAL_ABANDONED: &str = "renewal was abandoned before it completed";
const SESSION_ENDED: &str = "session ended while the token was being renewed";

// ============================================================================
// Settings, events, outcomes
// ============================================================================

/// Resolved endpoint URLs and the expiry marker.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub login_url: String,
    pub refresh_url: String,
    pub logout_url: String,
    pub error_code_field: String,
    pub expired_code: String,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            login_url: config.url(&config.endpoints.login),
            refresh_url: config.url(&config.endpoints.refresh),
            logout_url: config.url(&config.endpoints.logout),
            error_code_field: config.error_code_field.clone(),
            expired_code: config.expired_code.clone(),
        }
    }

    /// Default endpoints under `base_url`.
    pub fn for_base_url(base_url: &str) -> Self {
        let config = Config {
            base_url: base_url.to_string(),
            ..Config::default()
        };
        Self::from_config(&config)
    }
}

/// Notifications for the rest of the application.
///
/// `SessionExpired` is the cue to send the user back to the login surface. It
/// is emitted once per failed renewal, however many callers were waiting on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    LoggedOut,
    Renewed,
    SessionExpired,
}

/// Result of `SessionClient::login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginOutcome {
    pub success: bool,
    pub token: Option<String>,
    pub error: Option<String>,
}

impl LoginOutcome {
    fn success(token: String) -> Self {
        Self {
            success: true,
            token: Some(token),
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

// ============================================================================
// SessionClient
// ============================================================================

struct SessionState {
    access: Option<AccessToken>,
    /// Set when the session was explicitly cleared. The durable store is not
    /// consulted again until a new token is set, even if clearing it failed.
    ended: bool,
    epoch: u64,
    renewal: RenewalState,
}

pub struct SessionClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    /// Epoch of the last write to `store`.
    persisted_epoch: Mutex<u64>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn TokenStore>,
        settings: SessionSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            store,
            settings,
            state: Mutex::new(SessionState {
                access: None,
                ended: false,
                epoch: 0,
                renewal: RenewalState::default(),
            }),
            persisted_epoch: Mutex::new(0),
            events,
        }
    }

    /// Build the production client: reqwest transport plus the token store
    /// selected in the config. Unless the store is in-memory, the renewal
    /// cookie is kept in the cache directory next to it.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let (store, jar): (Arc<dyn TokenStore>, CookieJar) = match config.token_store {
            TokenStoreKind::File => {
                let dir = config.cache_dir()?;
                (Arc::new(FileTokenStore::new(&dir)), CookieJar::open(&dir)?)
            }
            TokenStoreKind::Keyring => (Arc::new(KeyringTokenStore::new()), CookieJar::open(&config.cache_dir()?)?),
            TokenStoreKind::Memory => (Arc::new(MemoryTokenStore::new()), CookieJar::in_memory()),
        };
        let transport = ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs), jar)?;
        Ok(Self::new(
            Arc::new(transport),
            store,
            SessionSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// When the durable copy of the token was written, if known.
    pub fn token_saved_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.store.saved_at()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ===== Credential state =====

    /// The current access token: the in-memory copy, else the durable mirror
    /// (unless the session was cleared since).
    pub fn access_credential(&self) -> Option<AccessToken> {
        {
            let state = self.lock_state();
            if let Some(token) = &state.access {
                return Some(token.clone());
            }
            if state.ended {
                return None;
            }
        }
        match self.store.load() {
            Ok(token) => token.map(AccessToken::from),
            Err(e) => {
                warn!(error = %e, "Failed to read stored access token");
                None
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_credential().is_some()
    }

    /// Replace the access token, in memory and in the durable store. Counts as
    /// a new session: a renewal still in flight will not overwrite it.
    pub fn set_access_credential(&self, token: AccessToken) {
        let epoch = {
            let mut state = self.lock_state();
            state.epoch += 1;
            state.set(token.clone());
            state.epoch
        };
        self.persist(epoch, Some(&token));
    }

    /// Forget the access token locally, in memory and in the durable store.
    /// Any renewal still in flight is prevented from writing it back.
    pub fn clear_access_credential(&self) {
        let epoch = {
            let mut state = self.lock_state();
            state.epoch += 1;
            state.clear();
            state.epoch
        };
        self.persist(epoch, None);
    }

    /// Mirror the credential to the durable store. Called without the state
    /// lock; a write tagged with an epoch older than the last one written is
    /// dropped, so the store never goes back to a superseded session.
    fn persist(&self, epoch: u64, token: Option<&AccessToken>) {
        let mut written = self.persisted_epoch.lock().unwrap_or_else(PoisonError::into_inner);
        if epoch < *written {
            debug!(epoch, latest = *written, "Skipping store write from a superseded session");
            return;
        }
        *written = epoch;

        let result = match token {
            Some(token) => self.store.save(token.as_str()),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to update stored access token");
        }
    }

    pub fn is_renewing(&self) -> bool {
        self.lock_state().renewal.is_renewing()
    }

    /// Number of callers parked behind the in-flight renewal.
    pub fn queued_waiters(&self) -> usize {
        self.lock_state().renewal.queued()
    }

    // ===== Authenticated calls =====

    /// Send `request` with the current access token attached.
    ///
    /// Responses are returned as they come, including error statuses. The one
    /// exception is the expired-token signal: the token is renewed (shared
    /// with any concurrent callers) and the request is sent once more, and
    /// that second response is returned whatever it is.
    pub async fn authenticated_call(&self, request: ApiRequest) -> Result<ApiResponse, SessionError> {
        let token = self.access_credential().ok_or(SessionError::Unauthenticated)?;

        let response = self.send_with(&request, &token).await?;
        if !self.is_expiry_signal(&response) {
            return Ok(response);
        }

        // Someone else may have replaced the token while this request was out
        let fresh = match self.access_credential() {
            Some(current) if current != token => {
                debug!(url = %request.url, "Access token already replaced, retrying with it");
                current
            }
            _ => {
                debug!(method = %request.method, url = %request.url, "Access token expired, renewing");
                self.renew().await?
            }
        };

        let retried = self.send_with(&request, &fresh).await?;
        if self.is_expiry_signal(&retried) {
            warn!(url = %request.url, "Token reported expired again after renewal, not retrying");
        }
        Ok(retried)
    }

    async fn send_with(&self, request: &ApiRequest, token: &AccessToken) -> Result<ApiResponse, SessionError> {
        let request = request.with_bearer(token.as_str())?;
        Ok(self.transport.send(request).await?)
    }

    fn is_expiry_signal(&self, response: &ApiResponse) -> bool {
        response
            .error_code(&self.settings.error_code_field)
            .is_some_and(|code| code == self.settings.expired_code)
    }

    // ===== Renewal =====

    /// Obtain a fresh access token from the renewal endpoint.
    ///
    /// Only one exchange runs at a time. Callers arriving while one is in
    /// flight wait for it and get its outcome. On failure the local session
    /// is cleared and `SessionEvent::SessionExpired` is emitted once.
    pub async fn renew(&self) -> Result<AccessToken, SessionError> {
        let role = {
            let mut state = self.lock_state();
            let epoch = state.epoch;
            state.renewal.join(epoch)
        };

        match role {
            Role::Waiter { ticket, rx } => {
                debug!(ticket, "Renewal already in flight, waiting for it");
                match rx.await {
                    Ok(outcome) => outcome.map_err(SessionError::expired),
                    Err(_) => Err(SessionError::expired(RENEWAL_ABANDONED)),
                }
            }
            Role::Owner { epoch } => {
                let mut guard = FlightGuard {
                    client: self,
                    epoch,
                    armed: true,
                };
                let outcome = self.exchange_renewal().await;
                guard.armed = false;
                self.finish_renewal(epoch, outcome)
            }
        }
    }

    async fn exchange_renewal(&self) -> RenewalOutcome {
        debug!(url = %self.settings.refresh_url, "Requesting new access token");
        let request = ApiRequest::post(&self.settings.refresh_url).credentials(CredentialsMode::Include);

        match self.transport.send(request).await {
            Ok(response) if response.is_success() => response
                .json::<TokenResponse>()
                .map(|body| AccessToken::from(body.access_token))
                .map_err(|e| e.to_string()),
            Ok(response) => Err(response.error_message()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn finish_renewal(&self, epoch: u64, outcome: RenewalOutcome) -> Result<AccessToken, SessionError> {
        let mut state = self.lock_state();

        if state.epoch != epoch {
            // Logged in or out meanwhile: whatever the session holds now wins
            let current: RenewalOutcome = state.access.clone().ok_or_else(|| SESSION_ENDED.to_string());
            let settled = state.renewal.settle(&current);
            drop(state);
            debug!(waiters = settled.len(), "Discarded renewal from a superseded session");
            return current.map_err(SessionError::expired);
        }

        match &outcome {
            Ok(token) => state.set(token.clone()),
            Err(_) => state.clear(),
        }
        let settled = state.renewal.settle(&outcome);
        drop(state);
        self.persist(epoch, outcome.as_ref().ok());

        match outcome {
            Ok(token) => {
                info!(waiters = settled.len(), "Access token renewed");
                self.emit(SessionEvent::Renewed);
                Ok(token)
            }
            Err(reason) => {
                warn!(waiters = settled.len(), reason = %reason, "Token renewal failed, session cleared");
                self.emit(SessionEvent::SessionExpired);
                Err(SessionError::expired(reason))
            }
        }
    }

    // ===== Login / logout =====

    /// Exchange username and password for an access token. The server sets
    /// the renewal credential on the same response.
    pub async fn login(&self, username: &str, password: &str) -> LoginOutcome {
        let request = match ApiRequest::post(&self.settings.login_url)
            .credentials(CredentialsMode::Include)
            .json(&LoginRequest { username, password })
        {
            Ok(request) => request,
            Err(e) => return LoginOutcome::failure(e.to_string()),
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Login request failed");
                return LoginOutcome::failure(e.to_string());
            }
        };

        if !response.is_success() {
            let message = response.error_message();
            info!(username, status = response.status.as_u16(), "Login rejected");
            return LoginOutcome::failure(message);
        }

        let token = match response.json::<TokenResponse>() {
            Ok(body) => AccessToken::from(body.access_token),
            Err(e) => return LoginOutcome::failure(e.to_string()),
        };

        self.set_access_credential(token.clone());
        info!(username, "Logged in");
        self.emit(SessionEvent::LoggedIn);
        LoginOutcome::success(token.into_inner())
    }

    /// End the session. Local state is cleared first and unconditionally; the
    /// server-side invalidation is best effort and its failure is only logged.
    pub async fn logout(&self) {
        let token = self.access_credential();
        self.clear_access_credential();
        self.emit(SessionEvent::LoggedOut);
        info!("Logged out locally");

        let mut request = ApiRequest::post(&self.settings.logout_url).credentials(CredentialsMode::Include);
        if let Some(token) = token {
            match request.with_bearer(token.as_str()) {
                Ok(authed) => request = authed,
                Err(e) => warn!(error = %e, "Sending logout without bearer token"),
            }
        }

        match self.transport.send(request).await {
            Ok(response) if response.is_success() => debug!("Server-side logout succeeded"),
            Ok(response) => warn!(status = response.status.as_u16(), "Server-side logout failed"),
            Err(e) => warn!(error = %e, "Server-side logout request failed"),
        }
        // The server needed the renewal cookie to revoke it; now drop it here too
        self.transport.forget_credentials();
    }
}

impl SessionState {
    fn set(&mut self, token: AccessToken) {
        self.access = Some(token);
        self.ended = false;
    }

    fn clear(&mut self) {
        self.access = None;
        self.ended = true;
    }
}

/// Settles the waiters of a renewal whose owner was dropped mid-exchange, so
/// nobody is left parked forever.
struct FlightGuard<'a> {
    client: &'a SessionClient,
    epoch: u64,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.client.lock_state();
        if state.renewal.flight_epoch() == Some(self.epoch) {
            let settled = state.renewal.settle(&Err(RENEWAL_ABANDONED.to_string()));
            drop(state);
            warn!(waiters = settled.len(), "Token renewal abandoned");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
