use crate::domain::models::{LoginResponse, RefreshCredential, Session, User};
use crate::infrastructure::api_transport::{ApiRequest, ApiTransport, HttpMethod, CSRF_HEADER};
use crate::infrastructure::cookies::{apply_set_cookies, cookie_header};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OnceCell};

pub const LOGIN_PATH: &str = "/login";
pub const DEFAULT_LANDING_PATH: &str = "/";
const AUTH_PAGES: [&str; 3] = ["/login", "/logout", "/register"];

/// Picks where to go after login. `next` wins only when it is a local path
/// that is not itself an auth page.
pub fn safe_redirect_target<'a>(next: Option<&'a str>, fallback: &'a str) -> &'a str {
    let Some(candidate) = next.map(str::trim).filter(|value| !value.is_empty()) else {
        return fallback;
    };
    let local = candidate.starts_with('/') && !candidate.starts_with("//") && !candidate.contains('\\');
    if local && !AUTH_PAGES.contains(&candidate) {
        candidate
    } else {
        fallback
    }
}

pub trait Navigator: Send + Sync {
    fn replace(&self, path: &str);
}

/// Keeps every destination it was sent to; the CLI reports the last one.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current(&self) -> Option<String> {
        self.history().last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn replace(&self, path: &str) {
        tracing::debug!(%path, "navigate");
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());
    }
}

/// The slice of the session the HTTP pipeline is allowed to touch.
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Option<String>;

    /// Obtains a replacement for `stale`. If another caller already replaced it,
    /// the newer token is returned without a second exchange.
    async fn refresh(&self, stale: Option<&str>) -> Option<String>;

    fn clear(&self);
}

pub struct SessionManager<T, S>
where
    T: ApiTransport,
    S: CredentialStore + ?Sized,
{
    transport: Arc<T>,
    credential_store: Arc<S>,
    navigator: Arc<dyn Navigator>,
    landing_path: String,
    state: Mutex<Session>,
    refresh_gate: AsyncMutex<()>,
    resolved: OnceCell<()>,
}

impl<T, S> SessionManager<T, S>
where
    T: ApiTransport,
    S: CredentialStore + ?Sized,
{
    pub fn new(transport: Arc<T>, credential_store: Arc<S>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            transport,
            credential_store,
            navigator,
            landing_path: DEFAULT_LANDING_PATH.to_string(),
            state: Mutex::new(Session::default()),
            refresh_gate: AsyncMutex::new(()),
            resolved: OnceCell::new(),
        }
    }

    pub fn with_landing_path(mut self, landing_path: impl Into<String>) -> Self {
        self.landing_path = landing_path.into();
        self
    }

    pub fn snapshot(&self) -> Session {
        self.lock_state().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_state().is_authenticated
    }

    /// Installs a freshly issued token and navigates to the post-login destination.
    pub fn login(&self, access_token: &str, email: Option<&str>, next: Option<&str>) -> String {
        {
            let mut state = self.lock_state();
            state.access_token = Some(access_token.to_string());
            state.is_authenticated = true;
            if let Some(email) = email.map(str::trim).filter(|value| !value.is_empty()) {
                state.user_email = Some(email.to_string());
            }
        }
        let destination = safe_redirect_target(next, &self.landing_path).to_string();
        tracing::info!(%destination, "logged in");
        self.navigator.replace(&destination);
        destination
    }

    pub async fn verify_access(&self, token: &str) -> bool {
        let request = ApiRequest::new(HttpMethod::Post, ["users", "verify"])
            .with_bearer(token);
        let response = match self.transport.send(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::debug!(status = response.status, "access token rejected");
                return false;
            }
            Err(error) => {
                tracing::debug!(%error, "access token verification failed");
                return false;
            }
        };
        match response.json::<User>() {
            Ok(user) => {
                self.lock_state().user_email = Some(user.email);
                true
            }
            Err(error) => {
                tracing::warn!(%error, "verify endpoint returned an unreadable user");
                false
            }
        }
    }

    /// Exchanges the stored refresh cookie for a new access token.
    pub async fn verify_refresh(&self) -> Option<String> {
        let credential = match self.credential_store.load_credential() {
            Ok(credential) => credential.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(%error, "could not load refresh credential");
                return None;
            }
        };

        let request = with_cookies(ApiRequest::new(HttpMethod::Post, ["users", "refresh"]), &credential);
        let response = match self.transport.send(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::debug!(status = response.status, "refresh rejected");
                return None;
            }
            Err(error) => {
                tracing::debug!(%error, "refresh failed");
                return None;
            }
        };

        let token = match response.json::<LoginResponse>() {
            Ok(payload) if !payload.access_token.trim().is_empty() => payload.access_token,
            Ok(_) => return None,
            Err(error) => {
                tracing::warn!(%error, "refresh endpoint returned an unreadable token");
                return None;
            }
        };
        if let Err(error) = self.store_cookies(&response.set_cookies) {
            tracing::warn!(%error, "could not persist rotated refresh credential");
        }
        self.lock_state().access_token = Some(token.clone());
        tracing::info!("access token refreshed");
        Some(token)
    }

    /// Settles the startup authentication state. Only the first call does any work;
    /// later and concurrent calls wait for it and return the current snapshot.
    pub async fn resolve_session(&self) -> Session {
        self.resolved
            .get_or_init(|| async { self.run_resolution().await })
            .await;
        self.snapshot()
    }

    async fn run_resolution(&self) {
        // Bound first so the state guard is released before `verify_refresh` locks it again.
        let held = self.lock_state().access_token.clone();
        let token = match held {
            Some(token) => Some(token),
            None => self.verify_refresh().await,
        };
        let Some(token) = token else {
            tracing::info!("no session to resume");
            self.clear_state();
            return;
        };

        if self.verify_access(&token).await {
            let mut state = self.lock_state();
            state.access_token = Some(token);
            state.is_authenticated = true;
            tracing::info!(email = state.user_email.as_deref().unwrap_or(""), "session resumed");
        } else {
            tracing::info!("stored session is no longer valid");
            self.clear_state();
        }
    }

    /// Best-effort server logout. Local state is always cleared, whatever the server says.
    pub async fn logout(&self) {
        let credential = self
            .credential_store
            .load_credential()
            .ok()
            .flatten()
            .unwrap_or_default();
        let mut request = with_cookies(ApiRequest::new(HttpMethod::Post, ["users", "logout"]), &credential);
        let held = self.lock_state().access_token.clone();
        if let Some(token) = held {
            request = request.with_bearer(token);
        }

        match self.transport.send(request).await {
            Ok(response) if !response.is_success() => {
                tracing::warn!(status = response.status, "server logout rejected");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "server logout failed"),
        }
        if let Err(error) = self.credential_store.delete_credential() {
            tracing::warn!(%error, "could not delete stored refresh credential");
        }
        self.clear_state();
        self.navigator.replace(LOGIN_PATH);
    }

    /// Folds `Set-Cookie` headers from an auth response into the stored credential.
    pub fn store_cookies(&self, set_cookies: &[String]) -> Result<(), InfraError> {
        if set_cookies.is_empty() {
            return Ok(());
        }
        let mut credential = self.credential_store.load_credential()?.unwrap_or_default();
        if apply_set_cookies(&mut credential, set_cookies) {
            if credential.is_empty() {
                self.credential_store.delete_credential()?;
            } else {
                self.credential_store.save_credential(&credential)?;
            }
        }
        Ok(())
    }

    pub fn stored_credential(&self) -> Result<Option<RefreshCredential>, InfraError> {
        self.credential_store.load_credential()
    }

    fn clear_state(&self) {
        *self.lock_state() = Session::default();
    }

    fn lock_state(&self) -> MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn with_cookies(mut request: ApiRequest, credential: &RefreshCredential) -> ApiRequest {
    request = request.with_header(CSRF_HEADER, credential.csrf_token.clone().unwrap_or_default());
    if let Some(cookies) = cookie_header(credential) {
        request = request.with_header("Cookie", cookies);
    }
    request
}

#[async_trait]
impl<T, S> TokenSource for SessionManager<T, S>
where
    T: ApiTransport,
    S: CredentialStore + ?Sized,
{
    fn access_token(&self) -> Option<String> {
        self.lock_state().access_token.clone()
    }

    async fn refresh(&self, stale: Option<&str>) -> Option<String> {
        let _gate = self.refresh_gate.lock().await;
        if let Some(current) = self.access_token() {
            if Some(current.as_str()) != stale {
                tracing::debug!("refresh already completed by a concurrent request");
                return Some(current);
            }
        }
        self.verify_refresh().await
    }

    fn clear(&self) {
        self.clear_state();
    }
}
