//! Session token store: the session credential and the anti-forgery token.
//!
//! Both tokens have a fast in-memory copy and a durable copy. The memory copy
//! always wins once populated; the durable copy is only consulted when the
//! cache is empty.
//!
//! - Session credential: durable copy lives in a [`CredentialStore`].
//! - Anti-forgery token: durable copy is the cookie the backend sets next to
//!   the `/csrf-token` response, read from the shared cookie jar.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};

use reqwest::{
    cookie::{CookieStore, Jar},
    header::USER_AGENT,
    Url,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{
    config::ClientConfig, dispatcher::user_agent, error::SessionKitError,
    storage::CredentialStore,
};

/// The four accessor operations of the token store.
///
/// None of these fail the caller: storage problems are logged and reported as
/// "no token".
pub trait TokenStore: Send + Sync {
    /// The stored session credential, if any.
    fn session_credential(&self) -> Option<SecretString>;

    /// Stores a new session credential in memory and durably.
    fn set_session_credential(&self, token: SecretString);

    /// Forgets the session credential. Safe to call when nothing is stored.
    fn clear_session_credential(&self);

    /// The anti-forgery token: cached value first, then the fallback cookie.
    /// `None` means "not yet established".
    fn anti_forgery_token(&self) -> Option<SecretString>;
}

/// Priming progress of the anti-forgery token for this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum PrimeState {
    /// No successful round trip yet.
    NotPrimed,
    /// A round trip is in flight.
    Priming,
    /// The token was fetched and cached.
    Primed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CsrfTokenResponse {
    csrf_token: String,
}

/// Session state shared by the dispatcher and the recovery policy.
///
/// Created once by the composition root and passed around in an `Arc`.
pub struct SessionContext {
    store: Arc<dyn CredentialStore>,
    credential_key: String,
    credential_cache: RwLock<Option<SecretString>>,
    generation: AtomicU64,
    jar: Arc<Jar>,
    cookie_name: String,
    cookie_url: Url,
    csrf_url: Url,
    http: reqwest::Client,
    csrf_cache: RwLock<Option<SecretString>>,
    prime_state: Mutex<PrimeState>,
    prime_gate: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("credential_key", &self.credential_key)
            .field("cookie_name", &self.cookie_name)
            .field("csrf_url", &self.csrf_url.as_str())
            .field("prime_state", &self.prime_state())
            .finish_non_exhaustive()
    }
}

impl SessionContext {
    /// Creates the session state.
    ///
    /// `http` must be a client whose cookie provider is `jar`; the priming
    /// round trip relies on it to receive the fallback cookie.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Config`] if the base URL or CSRF path is invalid.
    pub fn new(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
        http: reqwest::Client,
        jar: Arc<Jar>,
    ) -> Result<Self, SessionKitError> {
        let base = config.base()?;
        let csrf_url = join_path(&base, &config.csrf_path)?;

        Ok(Self {
            store,
            credential_key: config.credential_key.clone(),
            credential_cache: RwLock::new(None),
            generation: AtomicU64::new(0),
            jar,
            cookie_name: config.csrf_cookie_name.clone(),
            cookie_url: base,
            csrf_url,
            http,
            csrf_cache: RwLock::new(None),
            prime_state: Mutex::new(PrimeState::NotPrimed),
            prime_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Current priming state.
    #[must_use]
    pub fn prime_state(&self) -> PrimeState {
        *self
            .prime_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Counter bumped every time a new session is established.
    ///
    /// Work started under an older generation must not tear down the
    /// current session.
    #[must_use]
    pub fn session_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Marks the start of a new session, e.g. after a cookie-only sign-in
    /// that stored no credential.
    pub fn begin_session(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn set_prime_state(&self, state: PrimeState) {
        *self
            .prime_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Establishes the anti-forgery token unless this process already did.
    ///
    /// Round trips are serialized: concurrent callers wait for the one in
    /// flight and return without a second request once it succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the round trip fails. The state goes back to
    /// [`PrimeState::NotPrimed`] so a later call tries again.
    pub async fn prime_anti_forgery_token(&self) -> Result<(), SessionKitError> {
        if self.prime_state() == PrimeState::Primed {
            return Ok(());
        }
        let _gate = self.prime_gate.lock().await;
        if self.prime_state() == PrimeState::Primed {
            return Ok(());
        }
        self.fetch_anti_forgery_token().await
    }

    /// Fetches a fresh anti-forgery token even if one is cached, e.g. after
    /// sign-in rotated it.
    ///
    /// # Errors
    ///
    /// Returns an error if the round trip fails. A previously cached token is
    /// kept in that case.
    pub async fn force_prime_anti_forgery_token(&self) -> Result<(), SessionKitError> {
        let _gate = self.prime_gate.lock().await;
        self.fetch_anti_forgery_token().await
    }

    /// Drops the cached anti-forgery token and marks it as not primed.
    pub fn reset_anti_forgery_token(&self) {
        *self
            .csrf_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.set_prime_state(PrimeState::NotPrimed);
    }

    async fn fetch_anti_forgery_token(&self) -> Result<(), SessionKitError> {
        let previous = self.prime_state();
        self.set_prime_state(PrimeState::Priming);

        match self.request_anti_forgery_token().await {
            Ok(token) => {
                *self
                    .csrf_cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(token);
                self.set_prime_state(PrimeState::Primed);
                tracing::debug!("anti-forgery token primed");
                Ok(())
            }
            Err(err) => {
                let fallback = if previous == PrimeState::Primed && self.has_cached_csrf() {
                    PrimeState::Primed
                } else {
                    PrimeState::NotPrimed
                };
                self.set_prime_state(fallback);
                tracing::warn!(error = %err, "failed to prime anti-forgery token");
                Err(err)
            }
        }
    }

    async fn request_anti_forgery_token(&self) -> Result<SecretString, SessionKitError> {
        let response = self
            .http
            .get(self.csrf_url.clone())
            .header(USER_AGENT, user_agent())
            .send()
            .await
            .map_err(|e| SessionKitError::transport(&self.csrf_url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionKitError::Csrf(format!(
                "token endpoint answered {}",
                status.as_u16()
            )));
        }

        let body: CsrfTokenResponse = response
            .json()
            .await
            .map_err(|e| SessionKitError::Csrf(format!("malformed token response: {e}")))?;
        if body.csrf_token.is_empty() {
            return Err(SessionKitError::Csrf(
                "token endpoint returned an empty token".to_string(),
            ));
        }
        Ok(SecretString::from(body.csrf_token))
    }

    fn has_cached_csrf(&self) -> bool {
        self.csrf_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn csrf_cookie(&self) -> Option<SecretString> {
        let header = self.jar.cookies(&self.cookie_url)?;
        let cookies = header.to_str().ok()?;
        cookies
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, value)| *name == self.cookie_name && !value.is_empty())
            .map(|(_, value)| SecretString::from(value.to_string()))
    }
}

impl TokenStore for SessionContext {
    fn session_credential(&self) -> Option<SecretString> {
        if let Some(token) = self
            .credential_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Some(copy_secret(token));
        }

        match self.store.read(&self.credential_key) {
            Ok(Some(value)) if !value.is_empty() => {
                let token = SecretString::from(value);
                *self
                    .credential_cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(copy_secret(&token));
                Some(token)
            }
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read session credential");
                None
            }
        }
    }

    fn set_session_credential(&self, token: SecretString) {
        if let Err(err) = self.store.write(&self.credential_key, token.expose_secret()) {
            tracing::warn!(error = %err, "failed to persist session credential");
        }
        *self
            .credential_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
        self.begin_session();
    }

    fn clear_session_credential(&self) {
        *self
            .credential_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        if let Err(err) = self.store.delete(&self.credential_key) {
            tracing::warn!(error = %err, "failed to delete session credential");
        }
    }

    fn anti_forgery_token(&self) -> Option<SecretString> {
        if let Some(token) = self
            .csrf_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return Some(copy_secret(token));
        }
        self.csrf_cookie()
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

/// Joins a configured absolute path (`/csrf-token`) onto the base URL,
/// keeping the base URL's own path prefix.
pub(crate) fn join_path(base: &Url, path: &str) -> Result<Url, SessionKitError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| SessionKitError::Config(format!("invalid path {path}: {e}")))
}
