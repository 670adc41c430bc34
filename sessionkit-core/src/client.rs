use std::sync::Arc;

use reqwest::{cookie::Jar, Response};
use secrecy::SecretString;
use serde::Serialize;

use crate::{
    config::ClientConfig,
    dispatcher::Dispatcher,
    envelope::RequestEnvelope,
    error::SessionKitError,
    lifecycle::LifecycleEndpoint,
    navigation::Navigator,
    recovery::{RecoveryOutcome, RecoveryPolicy},
    response::api_error,
    session::{SessionContext, TokenStore},
    storage::CredentialStore,
};

/// Fields the sign-in endpoint may use for the issued session credential.
const CREDENTIAL_FIELDS: [&str; 3] = ["accessToken", "access_token", "token"];

/// Composition root: owns the session state, the dispatcher and the recovery
/// policy, and wires them to one cookie jar.
pub struct SessionClient {
    config: ClientConfig,
    session: Arc<SessionContext>,
    recovery: RecoveryPolicy,
}

impl SessionClient {
    /// Builds a client.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Config`] if the configuration is invalid or
    /// the HTTP clients cannot be created.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, SessionKitError> {
        config.validate()?;

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| SessionKitError::Config(format!("failed to build http client: {e}")))?;
        let anonymous = reqwest::Client::builder()
            .build()
            .map_err(|e| SessionKitError::Config(format!("failed to build http client: {e}")))?;

        let session = Arc::new(SessionContext::new(&config, store, http.clone(), jar)?);
        let dispatcher = Arc::new(Dispatcher::new(&config, session.clone(), http, anonymous)?);
        let recovery = RecoveryPolicy::new(&config, dispatcher, session.clone(), navigator)?;

        Ok(Self {
            config,
            session,
            recovery,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The session token store, for callers that need the tokens directly.
    #[must_use]
    pub const fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Sends `envelope` under the recovery policy and returns the final response.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::execute`].
    pub async fn send(&self, envelope: &RequestEnvelope) -> Result<Response, SessionKitError> {
        Ok(self.recovery.execute(envelope).await?.response)
    }

    /// Like [`Self::send`], but also reports how the response was obtained.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::execute`].
    pub async fn send_with_outcome(
        &self,
        envelope: &RequestEnvelope,
    ) -> Result<RecoveryOutcome, SessionKitError> {
        self.recovery.execute(envelope).await
    }

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::execute`].
    pub async fn get(&self, path: &str) -> Result<Response, SessionKitError> {
        self.send(&RequestEnvelope::get(path)).await
    }

    /// `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::execute`]; also fails if `body` cannot be serialized.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, SessionKitError> {
        self.send(&RequestEnvelope::post(path).json(body)?).await
    }

    /// `PUT path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::execute`]; also fails if `body` cannot be serialized.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, SessionKitError> {
        self.send(&RequestEnvelope::put(path).json(body)?).await
    }

    /// `PATCH path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::execute`]; also fails if `body` cannot be serialized.
    pub async fn patch<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, SessionKitError> {
        self.send(&RequestEnvelope::patch(path).json(body)?).await
    }

    /// `DELETE path`.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::execute`].
    pub async fn delete(&self, path: &str) -> Result<Response, SessionKitError> {
        self.send(&RequestEnvelope::delete(path)).await
    }

    /// Signs in with `credentials` (typically `{ email, password }`).
    ///
    /// On success the session credential from the response body is stored, if
    /// the backend returned one, a new session generation begins, and the
    /// anti-forgery token is fetched again since sign-in rotates it. Returns
    /// the parsed response body.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Api`] if the backend rejects the credentials.
    pub async fn sign_in<T: Serialize + ?Sized>(
        &self,
        credentials: &T,
    ) -> Result<serde_json::Value, SessionKitError> {
        let envelope = RequestEnvelope::post(LifecycleEndpoint::SignIn.path()).json(credentials)?;
        let response = self.send(&envelope).await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let text = response
            .text()
            .await
            .map_err(|e| SessionKitError::Serialization(format!("unreadable sign-in body: {e}")))?;
        let body = if text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        if let Some(token) = CREDENTIAL_FIELDS
            .iter()
            .find_map(|field| body.get(field).and_then(serde_json::Value::as_str))
        {
            self.session
                .set_session_credential(SecretString::from(token.to_string()));
        } else {
            self.session.begin_session();
        }

        if let Err(err) = self.session.force_prime_anti_forgery_token().await {
            tracing::warn!(error = %err, "could not rotate anti-forgery token after sign-in");
        }
        tracing::info!("signed in");
        Ok(body)
    }

    /// Signs out. Local session state is cleared even if the backend call fails.
    ///
    /// # Errors
    ///
    /// Returns the transport or API error of the sign-out call, after clearing
    /// local state.
    pub async fn sign_out(&self) -> Result<(), SessionKitError> {
        let result = self
            .send(&RequestEnvelope::post(LifecycleEndpoint::SignOut.path()))
            .await;

        self.session.clear_session_credential();
        self.session.reset_anti_forgery_token();
        tracing::info!("signed out");

        let response = result?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    /// Calls the refresh endpoint directly.
    ///
    /// # Errors
    ///
    /// See [`RecoveryPolicy::refresh_session`].
    pub async fn refresh_session(&self) -> Result<(), SessionKitError> {
        self.recovery.refresh_session().await
    }

    /// Establishes the anti-forgery token if this process has not yet.
    ///
    /// # Errors
    ///
    /// See [`SessionContext::prime_anti_forgery_token`].
    pub async fn prime_anti_forgery_token(&self) -> Result<(), SessionKitError> {
        self.session.prime_anti_forgery_token().await
    }

    /// Fetches a fresh anti-forgery token unconditionally.
    ///
    /// # Errors
    ///
    /// See [`SessionContext::force_prime_anti_forgery_token`].
    pub async fn force_prime_anti_forgery_token(&self) -> Result<(), SessionKitError> {
        self.session.force_prime_anti_forgery_token().await
    }
}
