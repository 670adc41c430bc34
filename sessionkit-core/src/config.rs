//! Client configuration and per-environment defaults.

use std::{net::IpAddr, time::Duration};

use reqwest::Url;
use serde::Deserialize;

use crate::{error::SessionKitError, lifecycle::LifecycleEndpoint, Environment};

/// Header carrying the anti-forgery token on mutating requests.
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";

/// Cookie the backend sets alongside the `/csrf-token` response.
pub const DEFAULT_CSRF_COOKIE: &str = "csrf-token";

/// Durable storage key for the session credential.
pub const DEFAULT_CREDENTIAL_KEY: &str = "session_credential";

/// Settings for a [`crate::SessionClient`].
///
/// Every field has a default, so a config file only needs the values it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL. Relative request targets are joined onto it.
    pub base_url: String,
    /// Extra origins that receive cookies and the CSRF header. The base URL's
    /// origin is always allowed.
    pub allowed_origins: Vec<String>,
    /// Path of the endpoint issuing anti-forgery tokens.
    pub csrf_path: String,
    /// Name of the fallback cookie holding the anti-forgery token.
    pub csrf_cookie_name: String,
    /// Header name used to send the anti-forgery token.
    pub csrf_header: String,
    /// Path of the session refresh endpoint.
    pub refresh_path: String,
    /// Route of the sign-in screen the host navigates to on session loss.
    pub sign_in_route: String,
    /// Routes of public auth screens; no recovery or redirect happens there.
    pub public_routes: Vec<String>,
    /// Durable storage key for the session credential.
    pub credential_key: String,
    /// Send the stored credential as `Authorization: Bearer` for legacy APIs.
    pub attach_bearer: bool,
    /// Share one in-flight refresh between concurrent 401s.
    pub dedupe_refresh: bool,
    /// Per-request timeout in seconds. `None` leaves timeouts to the caller.
    pub timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Production)
    }
}

impl ClientConfig {
    /// Creates a config with default settings pointed at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Default settings for the given deployment environment.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        let base_url = match environment {
            Environment::Development => "http://localhost:4000",
            Environment::Staging => "https://api.staging.draftdesk.io",
            Environment::Production => "https://api.draftdesk.io",
        };

        Self {
            base_url: base_url.to_string(),
            allowed_origins: Vec::new(),
            csrf_path: "/csrf-token".to_string(),
            csrf_cookie_name: DEFAULT_CSRF_COOKIE.to_string(),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            refresh_path: LifecycleEndpoint::Refresh.path().to_string(),
            sign_in_route: "/signin".to_string(),
            public_routes: [
                "/signin",
                "/signup",
                "/forgot-password",
                "/reset-password",
                "/verify",
                "/accept-invitation",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            attach_bearer: false,
            dedupe_refresh: true,
            timeout_secs: None,
        }
    }

    /// Per-request timeout, if configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Parses and checks the base URL.
    ///
    /// Plain `http` is only accepted for loopback hosts.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Config`] if the URL is malformed or insecure.
    pub fn base(&self) -> Result<Url, SessionKitError> {
        let mut url = parse_secure_url(&self.base_url)?;
        if url.cannot_be_a_base() {
            return Err(SessionKitError::Config(format!(
                "base url cannot be a base: {}",
                self.base_url
            )));
        }
        // `join` drops the last segment unless the path ends in `/`.
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Parses the extra allow-listed origins.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Config`] if an entry is malformed or insecure.
    pub fn extra_origins(&self) -> Result<Vec<Url>, SessionKitError> {
        self.allowed_origins
            .iter()
            .map(|origin| parse_secure_url(origin))
            .collect()
    }

    /// Checks the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), SessionKitError> {
        self.base()?;
        self.extra_origins()?;
        for (name, path) in [
            ("csrf_path", &self.csrf_path),
            ("refresh_path", &self.refresh_path),
            ("sign_in_route", &self.sign_in_route),
        ] {
            if !path.starts_with('/') {
                return Err(SessionKitError::Config(format!(
                    "{name} must start with '/': {path}"
                )));
            }
        }
        if self.csrf_header.is_empty() || self.csrf_cookie_name.is_empty() {
            return Err(SessionKitError::Config(
                "csrf header and cookie names must not be empty".to_string(),
            ));
        }
        if self.credential_key.is_empty() {
            return Err(SessionKitError::Config(
                "credential_key must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_secure_url(raw: &str) -> Result<Url, SessionKitError> {
    let url = Url::parse(raw)
        .map_err(|e| SessionKitError::Config(format!("invalid url {raw}: {e}")))?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback(&url) => Ok(url),
        scheme => Err(SessionKitError::Config(format!(
            "refusing {scheme} url {raw}: https is required outside loopback"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    if host == "localhost" {
        return true;
    }
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}
