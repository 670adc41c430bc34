use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    Response, Url,
};
use secrecy::ExposeSecret;

use crate::{
    config::ClientConfig,
    envelope::{Body, RequestEnvelope},
    error::SessionKitError,
    session::{SessionContext, TokenStore},
};

const JSON_CONTENT_TYPE: &str = "application/json";

pub(crate) fn user_agent() -> String {
    format!("sessionkit-core/{}", env!("CARGO_PKG_VERSION"))
}

/// Sends one request with cookies, the anti-forgery header and a content type
/// applied. Does not interpret the response.
///
/// Cookies and the anti-forgery token only go to trusted origins: the base
/// URL's origin plus [`ClientConfig::allowed_origins`]. Anything else is sent
/// through a client without a cookie store.
pub struct Dispatcher {
    session: Arc<SessionContext>,
    http: reqwest::Client,
    anonymous: reqwest::Client,
    base: Url,
    trusted: Vec<Url>,
    csrf_header: HeaderName,
    attach_bearer: bool,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// `http` must share its cookie jar with `session`; `anonymous` must not
    /// have a cookie store.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Config`] if the config does not validate.
    pub fn new(
        config: &ClientConfig,
        session: Arc<SessionContext>,
        http: reqwest::Client,
        anonymous: reqwest::Client,
    ) -> Result<Self, SessionKitError> {
        config.validate()?;
        let base = config.base()?;
        let mut trusted = vec![base.clone()];
        trusted.extend(config.extra_origins()?);
        let csrf_header = HeaderName::from_bytes(config.csrf_header.as_bytes())
            .map_err(|e| SessionKitError::Config(format!("invalid csrf header: {e}")))?;

        Ok(Self {
            session,
            http,
            anonymous,
            base,
            trusted,
            csrf_header,
            attach_bearer: config.attach_bearer,
            timeout: config.timeout(),
        })
    }

    /// The base URL with a trailing `/`.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves an envelope target: absolute `http(s)` URLs are used as is,
    /// anything else is a path under the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::InvalidUrl`] if the target cannot be resolved.
    pub fn resolve(&self, target: &str) -> Result<Url, SessionKitError> {
        if let Ok(url) = Url::parse(target) {
            return match url.scheme() {
                "http" | "https" => Ok(url),
                scheme => Err(SessionKitError::InvalidUrl(format!(
                    "unsupported scheme {scheme} in {target}"
                ))),
            };
        }
        self.base
            .join(target.trim_start_matches('/'))
            .map_err(|e| SessionKitError::InvalidUrl(format!("{target}: {e}")))
    }

    /// Whether `url` may receive cookies and the anti-forgery token.
    #[must_use]
    pub fn is_trusted(&self, url: &Url) -> bool {
        self.trusted
            .iter()
            .any(|trusted| trusted.origin() == url.origin())
    }

    /// Resolves and sends `envelope`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::InvalidUrl`] for an unresolvable target and
    /// [`SessionKitError::Transport`] for network failures. HTTP error statuses
    /// are not errors here.
    pub async fn send(&self, envelope: &RequestEnvelope) -> Result<Response, SessionKitError> {
        let url = self.resolve(envelope.target())?;
        self.dispatch(&url, envelope).await
    }

    /// Sends `envelope` to an already resolved `url`.
    pub(crate) async fn dispatch(
        &self,
        url: &Url,
        envelope: &RequestEnvelope,
    ) -> Result<Response, SessionKitError> {
        let trusted = self.is_trusted(url);
        let client = if trusted { &self.http } else { &self.anonymous };
        let mut headers = envelope.headers().clone();

        if trusted && envelope.needs_csrf() && !headers.contains_key(&self.csrf_header) {
            if let Some(value) = self.anti_forgery_header().await {
                headers.insert(self.csrf_header.clone(), value);
            }
        }

        if trusted && self.attach_bearer && !headers.contains_key(AUTHORIZATION) {
            if let Some(value) = self.bearer_header() {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let mut builder = client
            .request(envelope.method().clone(), url.clone())
            .header(USER_AGENT, user_agent());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match envelope.payload() {
            Body::Multipart(parts) => builder.multipart(Body::multipart_form(parts)?),
            Body::Empty => {
                default_content_type(&mut headers, None);
                builder
            }
            Body::Json(bytes) => {
                default_content_type(&mut headers, None);
                builder.body(bytes.clone())
            }
            Body::Raw {
                bytes,
                content_type,
            } => {
                default_content_type(&mut headers, content_type.as_deref());
                builder.body(bytes.clone())
            }
        };

        let response = builder
            .headers(headers)
            .send()
            .await
            .map_err(|e| SessionKitError::transport(url, &e))?;

        tracing::debug!(
            method = %envelope.method(),
            url = %url,
            status = response.status().as_u16(),
            "dispatched request"
        );
        Ok(response)
    }

    async fn anti_forgery_header(&self) -> Option<HeaderValue> {
        if self.session.anti_forgery_token().is_none() {
            // Best effort: without a token the backend rejects the request
            // and the caller handles that like any other auth error.
            if let Err(err) = self.session.prime_anti_forgery_token().await {
                tracing::warn!(error = %err, "sending mutating request without anti-forgery token");
            }
        }
        let token = self.session.anti_forgery_token()?;
        let mut value = HeaderValue::from_str(token.expose_secret())
            .inspect_err(|_| tracing::warn!("anti-forgery token is not a valid header value"))
            .ok()?;
        value.set_sensitive(true);
        Some(value)
    }

    fn bearer_header(&self) -> Option<HeaderValue> {
        let credential = self.session.session_credential()?;
        let mut value =
            HeaderValue::from_str(&format!("Bearer {}", credential.expose_secret())).ok()?;
        value.set_sensitive(true);
        Some(value)
    }
}

fn default_content_type(headers: &mut reqwest::header::HeaderMap, content_type: Option<&str>) {
    if headers.contains_key(CONTENT_TYPE) {
        return;
    }
    let value = content_type
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(JSON_CONTENT_TYPE));
    headers.insert(CONTENT_TYPE, value);
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};
    use reqwest::cookie::Jar;

    use super::*;
    use crate::{
        envelope::MultipartPart,
        storage::{CredentialStore, InMemoryCredentialStore},
    };

    fn dispatcher_for(config: &ClientConfig) -> (Dispatcher, Arc<SessionContext>) {
        dispatcher_with_store(config, Arc::new(InMemoryCredentialStore::new()))
    }

    fn dispatcher_with_store(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> (Dispatcher, Arc<SessionContext>) {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .unwrap();
        let session = Arc::new(SessionContext::new(config, store, http.clone(), jar).unwrap());
        let dispatcher =
            Dispatcher::new(config, session.clone(), http, reqwest::Client::new()).unwrap();
        (dispatcher, session)
    }

    async fn csrf_mock(server: &mut mockito::ServerGuard, token: &str) -> mockito::Mock {
        server
            .mock("GET", "/csrf-token")
            .with_status(200)
            .with_body(format!(r#"{{"csrfToken": "{token}"}}"#))
            .create_async()
            .await
    }

    #[test]
    fn test_resolve_targets() {
        let (dispatcher, _) = dispatcher_for(&ClientConfig::new("https://api.example.com/api"));

        assert_eq!(
            dispatcher.resolve("/v1/roles").unwrap().as_str(),
            "https://api.example.com/api/v1/roles"
        );
        assert_eq!(
            dispatcher.resolve("v1/roles?page=2").unwrap().as_str(),
            "https://api.example.com/api/v1/roles?page=2"
        );
        assert_eq!(
            dispatcher.resolve("https://files.example.com/x").unwrap().as_str(),
            "https://files.example.com/x"
        );
        assert!(matches!(
            dispatcher.resolve("ftp://files.example.com/x"),
            Err(SessionKitError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_trusted_origins() {
        let mut config = ClientConfig::new("https://api.example.com");
        config.allowed_origins = vec!["https://uploads.example.com".to_string()];
        let (dispatcher, _) = dispatcher_for(&config);

        let url = |s: &str| Url::parse(s).unwrap();
        assert!(dispatcher.is_trusted(&url("https://api.example.com/v1/roles")));
        assert!(dispatcher.is_trusted(&url("https://uploads.example.com/a")));
        assert!(!dispatcher.is_trusted(&url("http://api.example.com/v1/roles")));
        assert!(!dispatcher.is_trusted(&url("https://evil.example.com/")));
    }

    #[tokio::test]
    async fn test_mutating_request_carries_cached_token() {
        let mut server = Server::new_async().await;
        let csrf = csrf_mock(&mut server, "tok-42").await;
        let mock = server
            .mock("POST", "/v1/tickets")
            .match_header("x-csrf-token", "tok-42")
            .match_header("content-type", "application/json")
            .match_header("user-agent", Matcher::Regex("^sessionkit-core/".to_string()))
            .match_body(Matcher::JsonString(r#"{"title":"Fix title block"}"#.to_string()))
            .with_status(201)
            .create_async()
            .await;

        let (dispatcher, session) = dispatcher_for(&ClientConfig::new(server.url()));
        session.prime_anti_forgery_token().await.unwrap();

        let envelope = RequestEnvelope::post("/v1/tickets")
            .json(&serde_json::json!({"title": "Fix title block"}))
            .unwrap();
        let response = dispatcher.send(&envelope).await.unwrap();

        assert_eq!(response.status().as_u16(), 201);
        csrf.assert_async().await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_mutating_request_primes_missing_token() {
        let mut server = Server::new_async().await;
        let csrf = server
            .mock("GET", "/csrf-token")
            .with_status(200)
            .with_body(r#"{"csrfToken": "fresh"}"#)
            .expect(1)
            .create_async()
            .await;
        let mock = server
            .mock("DELETE", "/v1/users/7")
            .match_header("x-csrf-token", "fresh")
            .with_status(204)
            .create_async()
            .await;

        let (dispatcher, _) = dispatcher_for(&ClientConfig::new(server.url()));
        let response = dispatcher
            .send(&RequestEnvelope::delete("/v1/users/7"))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 204);
        csrf.assert_async().await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_prime_still_sends_request() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/csrf-token")
            .with_status(500)
            .create_async()
            .await;
        let mock = server
            .mock("PATCH", "/v1/systems/3")
            .match_header("x-csrf-token", Matcher::Missing)
            .with_status(403)
            .create_async()
            .await;

        let (dispatcher, _) = dispatcher_for(&ClientConfig::new(server.url()));
        let response = dispatcher
            .send(&RequestEnvelope::patch("/v1/systems/3"))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 403);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_read_request_never_carries_token() {
        let mut server = Server::new_async().await;
        let csrf = server
            .mock("GET", "/csrf-token")
            .with_status(200)
            .with_body(r#"{"csrfToken": "tok"}"#)
            .expect(1)
            .create_async()
            .await;
        let mock = server
            .mock("GET", "/v1/roles")
            .match_header("x-csrf-token", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let (dispatcher, session) = dispatcher_for(&ClientConfig::new(server.url()));
        session.prime_anti_forgery_token().await.unwrap();

        dispatcher.send(&RequestEnvelope::get("/v1/roles")).await.unwrap();
        mock.assert_async().await;
        csrf.assert_async().await;
    }

    #[tokio::test]
    async fn test_bypass_flag_skips_token_and_priming() {
        let mut server = Server::new_async().await;
        let csrf = server
            .mock("GET", "/csrf-token")
            .expect(0)
            .create_async()
            .await;
        let mock = server
            .mock("POST", "/public/contact")
            .match_header("x-csrf-token", Matcher::Missing)
            .with_status(202)
            .create_async()
            .await;

        let (dispatcher, _) = dispatcher_for(&ClientConfig::new(server.url()));
        let envelope = RequestEnvelope::post("/public/contact").skip_csrf();
        dispatcher.send(&envelope).await.unwrap();

        mock.assert_async().await;
        csrf.assert_async().await;
    }

    #[tokio::test]
    async fn test_multipart_body_keeps_transport_content_type() {
        let mut server = Server::new_async().await;
        let csrf = csrf_mock(&mut server, "tok").await;
        let mock = server
            .mock("POST", "/v1/drawings")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".to_string()),
            )
            .match_body(Matcher::Regex("Level 2 plan".to_string()))
            .with_status(201)
            .create_async()
            .await;

        let (dispatcher, _) = dispatcher_for(&ClientConfig::new(server.url()));
        let envelope = RequestEnvelope::post("/v1/drawings").body(Body::Multipart(vec![
            MultipartPart::text("title", "Level 2 plan"),
            MultipartPart::file("file", "l2.pdf", "application/pdf", b"%PDF-1.7".to_vec()),
        ]));
        dispatcher.send(&envelope).await.unwrap();

        mock.assert_async().await;
        csrf.assert_async().await;
    }

    #[tokio::test]
    async fn test_caller_content_type_wins() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/reports/9")
            .match_header("content-type", "text/csv")
            .with_status(200)
            .create_async()
            .await;

        let (dispatcher, _) = dispatcher_for(&ClientConfig::new(server.url()));
        let envelope = RequestEnvelope::get("/v1/reports/9")
            .header("Content-Type", "text/csv")
            .unwrap();
        dispatcher.send(&envelope).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_raw_body_uses_its_content_type() {
        let mut server = Server::new_async().await;
        csrf_mock(&mut server, "tok").await;
        let mock = server
            .mock("PUT", "/v1/timesheets/import")
            .match_header("content-type", "text/csv")
            .match_body("date,hours\n2026-10-01,8\n")
            .with_status(200)
            .create_async()
            .await;

        let (dispatcher, _) = dispatcher_for(&ClientConfig::new(server.url()));
        let envelope = RequestEnvelope::put("/v1/timesheets/import").body(Body::Raw {
            bytes: b"date,hours\n2026-10-01,8\n".to_vec(),
            content_type: Some("text/csv".to_string()),
        });
        dispatcher.send(&envelope).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_untrusted_origin_gets_no_token() {
        let mut api = Server::new_async().await;
        let mut other = Server::new_async().await;
        csrf_mock(&mut api, "secret-token").await;
        let mock = other
            .mock("POST", "/hook")
            .match_header("x-csrf-token", Matcher::Missing)
            .with_status(200)
            .create_async()
            .await;

        let (dispatcher, session) = dispatcher_for(&ClientConfig::new(api.url()));
        session.prime_anti_forgery_token().await.unwrap();

        let target = format!("{}/hook", other.url());
        dispatcher.send(&RequestEnvelope::post(target)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_bearer_is_opt_in() {
        let mut server = Server::new_async().await;
        let without = server
            .mock("GET", "/v1/me")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let store: Arc<dyn CredentialStore> = Arc::new(InMemoryCredentialStore::new());
        store.write("session_credential", "jwt-abc").unwrap();

        let (plain, _) = dispatcher_with_store(&ClientConfig::new(server.url()), store.clone());
        plain.send(&RequestEnvelope::get("/v1/me")).await.unwrap();
        without.assert_async().await;

        let with = server
            .mock("GET", "/v1/me")
            .match_header("authorization", "Bearer jwt-abc")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let mut config = ClientConfig::new(server.url());
        config.attach_bearer = true;
        let (bearer, _) = dispatcher_with_store(&config, store);
        bearer.send(&RequestEnvelope::get("/v1/me")).await.unwrap();
        with.assert_async().await;
    }

    #[tokio::test]
    async fn test_transport_error_is_reported() {
        let (dispatcher, _) = dispatcher_for(&ClientConfig::new("http://127.0.0.1:1"));
        let err = dispatcher
            .send(&RequestEnvelope::get("/v1/roles"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionKitError::Transport { .. }));
    }
}
