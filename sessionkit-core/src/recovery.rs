//! One refresh-and-retry cycle for requests rejected with 401.
//!
//! ```text
//! Initial -> Dispatched -> Success
//!                       -> AuthFailed -> Refreshing -> RetryDispatched -> Success | Failed
//!                                                   -> RefreshFailed   -> Failed
//! ```
//!
//! A 401 from a lifecycle endpoint, from an origin that never receives the
//! session, or while the user is on a public auth screen, is returned as is.
//! Network failures are never retried.
//!
//! Concurrent 401s share refresh results: a verdict is reused by requests
//! sent before it was reached, and a failed verdict only while no new session
//! has been established since. Only the caller that ran a failed refresh ends
//! the session.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use reqwest::{Response, StatusCode, Url};
use strum::Display;

use crate::{
    config::ClientConfig,
    dispatcher::Dispatcher,
    envelope::RequestEnvelope,
    error::SessionKitError,
    lifecycle::{is_public_route, LifecycleEndpoint},
    navigation::Navigator,
    session::{join_path, SessionContext, TokenStore},
};

/// Stages a request passes through under the recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryState {
    /// Nothing sent yet.
    Initial,
    /// The original request is in flight.
    Dispatched,
    /// Terminal: a response other than an unrecovered 401.
    Success,
    /// The original request got a recoverable 401.
    AuthFailed,
    /// The refresh call is in flight.
    Refreshing,
    /// The original request is being replayed after a refresh.
    RetryDispatched,
    /// The refresh call was rejected or could not be sent.
    RefreshFailed,
    /// Terminal: the caller gets a 401 it has to deal with.
    Failed,
}

/// Final response of a request plus how it got there.
#[derive(Debug)]
pub struct RecoveryOutcome {
    /// The response handed to the caller.
    pub response: Response,
    /// Terminal state: [`RecoveryState::Success`] or [`RecoveryState::Failed`].
    pub state: RecoveryState,
    /// Whether the request was replayed after a refresh.
    pub retried: bool,
}

#[derive(Debug, Clone, Copy)]
struct RefreshVerdict {
    status: Option<u16>,
    ok: bool,
    generation: u64,
}

struct RefreshAttempt {
    result: Result<(), SessionKitError>,
    shared: bool,
}

impl RefreshVerdict {
    fn into_result(self) -> Result<(), SessionKitError> {
        if self.ok {
            Ok(())
        } else {
            Err(SessionKitError::RefreshFailed {
                status: self.status,
            })
        }
    }
}

/// Wraps the dispatcher with the refresh-and-retry state machine.
pub struct RecoveryPolicy {
    dispatcher: Arc<Dispatcher>,
    session: Arc<SessionContext>,
    navigator: Arc<dyn Navigator>,
    refresh_url: Url,
    sign_in_route: String,
    public_routes: Vec<String>,
    dedupe_refresh: bool,
    refresh_epoch: AtomicU64,
    refresh_gate: tokio::sync::Mutex<Option<RefreshVerdict>>,
}

impl RecoveryPolicy {
    /// Creates the policy.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::Config`] if the refresh path cannot be joined
    /// onto the base URL.
    pub fn new(
        config: &ClientConfig,
        dispatcher: Arc<Dispatcher>,
        session: Arc<SessionContext>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, SessionKitError> {
        let refresh_url = join_path(dispatcher.base(), &config.refresh_path)?;
        Ok(Self {
            dispatcher,
            session,
            navigator,
            refresh_url,
            sign_in_route: config.sign_in_route.clone(),
            public_routes: config.public_routes.clone(),
            dedupe_refresh: config.dedupe_refresh,
            refresh_epoch: AtomicU64::new(0),
            refresh_gate: tokio::sync::Mutex::new(None),
        })
    }

    /// Sends `envelope`, refreshing the session and replaying it once if the
    /// first attempt is rejected with 401.
    ///
    /// # Errors
    ///
    /// Returns an error only for unresolvable targets and network failures of
    /// the original request or its replay. A failed refresh is not an error:
    /// the original 401 response is returned and the host is sent to sign-in.
    #[tracing::instrument(
        name = "recovery",
        skip_all,
        fields(method = %envelope.method(), target = envelope.target())
    )]
    pub async fn execute(
        &self,
        envelope: &RequestEnvelope,
    ) -> Result<RecoveryOutcome, SessionKitError> {
        let url = self.dispatcher.resolve(envelope.target())?;
        let epoch = self.refresh_epoch.load(Ordering::Acquire);
        let generation = self.session.session_generation();

        let mut state = RecoveryState::Initial;
        state = advance(state, RecoveryState::Dispatched);
        let response = self.dispatcher.dispatch(&url, envelope).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(finish(response, advance(state, RecoveryState::Success), false));
        }

        if !self.dispatcher.is_trusted(&url) {
            tracing::debug!(%url, "401 from an untrusted origin passed through");
            return Ok(finish(response, advance(state, RecoveryState::Failed), false));
        }
        if let Some(endpoint) = LifecycleEndpoint::classify(self.dispatcher.base(), &url) {
            tracing::debug!(%endpoint, "401 from lifecycle endpoint passed through");
            return Ok(finish(response, advance(state, RecoveryState::Failed), false));
        }
        if self.on_public_route() {
            tracing::debug!("401 on a public auth screen passed through");
            return Ok(finish(response, advance(state, RecoveryState::Failed), false));
        }

        state = advance(state, RecoveryState::AuthFailed);
        state = advance(state, RecoveryState::Refreshing);

        let attempt = self.refresh_since(epoch).await;
        match attempt.result {
            Ok(()) => {
                drop(response);
                state = advance(state, RecoveryState::RetryDispatched);
                let retry = self.dispatcher.dispatch(&url, envelope).await?;
                let terminal = if retry.status() == StatusCode::UNAUTHORIZED {
                    RecoveryState::Failed
                } else {
                    RecoveryState::Success
                };
                Ok(finish(retry, advance(state, terminal), true))
            }
            Err(err) => {
                state = advance(state, RecoveryState::RefreshFailed);
                if attempt.shared {
                    tracing::debug!(
                        error = %err,
                        "concurrent refresh failed, session already ended"
                    );
                } else if self.session.session_generation() == generation {
                    tracing::warn!(error = %err, "session refresh failed");
                    self.end_session();
                } else {
                    tracing::debug!(error = %err, "refresh failed for a superseded session");
                }
                Ok(finish(response, advance(state, RecoveryState::Failed), false))
            }
        }
    }

    /// Calls the refresh endpoint once.
    ///
    /// # Errors
    ///
    /// Returns [`SessionKitError::RefreshFailed`] for a non-2xx answer and
    /// [`SessionKitError::Transport`] if the call could not be made.
    pub async fn refresh_session(&self) -> Result<(), SessionKitError> {
        let envelope = RequestEnvelope::post(self.refresh_url.as_str()).skip_csrf();
        let response = self.dispatcher.dispatch(&self.refresh_url, &envelope).await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!("session refreshed");
            Ok(())
        } else {
            Err(SessionKitError::RefreshFailed {
                status: Some(status.as_u16()),
            })
        }
    }

    /// Refreshes unless a refresh completed after `epoch` was observed and its
    /// verdict still applies: successes always do, failures only within the
    /// session generation they were reached in.
    async fn refresh_since(&self, epoch: u64) -> RefreshAttempt {
        if !self.dedupe_refresh {
            return RefreshAttempt {
                result: self.refresh_session().await,
                shared: false,
            };
        }

        let mut gate = self.refresh_gate.lock().await;
        let generation = self.session.session_generation();
        if self.refresh_epoch.load(Ordering::Acquire) != epoch {
            if let Some(verdict) = (*gate).filter(|v| v.ok || v.generation == generation) {
                tracing::debug!(ok = verdict.ok, "reusing concurrent refresh result");
                return RefreshAttempt {
                    result: verdict.into_result(),
                    shared: true,
                };
            }
        }

        let result = self.refresh_session().await;
        let status = match &result {
            Err(SessionKitError::RefreshFailed { status }) => *status,
            _ => None,
        };
        *gate = Some(RefreshVerdict {
            status,
            ok: result.is_ok(),
            generation,
        });
        self.refresh_epoch.fetch_add(1, Ordering::AcqRel);
        RefreshAttempt {
            result,
            shared: false,
        }
    }

    fn on_public_route(&self) -> bool {
        self.navigator
            .current_route()
            .is_some_and(|route| is_public_route(&route, &self.public_routes))
    }

    fn end_session(&self) {
        self.session.clear_session_credential();
        self.session.reset_anti_forgery_token();
        if self.on_public_route() {
            return;
        }
        tracing::info!(entry = %self.sign_in_route, "session expired, redirecting to sign-in");
        self.navigator.redirect_to_sign_in(self.sign_in_route.clone());
    }
}

fn advance(from: RecoveryState, to: RecoveryState) -> RecoveryState {
    tracing::trace!(%from, %to, "recovery transition");
    to
}

fn finish(response: Response, state: RecoveryState, retried: bool) -> RecoveryOutcome {
    RecoveryOutcome {
        response,
        state,
        retried,
    }
}
