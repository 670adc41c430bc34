//! Hooks into the host's router.
//!
//! The recovery policy needs to know which screen the user is on and must be
//! able to send them to sign-in when the session cannot be refreshed.

/// Host-provided view of navigation state.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Navigator: Send + Sync {
    /// The route currently displayed, e.g. `/signin?next=%2Froles`.
    /// `None` when the host has no notion of a current route.
    fn current_route(&self) -> Option<String>;

    /// Tears down client-side session state and shows the sign-in entry point.
    fn redirect_to_sign_in(&self, entry: String);
}

/// Navigator for headless hosts: no current route, redirects are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn current_route(&self) -> Option<String> {
        None
    }

    fn redirect_to_sign_in(&self, entry: String) {
        tracing::debug!(%entry, "sign-in redirect requested without a navigator");
    }
}
