//! Identity-lifecycle endpoints and public auth routes.
//!
//! A 401 from one of these endpoints means "wrong credentials", not "expired
//! session", so the recovery policy must leave it alone.

use reqwest::Url;
use strum::{Display, EnumIter, IntoEnumIterator};

/// Identity-management endpoints exempt from refresh-and-retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "kebab-case")]
pub enum LifecycleEndpoint {
    /// Rotates the session cookie.
    Refresh,
    /// Exchanges user credentials for a session.
    SignIn,
    /// Ends the session server-side.
    SignOut,
    /// Creates an account.
    SignUp,
    /// Confirms an e-mail address or one-time code.
    Verify,
    /// Starts the password reset flow.
    ForgotPassword,
    /// Completes the password reset flow.
    ResetPassword,
    /// Accepts an organization invitation.
    AcceptInvitation,
}

impl LifecycleEndpoint {
    /// Path of the endpoint relative to the API base URL.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Refresh => "/auth/refresh",
            Self::SignIn => "/auth/signin",
            Self::SignOut => "/auth/signout",
            Self::SignUp => "/auth/signup",
            Self::Verify => "/auth/verify",
            Self::ForgotPassword => "/auth/forgot-password",
            Self::ResetPassword => "/auth/reset-password",
            Self::AcceptInvitation => "/auth/accept-invitation",
        }
    }

    /// Returns the endpoint `target` addresses, if any.
    ///
    /// The target path is taken relative to the path of `base`, so a base of
    /// `https://api.example.com/api` matches `/api/auth/signin`.
    #[must_use]
    pub fn classify(base: &Url, target: &Url) -> Option<Self> {
        let path = relative_path(base, target);
        Self::iter().find(|endpoint| route_matches(path, endpoint.path()))
    }
}

/// Whether `route` equals `prefix` or continues it with a further segment.
///
/// Query strings and fragments on `route` are ignored, as is a trailing `/`.
#[must_use]
pub fn route_matches(route: &str, prefix: &str) -> bool {
    let route = route.split(['?', '#']).next().unwrap_or_default();
    let route = route.strip_suffix('/').unwrap_or(route);
    let prefix = prefix.strip_suffix('/').unwrap_or(prefix);

    route.strip_prefix(prefix).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Whether `route` is one of the public auth screens in `public_routes`.
#[must_use]
pub fn is_public_route<S: AsRef<str>>(route: &str, public_routes: &[S]) -> bool {
    public_routes
        .iter()
        .any(|public| route_matches(route, public.as_ref()))
}

fn relative_path<'a>(base: &Url, target: &'a Url) -> &'a str {
    let path = target.path();
    if base.origin() != target.origin() {
        return path;
    }
    let base_path = base.path().trim_end_matches('/');
    if base_path.is_empty() {
        return path;
    }
    match path.strip_prefix(base_path) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test_case("https://api.example.com/auth/refresh", Some(LifecycleEndpoint::Refresh); "refresh")]
    #[test_case("https://api.example.com/auth/signin", Some(LifecycleEndpoint::SignIn); "sign in")]
    #[test_case("https://api.example.com/auth/signout", Some(LifecycleEndpoint::SignOut); "sign out")]
    #[test_case("https://api.example.com/auth/signup", Some(LifecycleEndpoint::SignUp); "sign up")]
    #[test_case("https://api.example.com/auth/verify/abc123", Some(LifecycleEndpoint::Verify); "verify with token")]
    #[test_case("https://api.example.com/auth/forgot-password", Some(LifecycleEndpoint::ForgotPassword); "forgot password")]
    #[test_case("https://api.example.com/auth/reset-password?t=1", Some(LifecycleEndpoint::ResetPassword); "reset password with query")]
    #[test_case("https://api.example.com/auth/accept-invitation/", Some(LifecycleEndpoint::AcceptInvitation); "accept invitation trailing slash")]
    #[test_case("https://api.example.com/auth/signing-keys", None; "shared prefix is not a match")]
    #[test_case("https://api.example.com/v1/roles", None; "ordinary endpoint")]
    #[test_case("https://api.example.com/v1/auth/signin", None; "nested under another segment")]
    fn test_classify_against_root_base(target: &str, expected: Option<LifecycleEndpoint>) {
        let base = url("https://api.example.com");
        assert_eq!(LifecycleEndpoint::classify(&base, &url(target)), expected);
    }

    #[test]
    fn test_classify_strips_base_path() {
        let base = url("https://api.example.com/api/");
        assert_eq!(
            LifecycleEndpoint::classify(&base, &url("https://api.example.com/api/auth/refresh")),
            Some(LifecycleEndpoint::Refresh)
        );
        assert_eq!(
            LifecycleEndpoint::classify(&base, &url("https://api.example.com/api/v1/users")),
            None
        );
    }

    #[test]
    fn test_classify_other_origin_uses_full_path() {
        let base = url("https://api.example.com/api");
        assert_eq!(
            LifecycleEndpoint::classify(&base, &url("https://id.example.com/auth/signin")),
            Some(LifecycleEndpoint::SignIn)
        );
    }

    #[test_case("/signin", true; "exact")]
    #[test_case("/signin?next=%2Fdashboard", true; "with query")]
    #[test_case("/reset-password/tok", true; "with trailing segment")]
    #[test_case("/signing", false; "shared prefix")]
    #[test_case("/dashboard", false; "private screen")]
    fn test_public_routes(route: &str, expected: bool) {
        let public = ["/signin", "/signup", "/reset-password"];
        assert_eq!(is_public_route(route, &public), expected);
    }

    #[test]
    fn test_display_is_kebab_case() {
        assert_eq!(LifecycleEndpoint::ForgotPassword.to_string(), "forgot-password");
        assert_eq!(LifecycleEndpoint::SignIn.to_string(), "sign-in");
    }
}
