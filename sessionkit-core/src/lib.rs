#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! Authenticated request client.
//!
//! Every request goes through three layers:
//!
//! - [`SessionContext`]: the session credential and the anti-forgery token,
//!   each with an in-memory cache over durable storage.
//! - [`Dispatcher`]: sends one request with cookies, the anti-forgery header
//!   and a content type applied.
//! - [`RecoveryPolicy`]: on a 401, refreshes the session once and replays the
//!   request once.
//!
//! [`SessionClient`] wires them together.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sessionkit_core::{
//!     storage::InMemoryCredentialStore, ClientConfig, NoopNavigator, SessionClient,
//! };
//!
//! # async fn run() -> Result<(), sessionkit_core::SessionKitError> {
//! let client = SessionClient::new(
//!     ClientConfig::new("https://api.example.com"),
//!     Arc::new(InMemoryCredentialStore::new()),
//!     Arc::new(NoopNavigator),
//! )?;
//! let roles = client.get("/v1/roles").await?;
//! println!("{}", roles.status());
//! # Ok(())
//! # }
//! ```

use strum::EnumString;

/// Deployment environment, used to pick default endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    /// Local backend on the developer's machine.
    Development,
    /// Pre-production deployment.
    Staging,
    /// Live deployment.
    Production,
}

pub use reqwest::{Method, Response, StatusCode};

mod client;
pub use client::*;

mod config;
pub use config::*;

mod dispatcher;
pub use dispatcher::Dispatcher;

mod envelope;
pub use envelope::*;

mod error;
pub use error::*;

mod lifecycle;
pub use lifecycle::*;

mod navigation;
pub use navigation::*;

mod recovery;
pub use recovery::*;

pub mod response;

mod session;
pub use session::{PrimeState, SessionContext, TokenStore};

pub mod logger;
pub mod storage;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("sessionkit_core");
