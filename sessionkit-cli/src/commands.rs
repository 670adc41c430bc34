use std::{path::Path, sync::Arc};

use eyre::{eyre, Result, WrapErr};
use serde::Serialize;
use sessionkit_core::{
    storage::FileCredentialStore, ClientConfig, Method, Navigator, RecoveryState,
    RequestEnvelope, SessionClient,
};

/// Terminal stand-in for the host's router: there is no current screen, and a
/// redirect to sign-in becomes a hint on stderr.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn current_route(&self) -> Option<String> {
        None
    }

    fn redirect_to_sign_in(&self, entry: String) {
        eprintln!("session expired ({entry}); run `sessionkit signin` again");
    }
}

pub struct RequestArgs {
    pub method: Method,
    pub path: String,
    pub json: Option<String>,
    pub headers: Vec<String>,
    pub no_csrf: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    status: u16,
    state: String,
    retried: bool,
    body: serde_json::Value,
}

pub fn build_client(config: ClientConfig, state_dir: &Path) -> Result<SessionClient> {
    let store = FileCredentialStore::open(state_dir)
        .wrap_err_with(|| format!("failed to open state dir {}", state_dir.display()))?;
    Ok(SessionClient::new(
        config,
        Arc::new(store),
        Arc::new(TerminalNavigator),
    )?)
}

pub async fn sign_in(client: &SessionClient, email: &str, password: &str) -> Result<()> {
    let body = client
        .sign_in(&serde_json::json!({ "email": email, "password": password }))
        .await
        .wrap_err("sign-in failed")?;
    tracing::info!(%email, "signed in");
    print_json(&body)
}

pub async fn sign_out(client: &SessionClient) -> Result<()> {
    client.sign_out().await.wrap_err("sign-out failed")?;
    println!("signed out");
    Ok(())
}

pub async fn refresh(client: &SessionClient) -> Result<()> {
    client
        .refresh_session()
        .await
        .wrap_err("session refresh failed")?;
    println!("session refreshed");
    Ok(())
}

pub async fn prime(client: &SessionClient, force: bool) -> Result<()> {
    if force {
        client.force_prime_anti_forgery_token().await?;
    } else {
        client.prime_anti_forgery_token().await?;
    }
    println!("{:?}", client.session().prime_state());
    Ok(())
}

pub async fn request(client: &SessionClient, args: RequestArgs) -> Result<()> {
    let mut envelope = RequestEnvelope::new(args.method, args.path);
    if let Some(raw) = &args.json {
        let value: serde_json::Value =
            serde_json::from_str(raw).wrap_err("--json is not valid JSON")?;
        envelope = envelope.json(&value)?;
    }
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        envelope = envelope.header(name, value)?;
    }
    if args.no_csrf {
        envelope = envelope.skip_csrf();
    }

    let outcome = client.send_with_outcome(&envelope).await?;
    let status = outcome.response.status().as_u16();
    let text = outcome.response.text().await.unwrap_or_default();
    let body = if text.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
    };

    print_json(&Report {
        status,
        state: outcome.state.to_string(),
        retried: outcome.retried,
        body,
    })?;

    if outcome.state == RecoveryState::Failed {
        return Err(eyre!("request rejected with status {status}"));
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<(&str, &str)> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| eyre!("header must look like `name: value`, got {raw:?}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
