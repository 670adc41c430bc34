//! Helpers for callers interpreting responses.
//!
//! The dispatcher never parses bodies; these are conveniences for the common
//! "JSON on success, `{ message }` on failure" convention of the API.

use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::error::SessionKitError;

/// Parses a 2xx JSON body into `T`.
///
/// # Errors
///
/// Returns [`SessionKitError::Api`] for non-2xx statuses, with the message
/// taken from the body, and [`SessionKitError::Serialization`] if a 2xx body
/// is not valid JSON for `T`.
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SessionKitError> {
    let status = response.status();
    if !status.is_success() {
        return Err(api_error(response).await);
    }
    response
        .json()
        .await
        .map_err(|e| SessionKitError::Serialization(format!("failed to parse response: {e}")))
}

/// Builds an [`SessionKitError::Api`] from a failed response.
pub async fn api_error(response: Response) -> SessionKitError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    SessionKitError::Api {
        status,
        message: error_message(&body),
    }
}

/// Extracts a human-readable message from an error body.
///
/// Looks for `message`, then `error`, in a JSON object; a `message` array
/// (validation errors) is joined with `; `. Anything else is returned trimmed.
#[must_use]
pub fn error_message(body: &str) -> String {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    for key in ["message", "error"] {
        match map.get(key) {
            Some(serde_json::Value::String(message)) => return message.clone(),
            Some(serde_json::Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ");
            }
            _ => {}
        }
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use mockito::Server;
    use serde::Deserialize;

    use super::*;

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(error_message(r#"{"message": "Role not found"}"#), "Role not found");
        assert_eq!(error_message(r#"{"error": "Forbidden"}"#), "Forbidden");
        assert_eq!(
            error_message(r#"{"message": ["name is required", "email is invalid"]}"#),
            "name is required; email is invalid"
        );
        assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
        assert_eq!(error_message(r#"{"statusCode": 500}"#), r#"{"statusCode": 500}"#);
    }

    #[derive(Debug, Deserialize, PartialEq, Eq)]
    struct Role {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_read_json_success_and_failure() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/roles/1")
            .with_status(200)
            .with_body(r#"{"id": 1, "name": "Drafter"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/roles/2")
            .with_status(404)
            .with_body(r#"{"message": "Role not found"}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let ok = client.get(format!("{}/roles/1", server.url())).send().await.unwrap();
        let role: Role = read_json(ok).await.unwrap();
        assert_eq!(
            role,
            Role {
                id: 1,
                name: "Drafter".to_string()
            }
        );

        let missing = client.get(format!("{}/roles/2", server.url())).send().await.unwrap();
        match read_json::<Role>(missing).await.unwrap_err() {
            SessionKitError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Role not found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
