//! Session lookup collaborator
//!
//! The session API resolves a session name into live connect metadata:
//! websocket URL, short-lived connect token, and the routing machine id.
//! Lookup runs once before the first connection and again between
//! reconnect attempts, where it also detects a session that has stopped
//! in the meantime.

use async_trait::async_trait;
use serde::Deserialize;

use tether_core::error::LookupError;

/// Connect metadata for one remote session
#[derive(Debug, Clone, Deserialize)]
pub struct SessionHandle {
    /// Stable session identifier
    pub id: String,
    /// Machine-state field, e.g. "running" or "stopped"
    pub status: String,
    /// Machine instance the transport must route to
    pub machine_id: String,
    /// Websocket endpoint for the interactive channel
    pub websocket_url: String,
    /// Short-lived bearer token scoped to this session's transport
    pub connect_token: String,
}

impl SessionHandle {
    /// Whether the remote session is currently running
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Resolves a session name into connect metadata
#[async_trait]
pub trait SessionLookup: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<SessionHandle, LookupError>;
}

/// HTTP implementation against the session API
pub struct HttpSessionLookup {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpSessionLookup {
    /// Create a lookup client against `base_url` using the user's API
    /// token
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }
}

#[async_trait]
impl SessionLookup for HttpSessionLookup {
    async fn resolve(&self, name: &str) -> Result<SessionHandle, LookupError> {
        let url = format!(
            "{}/v1/sessions/{}",
            self.base_url.trim_end_matches('/'),
            name
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| LookupError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(LookupError::Request(format!(
                "session API returned {}",
                response.status()
            )));
        }

        response
            .json::<SessionHandle>()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_parses_api_response() {
        let handle: SessionHandle = serde_json::from_str(
            r#"{
                "id": "sess_01",
                "status": "running",
                "machine_id": "m-7f",
                "websocket_url": "wss://relay.tether.sh/sess_01",
                "connect_token": "tok_abc"
            }"#,
        )
        .unwrap();
        assert!(handle.is_running());
        assert_eq!(handle.machine_id, "m-7f");
    }

    #[test]
    fn test_stopped_session_is_not_running() {
        let handle = SessionHandle {
            id: "sess_02".to_string(),
            status: "stopped".to_string(),
            machine_id: "m-7f".to_string(),
            websocket_url: "wss://relay.tether.sh/sess_02".to_string(),
            connect_token: "tok".to_string(),
        };
        assert!(!handle.is_running());
    }
}
