//! HTTP checks against a launcher server: update-service health and the
//! configured server name.

use std::time::Duration;

use {
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{candidates::ServerCandidate, error::DiscoveryError};

const HEALTH_PATH: &str = "/api/updates/health";
const SERVER_NAME_PATH: &str = "/api/settings/server-name";

/// Thin reqwest client for the two read-only endpoints discovery needs.
#[derive(Debug, Clone)]
pub struct ServerApi {
    client: reqwest::Client,
}

impl ServerApi {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build http client, using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Whether `base` answers the update-service health check with a 2xx.
    pub async fn health(&self, base: &str) -> bool {
        match self.get(base, HEALTH_PATH).await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(server = %base, error = %e, "health check failed");
                false
            },
        }
    }

    /// The server's configured display name, if it publishes one.
    pub async fn server_name(&self, base: &str) -> Option<String> {
        let resp = match self.get(base, SERVER_NAME_PATH).await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(server = %base, status = %resp.status(), "server name unavailable");
                return None;
            },
            Err(e) => {
                debug!(server = %base, error = %e, "server name request failed");
                return None;
            },
        };
        let body = resp.text().await.ok()?;
        parse_server_name(&body)
    }

    /// Same-machine check: a healthy server on `127.0.0.1:port` becomes a
    /// candidate, named via the settings endpoint.
    pub async fn probe_localhost(&self, port: u16) -> Option<ServerCandidate> {
        let base = format!("http://127.0.0.1:{port}");
        if !self.health(&base).await {
            return None;
        }
        let server_name = self.server_name(&base).await;
        debug!(server = %base, "localhost server answered");
        Some(ServerCandidate {
            server_name,
            ..ServerCandidate::new(base)
        })
    }

    async fn get(&self, base: &str, path: &str) -> Result<reqwest::Response, DiscoveryError> {
        let url = format!("{}{path}", base.trim_end_matches('/'));
        Ok(self.client.get(url).send().await?)
    }
}

/// Accepts `{"serverName": ..}`, `{"name": ..}`, either nested under `data`,
/// a bare JSON string, or plain text.
fn parse_server_name(body: &str) -> Option<String> {
    let name = match serde_json::from_str::<Value>(body) {
        Ok(Value::String(s)) => s,
        Ok(value) => {
            let root = value.get("data").unwrap_or(&value);
            root.get("serverName")
                .or_else(|| root.get("name"))
                .and_then(Value::as_str)?
                .to_string()
        },
        Err(_) => body.to_string(),
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}
