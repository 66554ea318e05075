//! HTTP client for the fleet server the mission starts in its own tmux
//! pane. Readiness polling uses the same exponential-backoff-with-jitter
//! shape the Mattermost listener uses for its reconnect loop.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::json;

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const READY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServerClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Serialize)]
struct SpawnBody<'a> {
    handle: &'a str,
    #[serde(rename = "teamName")]
    team_name: &'a str,
    #[serde(rename = "spawnMode")]
    spawn_mode: &'a str,
    #[serde(rename = "initialPrompt")]
    initial_prompt: &'a str,
}

impl ServerClient {
    pub fn new(base_url: &str) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_string(), token: None }
    }

    /// Poll `GET /health` with exponential backoff and jitter until it
    /// answers or `READY_TIMEOUT` elapses.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if tokio::time::Instant::now() >= deadline {
                bail!("server did not become healthy within {:?}", READY_TIMEOUT);
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = self.http.get(&url).send().await
                && resp.status().is_success()
            {
                return Ok(());
            }
            let jitter = Duration::from_millis(rand_jitter_ms(backoff));
            tokio::time::sleep(backoff + jitter).await;
            backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
        }
    }

    pub async fn authenticate(&mut self) -> Result<()> {
        let url = format!("{}/auth", self.base_url);
        let resp: AuthResponse = self.http.post(&url).send().await.context("POST /auth")?.json().await.context("decoding /auth response")?;
        self.token = Some(resp.token);
        Ok(())
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }

    /// Register a tmux-managed worker pane with the server as an
    /// external worker so its events flow through the same lifecycle as
    /// process/native/tmux-internal workers.
    pub async fn spawn_external_worker(&self, handle: &str, team: &str, task: &str) -> Result<()> {
        let url = format!("{}/orchestrate/spawn", self.base_url);
        let body = SpawnBody { handle, team_name: team, spawn_mode: "external", initial_prompt: task };
        let resp = self.authed(self.http.post(&url)).json(&body).send().await.context("POST /orchestrate/spawn")?;
        if !resp.status().is_success() {
            bail!("spawn failed for {handle}: {}", resp.status());
        }
        Ok(())
    }

    pub async fn dismiss_worker(&self, handle: &str) -> Result<()> {
        let url = format!("{}/orchestrate/dismiss/{handle}", self.base_url);
        let resp = self.authed(self.http.post(&url)).send().await.context("POST /orchestrate/dismiss")?;
        if !resp.status().is_success() {
            bail!("dismiss failed for {handle}: {}", resp.status());
        }
        Ok(())
    }

    pub async fn send_to_worker(&self, handle: &str, text: &str) -> Result<bool> {
        let url = format!("{}/orchestrate/send/{handle}", self.base_url);
        let resp = self.authed(self.http.post(&url)).json(&json!({ "text": text })).send().await.context("POST /orchestrate/send")?;
        if !resp.status().is_success() {
            bail!("send failed for {handle}: {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        Ok(body.get("delivered").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    pub async fn post_blackboard_message(&self, swarm_id: &str, sender: &str, message_type: &str, content: &serde_json::Value) -> Result<()> {
        let url = format!("{}/blackboard", self.base_url);
        let resp = self
            .authed(self.http.post(&url))
            .json(&json!({ "swarmId": swarm_id, "senderHandle": sender, "messageType": message_type, "payload": content }))
            .send()
            .await
            .context("POST /blackboard")?;
        if !resp.status().is_success() {
            bail!("blackboard post failed: {}", resp.status());
        }
        Ok(())
    }
}

/// Deterministic, non-`rand`-dependent jitter: spreads retries across
/// roughly [0, base/2) without pulling in a dedicated RNG crate for one
/// call site.
fn rand_jitter_ms(base: Duration) -> u64 {
    let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.subsec_nanos()).unwrap_or(0);
    let half = (base.as_millis() as u64 / 2).max(1);
    u64::from(nanos) % half
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_under_half_base() {
        let base = Duration::from_millis(1000);
        for _ in 0..20 {
            assert!(rand_jitter_ms(base) < 500);
        }
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let client = ServerClient::new("http://127.0.0.1:4000/");
        assert_eq!(client.base_url, "http://127.0.0.1:4000");
    }
}
