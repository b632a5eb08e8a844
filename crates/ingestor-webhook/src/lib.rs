//! Fire-and-forget Slack-compatible webhook notifications.
//!
//! Grounded on `send_slack_message` in the original tooling: a single POST
//! of `{"text": ...}`, treated as fire-and-forget by callers (a webhook
//! failure is logged, never allowed to fail an ingestion run).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

fn default_timeout_secs() -> u64 {
    10
}

/// Webhook destination, as configured under `[slack]`.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), timeout_secs: default_timeout_secs() }
    }
}

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

/// Post `message` to the configured webhook. Returns an error if the
/// endpoint responds with anything other than 2xx; callers decide whether
/// that failure should be surfaced or merely logged.
pub fn send_webhook(config: &WebhookConfig, message: &str) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to create HTTP client")?;

    let response = client
        .post(&config.url)
        .json(&SlackMessage { text: message })
        .send()
        .context("failed to send webhook request")?;

    if !response.status().is_success() {
        return Err(anyhow::anyhow!(
            "request to slack returned an error {}, the response is:\n{}",
            response.status(),
            response.text().unwrap_or_default()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_config_defaults_timeout() {
        let config = WebhookConfig::new("https://hooks.example.com/x");
        assert_eq!(config.timeout_secs, 10);
    }

    #[test]
    fn send_webhook_succeeds_against_a_local_server() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
        let addr = server.server_addr();
        let handle = std::thread::spawn(move || {
            let request = server.recv().expect("recv");
            request.respond(tiny_http::Response::empty(200)).expect("respond");
        });

        let config = WebhookConfig::new(format!("http://{}/", addr));
        let result = send_webhook(&config, "hello");
        handle.join().expect("server thread");
        assert!(result.is_ok());
    }

    #[test]
    fn send_webhook_surfaces_non_2xx_status() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
        let addr = server.server_addr();
        let handle = std::thread::spawn(move || {
            let request = server.recv().expect("recv");
            request.respond(tiny_http::Response::empty(500)).expect("respond");
        });

        let config = WebhookConfig::new(format!("http://{}/", addr));
        let result = send_webhook(&config, "hello");
        handle.join().expect("server thread");
        assert!(result.is_err());
    }
}
