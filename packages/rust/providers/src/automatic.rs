//! HTTPS model API provider with credential rotation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use aibridge_shared::{AiBridgeError, ModelParams, ProviderConfig, Result, mask_credential};

use crate::TransformProvider;
use crate::backends::{BackendAdapter, CallSpec, adapter_for};
use crate::credentials::CredentialPool;

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("AIBridge/", env!("CARGO_PKG_VERSION"));

/// Longest error body excerpt carried into an error message.
const ERROR_BODY_LIMIT: usize = 300;

/// Calls a remote model API, rotating across the configured credentials.
///
/// A credential answered with 401, 403 or 429 is retired for the rest of the
/// run and the same prompt is retried with another one. When the pool runs
/// dry the call fails with [`AiBridgeError::NoCredentials`], which ends the run.
pub struct AutomaticProvider {
    name: String,
    model: String,
    base_url: String,
    params: ModelParams,
    timeout: Duration,
    client: Client,
    adapter: Box<dyn BackendAdapter>,
    pool: CredentialPool,
}

impl AutomaticProvider {
    /// Build from a provider config section.
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        config.validate()?;

        let adapter = adapter_for(config.backend);
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| adapter.default_base_url().to_string());

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| AiBridgeError::config(format!("failed to build HTTP client: {e}")))?;

        let pool = CredentialPool::new(config.credentials());
        debug!(
            provider = %config.name,
            backend = adapter.name(),
            credentials = pool.len(),
            %base_url,
            "automatic provider ready"
        );

        Ok(Self {
            name: config.name.clone(),
            model: config.model.clone(),
            base_url,
            params: config.params.clone(),
            timeout,
            client,
            adapter,
            pool,
        })
    }

    /// Override the endpoint root (used for self-hosted gateways and tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Credentials still eligible this run.
    pub fn available_credentials(&self) -> usize {
        self.pool.available()
    }

    /// One HTTP attempt with a single credential.
    async fn attempt(&self, credential: &str, prompt: &str) -> Result<String> {
        let spec = CallSpec {
            base_url: &self.base_url,
            model: &self.model,
            credential,
            prompt,
            params: &self.params,
        };

        let response = self
            .adapter
            .build_request(&self.client, &spec)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AiBridgeError::provider(
                        &self.name,
                        format!("request timed out after {}s", self.timeout.as_secs()),
                    )
                } else {
                    AiBridgeError::provider(&self.name, format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if is_credential_failure(status) {
            return Err(AiBridgeError::credential(&self.name, format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiBridgeError::provider(
                &self.name,
                format!("HTTP {status}: {}", excerpt(&body)),
            ));
        }

        let body: Value = response.json().await.map_err(|e| {
            AiBridgeError::provider(&self.name, format!("invalid JSON response: {e}"))
        })?;

        self.adapter.extract_text(&body).ok_or_else(|| {
            AiBridgeError::provider(&self.name, "response envelope carries no text")
        })
    }
}

#[async_trait]
impl TransformProvider for AutomaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(provider = %self.name, prompt_chars = prompt.chars().count()))]
    async fn call(&self, prompt: &str) -> Result<String> {
        loop {
            let Some(credential) = self.pool.pick() else {
                return Err(AiBridgeError::NoCredentials {
                    provider: self.name.clone(),
                });
            };
            debug!(key = %mask_credential(&credential), "sending batch");

            match self.attempt(&credential, prompt).await {
                Err(AiBridgeError::Credential { message, .. }) => {
                    warn!(
                        key = %mask_credential(&credential),
                        reason = %message,
                        remaining = self.pool.available().saturating_sub(1),
                        "credential rejected, rotating"
                    );
                    self.pool.retire(&credential);
                }
                other => return other,
            }
        }
    }

    fn begin_run(&self) {
        self.pool.reset();
    }
}

fn is_credential_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    )
}

fn excerpt(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}
