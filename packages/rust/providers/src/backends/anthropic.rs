//! Anthropic Messages API.

use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};

use super::{BackendAdapter, CallSpec, endpoint, join_text_parts};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl BackendAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_base_url(&self) -> &str {
        "https://api.anthropic.com/v1"
    }

    fn build_request(&self, client: &Client, spec: &CallSpec<'_>) -> RequestBuilder {
        let body = json!({
            "model": spec.model,
            "max_tokens": spec.params.max_tokens,
            "temperature": spec.params.temperature,
            "top_p": spec.params.top_p,
            "top_k": spec.params.top_k,
            "messages": [{ "role": "user", "content": spec.prompt }],
        });

        client
            .post(endpoint(spec.base_url, "messages"))
            .header("x-api-key", spec.credential)
            .header("anthropic-version", API_VERSION)
            .json(&body)
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        join_text_parts(body.get("content")?)
    }
}
