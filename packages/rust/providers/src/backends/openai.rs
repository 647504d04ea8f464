//! OpenAI chat-completions wire format, also spoken by Grok and Perplexity.

use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};

use super::{BackendAdapter, CallSpec, endpoint};

/// Adapter for any `/chat/completions` endpoint with bearer auth.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleAdapter {
    name: &'static str,
    base_url: &'static str,
    /// Whether the API accepts the `top_k` sampling field.
    top_k: bool,
}

impl OpenAiCompatibleAdapter {
    pub fn openai() -> Self {
        Self {
            name: "openai",
            base_url: "https://api.openai.com/v1",
            top_k: false,
        }
    }

    pub fn grok() -> Self {
        Self {
            name: "grok",
            base_url: "https://api.x.ai/v1",
            top_k: false,
        }
    }

    pub fn perplexity() -> Self {
        Self {
            name: "perplexity",
            base_url: "https://api.perplexity.ai",
            top_k: true,
        }
    }
}

impl BackendAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn default_base_url(&self) -> &str {
        self.base_url
    }

    fn build_request(&self, client: &Client, spec: &CallSpec<'_>) -> RequestBuilder {
        let mut body = json!({
            "model": spec.model,
            "messages": [{ "role": "user", "content": spec.prompt }],
            "max_tokens": spec.params.max_tokens,
            "temperature": spec.params.temperature,
            "top_p": spec.params.top_p,
        });
        if self.top_k {
            body["top_k"] = json!(spec.params.top_k);
        }

        client
            .post(endpoint(spec.base_url, "chat/completions"))
            .bearer_auth(spec.credential)
            .json(&body)
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}
