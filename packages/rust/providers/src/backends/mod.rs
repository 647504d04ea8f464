//! Per-API request builders and response envelope readers.
//!
//! Every automatic backend speaks "prompt in, text out"; adapters only differ in
//! endpoint, auth header, body shape, and where the assistant text sits in the
//! response JSON.

mod anthropic;
mod gemini;
mod openai;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use aibridge_shared::{BackendKind, ModelParams};

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiCompatibleAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Request parameters shared by all adapters.
#[derive(Debug, Clone, Copy)]
pub struct CallSpec<'a> {
    pub base_url: &'a str,
    pub model: &'a str,
    pub credential: &'a str,
    pub prompt: &'a str,
    pub params: &'a ModelParams,
}

/// Wire format of one API family.
pub trait BackendAdapter: Send + Sync {
    /// Adapter name for tracing.
    fn name(&self) -> &str;

    /// Endpoint root used when the provider config has no `base_url`.
    fn default_base_url(&self) -> &str;

    /// Build the HTTP request for one prompt.
    fn build_request(&self, client: &Client, spec: &CallSpec<'_>) -> RequestBuilder;

    /// Pull the assistant text out of a success envelope.
    fn extract_text(&self, body: &Value) -> Option<String>;
}

/// Pick the adapter for a configured backend.
pub fn adapter_for(kind: BackendKind) -> Box<dyn BackendAdapter> {
    match kind {
        BackendKind::OpenAi => Box::new(OpenAiCompatibleAdapter::openai()),
        BackendKind::Grok => Box::new(OpenAiCompatibleAdapter::grok()),
        BackendKind::Perplexity => Box::new(OpenAiCompatibleAdapter::perplexity()),
        BackendKind::Anthropic => Box::new(AnthropicAdapter),
        BackendKind::Gemini => Box::new(GeminiAdapter),
    }
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Concatenate the `text` fields of a JSON array of content parts.
pub(crate) fn join_text_parts(parts: &Value) -> Option<String> {
    let texts: Vec<&str> = parts
        .as_array()?
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!texts.is_empty()).then(|| texts.concat())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("https://api.x.ai/v1/", "/chat/completions"),
            "https://api.x.ai/v1/chat/completions"
        );
        assert_eq!(endpoint("http://h", "a"), "http://h/a");
    }

    #[test]
    fn adapter_selection() {
        assert_eq!(adapter_for(BackendKind::Grok).name(), "grok");
        assert_eq!(adapter_for(BackendKind::Anthropic).name(), "anthropic");
        assert!(adapter_for(BackendKind::Perplexity)
            .default_base_url()
            .contains("perplexity"));
    }

    #[test]
    fn text_parts_join() {
        let parts = serde_json::json!([{"text": "a"}, {"other": 1}, {"text": "b"}]);
        assert_eq!(join_text_parts(&parts).as_deref(), Some("ab"));
        assert!(join_text_parts(&serde_json::json!([])).is_none());
        assert!(join_text_parts(&serde_json::json!("x")).is_none());
    }
}
