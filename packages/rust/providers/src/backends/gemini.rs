//! Google Gemini `generateContent`.

use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};

use super::{BackendAdapter, CallSpec, endpoint, join_text_parts};

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl BackendAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn default_base_url(&self) -> &str {
        "https://generativelanguage.googleapis.com/v1beta"
    }

    fn build_request(&self, client: &Client, spec: &CallSpec<'_>) -> RequestBuilder {
        let body = json!({
            "contents": [{ "parts": [{ "text": spec.prompt }] }],
            "generationConfig": {
                "temperature": spec.params.temperature,
                "maxOutputTokens": spec.params.max_tokens,
                "topP": spec.params.top_p,
                "topK": spec.params.top_k,
            },
        });

        // Header auth keeps the key out of URLs and request logs.
        client
            .post(endpoint(
                spec.base_url,
                &format!("models/{}:generateContent", spec.model),
            ))
            .header("x-goog-api-key", spec.credential)
            .json(&body)
    }

    fn extract_text(&self, body: &Value) -> Option<String> {
        join_text_parts(body.pointer("/candidates/0/content/parts")?)
    }
}
