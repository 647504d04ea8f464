//! Prompt templates and per-batch filling.

use std::collections::BTreeMap;

use aibridge_shared::AppConfig;

/// Placeholder replaced with the row-count sentence.
const COUNT_PLACEHOLDER: &str = "{count_info}";

/// Placeholder replaced with the encoded batch.
const TEXT_PLACEHOLDER: &str = "{text}";

/// Appended to stored prompts that carry no placeholders of their own.
const NUMBERING_SUFFIX: &str =
    "\n{count_info}\nKeep the numbering format of the source (1., 2., ...).\n{text}";

/// Lookup of prompt templates by source identifier and prompt type.
pub trait PromptSource: Send + Sync {
    /// Template for `source_id` (e.g. a language code) and `prompt_type`,
    /// or `None` when nothing is configured.
    fn template(&self, source_id: &str, prompt_type: &str) -> Option<String>;
}

/// Config-backed prompt store: `[prompts.<type>] <LANG> = "..."`.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    prompts: BTreeMap<String, BTreeMap<String, String>>,
}

impl PromptLibrary {
    pub fn new(prompts: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self { prompts }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.prompts.clone())
    }
}

impl PromptSource for PromptLibrary {
    fn template(&self, source_id: &str, prompt_type: &str) -> Option<String> {
        let prompt = self
            .prompts
            .get(prompt_type)?
            .get(source_id)
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())?;

        if prompt.contains(TEXT_PLACEHOLDER) {
            Some(prompt.to_string())
        } else {
            Some(format!("{prompt}{NUMBERING_SUFFIX}"))
        }
    }
}

/// Sentence telling the model how many numbered lines to expect.
pub fn count_info(count: usize) -> String {
    format!("Source text consists of {count} numbered lines from 1 to {count}.")
}

/// Fill a template for one batch.
pub fn fill_template(template: &str, count: usize, body: &str) -> String {
    template
        .replace(COUNT_PLACEHOLDER, &count_info(count))
        .replace(TEXT_PLACEHOLDER, body)
}
