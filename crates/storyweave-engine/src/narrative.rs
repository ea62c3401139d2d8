use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use storyweave_contracts::model::{CaptionSet, Narrative};
use tracing::debug;

use crate::config::NarrativeConfig;
use crate::error::{PipelineError, Result};

/// Fixed system instruction sent with every narrative request.
pub const STORY_PRIMER: &str = "\
Memories are cherished by all people; they are what drives us. You are a teller of \
memorable stories. You will be given captions that describe images, each paired with \
a longer narrative description of the same image. Follow these rules:
    1. Merge the captions and descriptions into one memorable story, using only the \
context given.
    2. Return only the story itself, with no captions or headers.
    3. The story must capture every element identified in the images.
    4. The story must be complete and coherent.
    5. The story must be at most 1000 words long.";

const CAPTION_DELIMITER: &str = "\n------\n";

pub trait NarrativeProvider {
    fn name(&self) -> &str;
    fn narrate(&self, captions: &CaptionSet) -> Result<Narrative>;
}

/// One block per caption pair, in set order, joined by newlines.
pub fn build_story_prompt(captions: &CaptionSet) -> String {
    captions
        .iter()
        .map(|pair| {
            format!(
                "'Caption': {} {CAPTION_DELIMITER} 'Narrative': {}\n---\n",
                pair.short, pair.detailed
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}

/// Chat-completions narrator. The whole caption set goes out in a single
/// request with sampling pinned to temperature 0.
pub struct OpenAiNarrator {
    config: NarrativeConfig,
    http: HttpClient,
}

impl OpenAiNarrator {
    pub fn new(config: NarrativeConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| PipelineError::Config(format!("narrative HTTP client: {err}")))?;
        Ok(Self { config, http })
    }

    fn request_payload(&self, captions: &CaptionSet) -> Value {
        json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": STORY_PRIMER},
                {"role": "user", "content": build_story_prompt(captions)},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }
}

impl NarrativeProvider for OpenAiNarrator {
    fn name(&self) -> &str {
        "openai"
    }

    fn narrate(&self, captions: &CaptionSet) -> Result<Narrative> {
        let endpoint = self.config.chat_completions_endpoint();
        debug!(
            endpoint = %endpoint,
            model = %self.config.model,
            captions = captions.len(),
            "requesting narrative"
        );
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(self.config.api_key.expose())
            .header(CONTENT_TYPE, "application/json")
            .json(&self.request_payload(captions))
            .send()
            .map_err(|err| {
                PipelineError::NarrativeService(format!("request to {endpoint} failed: {err}"))
            })?;

        let status = response.status();
        let body = response.text().map_err(|err| {
            PipelineError::NarrativeService(format!("response body read failed: {err}"))
        })?;
        if !status.is_success() {
            return Err(PipelineError::NarrativeService(format!(
                "request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            )));
        }
        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            PipelineError::NarrativeService(format!("invalid JSON payload: {err}"))
        })?;
        extract_completion_text(&parsed)
            .map(Narrative::new)
            .ok_or_else(|| {
                PipelineError::NarrativeService("completion contained no content".to_string())
            })
    }
}

/// Text of the first choice exactly as returned, if it is present and not blank.
pub fn extract_completion_text(response: &Value) -> Option<String> {
    let text = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)?;
    if text.trim().is_empty() {
        return None;
    }
    Some(text.to_string())
}

/// Offline narrator for dry runs: strings the short captions together.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunNarrator;

impl NarrativeProvider for DryrunNarrator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn narrate(&self, captions: &CaptionSet) -> Result<Narrative> {
        if captions.is_empty() {
            return Ok(Narrative::new(
                "There were no pictures to tell a story about.",
            ));
        }
        let moments = captions
            .iter()
            .map(|pair| pair.short.trim().trim_end_matches('.').to_string())
            .collect::<Vec<String>>()
            .join(". Then, ");
        Ok(Narrative::new(format!(
            "This story gathers {} pictures. {moments}.",
            captions.len()
        )))
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
