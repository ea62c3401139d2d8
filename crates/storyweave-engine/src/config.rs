use std::fmt;
use std::time::Duration;

use crate::error::{PipelineError, Result};

pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.astica.ai/describe";
pub const DEFAULT_VISION_MODEL_VERSION: &str = "2.1_full";
pub const DEFAULT_VISION_PARAMS: &str = "gpt, describe_all";
/// The vision service's GPT caption path is slow; 1000s matches its guidance.
pub const DEFAULT_VISION_TIMEOUT_SECS: u64 = 1000;

pub const DEFAULT_NARRATIVE_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_NARRATIVE_MODEL: &str = "gpt-4";
pub const NARRATIVE_TEMPERATURE: f64 = 0.0;
pub const NARRATIVE_MAX_TOKENS: u32 = 2000;
pub const DEFAULT_NARRATIVE_TIMEOUT_SECS: u64 = 300;

/// Credential wrapper whose `Debug`/`Display` never reveal the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub endpoint: String,
    pub token: Secret,
    pub model_version: String,
    pub vision_params: String,
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn new(token: Secret) -> Self {
        Self {
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            token,
            model_version: DEFAULT_VISION_MODEL_VERSION.to_string(),
            vision_params: DEFAULT_VISION_PARAMS.to_string(),
            timeout: Duration::from_secs(DEFAULT_VISION_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    pub api_base: String,
    pub api_key: Secret,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl NarrativeConfig {
    pub fn new(api_key: Secret) -> Self {
        Self {
            api_base: DEFAULT_NARRATIVE_API_BASE.to_string(),
            api_key,
            model: DEFAULT_NARRATIVE_MODEL.to_string(),
            temperature: NARRATIVE_TEMPERATURE,
            max_tokens: NARRATIVE_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_NARRATIVE_TIMEOUT_SECS),
        }
    }

    pub fn chat_completions_endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

/// What to do when every caption in a batch failed (or nothing was uploaded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyCaptionPolicy {
    /// Stop before the narrative request.
    #[default]
    FailFast,
    /// Send the empty caption set anyway and bundle whatever comes back.
    Degrade,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub vision: VisionConfig,
    pub narrative: NarrativeConfig,
    pub empty_captions: EmptyCaptionPolicy,
}

impl PipelineConfig {
    pub fn new(vision_token: Secret, narrative_key: Secret) -> Self {
        Self {
            vision: VisionConfig::new(vision_token),
            narrative: NarrativeConfig::new(narrative_key),
            empty_captions: EmptyCaptionPolicy::default(),
        }
    }

    /// Builds a config from a key lookup (normally the process environment).
    ///
    /// Tokens: `ASTICA_API_KEY`, `OPENAI_API_KEY`. Overrides:
    /// `STORYWEAVE_VISION_ENDPOINT`, `STORYWEAVE_VISION_TIMEOUT_SECS`,
    /// `OPENAI_API_BASE` / `OPENAI_BASE_URL`, `STORYWEAVE_NARRATIVE_MODEL`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vision_token = first_non_empty(&lookup, &["ASTICA_API_KEY"])
            .ok_or_else(|| PipelineError::Config("ASTICA_API_KEY is not set".to_string()))?;
        let narrative_key = first_non_empty(&lookup, &["OPENAI_API_KEY"])
            .ok_or_else(|| PipelineError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let mut config = Self::new(Secret::new(vision_token), Secret::new(narrative_key));
        if let Some(endpoint) = first_non_empty(&lookup, &["STORYWEAVE_VISION_ENDPOINT"]) {
            config.vision.endpoint = endpoint;
        }
        if let Some(raw) = first_non_empty(&lookup, &["STORYWEAVE_VISION_TIMEOUT_SECS"]) {
            let secs = raw.parse::<u64>().map_err(|_| {
                PipelineError::Config(format!(
                    "STORYWEAVE_VISION_TIMEOUT_SECS must be a whole number of seconds, got '{raw}'"
                ))
            })?;
            config.vision.timeout = Duration::from_secs(secs);
        }
        if let Some(base) = first_non_empty(&lookup, &["OPENAI_API_BASE", "OPENAI_BASE_URL"]) {
            config.narrative.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = first_non_empty(&lookup, &["STORYWEAVE_NARRATIVE_MODEL"]) {
            config.narrative.model = model;
        }
        Ok(config)
    }

    pub fn log_redacted(&self) {
        tracing::info!(
            vision_endpoint = %self.vision.endpoint,
            vision_model_version = %self.vision.model_version,
            vision_params = %self.vision.vision_params,
            vision_timeout_s = self.vision.timeout.as_secs(),
            vision_token = %self.vision.token,
            narrative_endpoint = %self.narrative.chat_completions_endpoint(),
            narrative_model = %self.narrative.model,
            narrative_key = %self.narrative.api_key,
            empty_captions = ?self.empty_captions,
            "pipeline configuration"
        );
    }
}

fn first_non_empty<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for &key in keys {
        if let Some(value) = lookup(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
