use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use storyweave_contracts::model::CaptionPair;
use tracing::{debug, warn};

use crate::config::VisionConfig;
use crate::encode::EncodedImage;
use crate::error::{PipelineError, Result};

/// Message reported for any transport failure or non-2xx answer.
pub const CONNECT_FAILURE_MESSAGE: &str = "Failed to connect to the API.";

pub trait CaptionProvider {
    fn name(&self) -> &str;
    fn caption(&self, image: &EncodedImage) -> Result<CaptionPair>;
}

/// Vision captioning over the astica `describe` endpoint. One POST per
/// image, no retries; a timeout surfaces as a caption failure.
pub struct AsticaCaptioner {
    config: VisionConfig,
    http: HttpClient,
}

impl AsticaCaptioner {
    pub fn new(config: VisionConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| PipelineError::Config(format!("vision HTTP client: {err}")))?;
        Ok(Self { config, http })
    }

    fn request_payload(&self, image: &EncodedImage) -> Value {
        json!({
            "tkn": self.config.token.expose(),
            "modelVersion": self.config.model_version,
            "visionParams": self.config.vision_params,
            "input": image.data_url(),
        })
    }
}

impl CaptionProvider for AsticaCaptioner {
    fn name(&self) -> &str {
        "astica"
    }

    fn caption(&self, image: &EncodedImage) -> Result<CaptionPair> {
        let endpoint = self.config.endpoint.as_str();
        debug!(
            endpoint,
            mime = image.mime_type(),
            payload_bytes = image.payload_len(),
            "requesting caption"
        );
        let response = self
            .http
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .json(&self.request_payload(image))
            .send()
            .map_err(|err| {
                warn!(endpoint, "vision request failed: {err}");
                PipelineError::CaptionService(CONNECT_FAILURE_MESSAGE.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint, status = status.as_u16(), "vision service rejected request");
            return Err(PipelineError::CaptionService(
                CONNECT_FAILURE_MESSAGE.to_string(),
            ));
        }

        let body: Value = response.json().map_err(|err| {
            PipelineError::CaptionService(format!("vision service returned invalid JSON: {err}"))
        })?;
        parse_caption_response(&body)
    }
}

/// Reads `status`, `error`, `caption.text` and `caption_GPTS` from a
/// describe response.
pub fn parse_caption_response(body: &Value) -> Result<CaptionPair> {
    match body.get("status").and_then(Value::as_str) {
        Some("success") => {
            let short = body
                .pointer("/caption/text")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let detailed = body
                .get("caption_GPTS")
                .and_then(Value::as_str)
                .unwrap_or_default();
            CaptionPair::new(short, detailed).ok_or_else(|| {
                let missing = if short.trim().is_empty() {
                    "caption.text"
                } else {
                    "caption_GPTS"
                };
                PipelineError::CaptionService(format!("response is missing {missing}"))
            })
        }
        Some("error") => {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(PipelineError::CaptionService(message.to_string()))
        }
        Some(other) => Err(PipelineError::CaptionService(format!(
            "unexpected status '{other}'"
        ))),
        None => Err(PipelineError::CaptionService("invalid response".to_string())),
    }
}

/// Offline captioner for dry runs; output depends only on the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunCaptioner;

impl CaptionProvider for DryrunCaptioner {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn caption(&self, image: &EncodedImage) -> Result<CaptionPair> {
        let short = format!("A picture stored as {}", image.mime_type());
        let detailed = format!(
            "A {} picture carried in {} characters of base64.",
            image.mime_type(),
            image.payload_len()
        );
        CaptionPair::new(short, detailed)
            .ok_or_else(|| PipelineError::CaptionService("dryrun produced a blank caption".to_string()))
    }
}
