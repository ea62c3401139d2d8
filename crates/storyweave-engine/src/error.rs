use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid image '{name}': {reason}")]
    InvalidImage { name: String, reason: String },

    #[error("unreadable archive '{name}': {reason}")]
    InvalidArchive { name: String, reason: String },

    #[error("caption service error: {0}")]
    CaptionService(String),

    #[error("narrative service error: {0}")]
    NarrativeService(String),

    #[error("no captions were produced; refusing to request an empty narrative")]
    NoCaptions,

    #[error("bundle write failed: {0}")]
    BundleWrite(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn invalid_image(name: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::InvalidImage {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn bundle_write(context: &str, err: impl std::fmt::Display) -> Self {
        PipelineError::BundleWrite(format!("{context}: {err}"))
    }

    /// Per-image failures leave the batch running; everything else ends the run.
    pub fn is_run_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::InvalidImage { .. } | PipelineError::CaptionService(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidImage { .. } => "invalid_image",
            PipelineError::InvalidArchive { .. } => "invalid_archive",
            PipelineError::CaptionService(_) => "caption_service_error",
            PipelineError::NarrativeService(_) => "narrative_service_error",
            PipelineError::NoCaptions => "no_captions",
            PipelineError::BundleWrite(_) => "bundle_write_error",
            PipelineError::Config(_) => "config_error",
        }
    }
}
