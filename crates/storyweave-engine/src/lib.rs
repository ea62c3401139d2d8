//! Image-to-story pipeline: normalize uploads, caption each image with a
//! vision service, turn the captions into one narrative with a language
//! model, and bundle the narrative with the images into a zip archive.

pub mod bundle;
pub mod caption;
pub mod config;
pub mod encode;
pub mod error;
pub mod narrative;
pub mod normalize;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_support;

pub use bundle::{bundle, read_bundle_entries, Bundle, NARRATIVE_ENTRY};
pub use caption::{AsticaCaptioner, CaptionProvider, DryrunCaptioner};
pub use config::{EmptyCaptionPolicy, NarrativeConfig, PipelineConfig, Secret, VisionConfig};
pub use encode::{encode, EncodedImage};
pub use error::{PipelineError, Result};
pub use narrative::{build_story_prompt, DryrunNarrator, NarrativeProvider, OpenAiNarrator};
pub use normalize::{normalize_intake, normalize_upload, read_archive, ImageItem, NormalizedBatch, SkippedEntry};
pub use pipeline::{new_run_id, CaptionFailure, RunReport, Stage, StoryPipeline};
