use std::cell::Cell;
use std::fmt;
use std::path::Path;

use storyweave_contracts::events::{NullSink, PipelineEvent, ProgressSink};
use storyweave_contracts::model::{CaptionSet, Intake, IntakeMode, Narrative};
use storyweave_contracts::runs::summary::{now_utc_iso, RunSummary};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bundle::{bundle, bundle_sha256, Bundle};
use crate::caption::{AsticaCaptioner, CaptionProvider, DryrunCaptioner};
use crate::config::{EmptyCaptionPolicy, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::narrative::{DryrunNarrator, NarrativeProvider, OpenAiNarrator};
use crate::normalize::{normalize_intake, SkippedEntry};

pub fn new_run_id() -> String {
    format!("run-{}", Uuid::new_v4().simple())
}

/// Pipeline states. A run moves forward through these and always ends back
/// at `Idle`, whether it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Intake,
    Normalize,
    Encode,
    Caption,
    Narrate,
    Bundle,
    Ready,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Intake => "intake",
            Stage::Normalize => "normalize",
            Stage::Encode => "encode",
            Stage::Caption => "caption",
            Stage::Narrate => "narrate",
            Stage::Bundle => "bundle",
            Stage::Ready => "ready",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionFailure {
    pub index: usize,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub mode: IntakeMode,
    pub started_at: String,
    pub finished_at: String,
    pub images_processed: usize,
    pub captions: CaptionSet,
    pub caption_failures: Vec<CaptionFailure>,
    pub skipped: Vec<SkippedEntry>,
    pub narrative: Narrative,
    pub bundle: Bundle,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let bundle_sha256 = match bundle_sha256(&self.bundle.path) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(path = %self.bundle.path.display(), "bundle checksum failed: {err:#}");
                None
            }
        };
        RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            mode: self.mode,
            images_received: self.images_processed + self.skipped.len(),
            images_processed: self.images_processed,
            captions: self.captions.len(),
            caption_failures: self.caption_failures.len(),
            skipped: self.skipped.iter().map(|entry| entry.name.clone()).collect(),
            bundle_path: Some(self.bundle.path.to_string_lossy().to_string()),
            bundle_sha256,
            narrative_words: Some(self.narrative.word_count()),
        }
    }
}

/// Drives one intake through normalize, caption, narrate and bundle.
///
/// Images are captioned one at a time in submission order. A caption failure
/// is recorded and the batch moves on; narrative and bundle failures end the
/// run with no archive produced.
pub struct StoryPipeline {
    captioner: Box<dyn CaptionProvider>,
    narrator: Box<dyn NarrativeProvider>,
    sink: Box<dyn ProgressSink>,
    empty_captions: EmptyCaptionPolicy,
    stage: Cell<Stage>,
}

impl StoryPipeline {
    pub fn new(
        captioner: Box<dyn CaptionProvider>,
        narrator: Box<dyn NarrativeProvider>,
    ) -> Self {
        Self {
            captioner,
            narrator,
            sink: Box::new(NullSink),
            empty_captions: EmptyCaptionPolicy::default(),
            stage: Cell::new(Stage::Idle),
        }
    }

    /// Wires the HTTP-backed vision and narrative services from `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let captioner = AsticaCaptioner::new(config.vision.clone())?;
        let narrator = OpenAiNarrator::new(config.narrative.clone())?;
        Ok(Self::new(Box::new(captioner), Box::new(narrator))
            .with_empty_caption_policy(config.empty_captions))
    }

    /// Offline providers; no credentials or network needed.
    pub fn dryrun() -> Self {
        Self::new(Box::new(DryrunCaptioner), Box::new(DryrunNarrator))
    }

    pub fn with_sink(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_empty_caption_policy(mut self, policy: EmptyCaptionPolicy) -> Self {
        self.empty_captions = policy;
        self
    }

    /// Stage the pipeline is in right now; `Idle` outside of a run.
    pub fn stage(&self) -> Stage {
        self.stage.get()
    }

    pub fn provider_names(&self) -> (&str, &str) {
        (self.captioner.name(), self.narrator.name())
    }

    pub fn run(&self, intake: Intake, out_path: &Path) -> Result<RunReport> {
        self.run_with_id(new_run_id(), intake, out_path)
    }

    /// Same as [`StoryPipeline::run`] with a caller-chosen run id, so event
    /// logs opened before the run can carry it.
    pub fn run_with_id(
        &self,
        run_id: String,
        intake: Intake,
        out_path: &Path,
    ) -> Result<RunReport> {
        let started_at = now_utc_iso();
        let mode = intake.mode();
        self.enter(Stage::Idle, &run_id);
        self.enter(Stage::Intake, &run_id);
        self.sink.emit(&PipelineEvent::RunStarted { mode });

        self.enter(Stage::Normalize, &run_id);
        let batch = normalize_intake(intake).map_err(|err| self.fail(Stage::Normalize, err))?;
        for entry in &batch.skipped {
            self.sink.emit(&PipelineEvent::ImageSkipped {
                name: entry.name.clone(),
                reason: entry.reason.clone(),
            });
        }
        self.sink.emit(&PipelineEvent::IntakeAccepted {
            mode,
            count: batch.items.len(),
        });
        info!(
            run_id = %run_id,
            mode = %mode,
            accepted = batch.items.len(),
            skipped = batch.skipped.len(),
            "intake normalized"
        );

        let mut captions = CaptionSet::new();
        let mut caption_failures = Vec::new();
        for (index, item) in batch.items.iter().enumerate() {
            self.enter(Stage::Encode, &run_id);
            let encoded = item.encode();
            self.enter(Stage::Caption, &run_id);
            self.sink.emit(&PipelineEvent::CaptionStarted {
                index,
                name: item.name.clone(),
            });
            match self.captioner.caption(&encoded) {
                Ok(pair) => {
                    captions.push(pair);
                    self.sink.emit(&PipelineEvent::CaptionSucceeded {
                        index,
                        name: item.name.clone(),
                    });
                }
                Err(err) => {
                    warn!(run_id = %run_id, index, name = %item.name, "caption failed: {err}");
                    let message = match err {
                        PipelineError::CaptionService(message) => message,
                        other => other.to_string(),
                    };
                    self.sink.emit(&PipelineEvent::CaptionFailed {
                        index,
                        name: item.name.clone(),
                        message: message.clone(),
                    });
                    caption_failures.push(CaptionFailure {
                        index,
                        name: item.name.clone(),
                        message,
                    });
                }
            }
        }

        self.enter(Stage::Narrate, &run_id);
        if captions.is_empty() {
            match self.empty_captions {
                EmptyCaptionPolicy::FailFast => {
                    return Err(self.fail(Stage::Narrate, PipelineError::NoCaptions));
                }
                EmptyCaptionPolicy::Degrade => {
                    warn!(run_id = %run_id, "requesting a narrative for an empty caption set");
                }
            }
        }
        self.sink.emit(&PipelineEvent::NarrativeStarted {
            captions: captions.len(),
        });
        let narrative = self
            .narrator
            .narrate(&captions)
            .map_err(|err| self.fail(Stage::Narrate, err))?;
        self.sink.emit(&PipelineEvent::NarrativeReady {
            words: narrative.word_count(),
        });

        self.enter(Stage::Bundle, &run_id);
        let bundle = bundle(&narrative, &batch.items, out_path)
            .map_err(|err| self.fail(Stage::Bundle, err))?;
        self.sink.emit(&PipelineEvent::BundleWritten {
            path: bundle.path.to_string_lossy().to_string(),
            entries: bundle.entries.len(),
        });

        self.enter(Stage::Ready, &run_id);
        self.sink.emit(&PipelineEvent::RunFinished {
            images: batch.items.len(),
            captions: captions.len(),
        });
        self.enter(Stage::Idle, &run_id);

        Ok(RunReport {
            run_id,
            mode,
            started_at,
            finished_at: now_utc_iso(),
            images_processed: batch.items.len(),
            captions,
            caption_failures,
            skipped: batch.skipped,
            narrative,
            bundle,
        })
    }

    fn enter(&self, stage: Stage, run_id: &str) {
        debug!(run_id, stage = %stage, "entering stage");
        self.stage.set(stage);
    }

    fn fail(&self, stage: Stage, err: PipelineError) -> PipelineError {
        warn!(stage = %stage, kind = err.kind(), "run failed: {err}");
        self.stage.set(Stage::Idle);
        self.sink.emit(&PipelineEvent::RunFailed {
            stage: stage.as_str().to_string(),
            message: err.to_string(),
        });
        err
    }
}
