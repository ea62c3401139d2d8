use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::IntakeMode;
use crate::runs::summary::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Progress of one pipeline run, in the order the stages happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        mode: IntakeMode,
    },
    IntakeAccepted {
        mode: IntakeMode,
        count: usize,
    },
    ImageSkipped {
        name: String,
        reason: String,
    },
    CaptionStarted {
        index: usize,
        name: String,
    },
    CaptionSucceeded {
        index: usize,
        name: String,
    },
    CaptionFailed {
        index: usize,
        name: String,
        message: String,
    },
    NarrativeStarted {
        captions: usize,
    },
    NarrativeReady {
        words: usize,
    },
    BundleWritten {
        path: String,
        entries: usize,
    },
    RunFailed {
        stage: String,
        message: String,
    },
    RunFinished {
        images: usize,
        captions: usize,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "run_started",
            PipelineEvent::IntakeAccepted { .. } => "intake_accepted",
            PipelineEvent::ImageSkipped { .. } => "image_skipped",
            PipelineEvent::CaptionStarted { .. } => "caption_started",
            PipelineEvent::CaptionSucceeded { .. } => "caption_succeeded",
            PipelineEvent::CaptionFailed { .. } => "caption_failed",
            PipelineEvent::NarrativeStarted { .. } => "narrative_started",
            PipelineEvent::NarrativeReady { .. } => "narrative_ready",
            PipelineEvent::BundleWritten { .. } => "bundle_written",
            PipelineEvent::RunFailed { .. } => "run_failed",
            PipelineEvent::RunFinished { .. } => "run_finished",
        }
    }

    /// Event fields without the `type` tag.
    pub fn payload(&self) -> EventPayload {
        let mut payload = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        payload.remove("type");
        payload
    }
}

/// Consumer of pipeline progress. The pipeline never talks to a presentation
/// layer directly; it only emits into one of these.
pub trait ProgressSink {
    fn emit(&self, event: &PipelineEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&PipelineEvent),
{
    fn emit(&self, event: &PipelineEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// Forwards every event to each inner sink, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: &PipelineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}

impl ProgressSink for EventWriter {
    fn emit(&self, event: &PipelineEvent) {
        if let Err(err) = EventWriter::emit(self, event.event_type(), event.payload()) {
            tracing::warn!(
                path = %self.inner.path.display(),
                event = event.event_type(),
                "failed to append progress event: {err:#}"
            );
        }
    }
}
