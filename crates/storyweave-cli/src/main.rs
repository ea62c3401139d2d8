use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use storyweave_contracts::events::{EventWriter, FanoutSink, PipelineEvent};
use storyweave_contracts::model::{Intake, UploadedImage};
use storyweave_contracts::runs::summary::write_summary;
use storyweave_engine::bundle::{read_bundle_entries, read_bundle_text, NARRATIVE_ENTRY};
use storyweave_engine::{new_run_id, EmptyCaptionPolicy, PipelineConfig, StoryPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "storyweave",
    version,
    about = "Caption a set of pictures and weave them into one story"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Caption images, generate a narrative and write the bundle archive.
    Run(RunArgs),
    /// List the entries of a bundle archive.
    Inspect(InspectArgs),
}

#[derive(Debug, Parser)]
#[command(group(ArgGroup::new("intake").required(true).args(["images", "archive"])))]
struct RunArgs {
    /// Individual PNG/JPEG files, captioned in the order given.
    #[arg(long, num_args = 1.., value_name = "FILE")]
    images: Vec<PathBuf>,
    /// A zip archive containing the images.
    #[arg(long, value_name = "ZIP")]
    archive: Option<PathBuf>,
    #[arg(long, default_value = "bundle.zip")]
    out: PathBuf,
    /// Append progress events as JSON lines.
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    summary: Option<PathBuf>,
    /// Use offline captioning and narration; no credentials needed.
    #[arg(long)]
    dryrun: bool,
    /// Request a narrative even when no image could be captioned.
    #[arg(long)]
    allow_empty_captions: bool,
    #[arg(long)]
    narrative_model: Option<String>,
}

#[derive(Debug, Parser)]
struct InspectArgs {
    bundle: PathBuf,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("storyweave error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("storyweave_cli=info,storyweave_engine=info,storyweave_contracts=info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_story(args),
        Command::Inspect(args) => run_inspect(args),
    }
}

fn run_story(args: RunArgs) -> Result<i32> {
    let policy = if args.allow_empty_captions {
        EmptyCaptionPolicy::Degrade
    } else {
        EmptyCaptionPolicy::FailFast
    };
    let pipeline = if args.dryrun {
        StoryPipeline::dryrun().with_empty_caption_policy(policy)
    } else {
        dotenvy::dotenv().ok();
        let mut config = PipelineConfig::from_lookup(|key| env::var(key).ok())
            .context("loading service credentials")?;
        if let Some(model) = args.narrative_model.clone() {
            config.narrative.model = model;
        }
        config.empty_captions = policy;
        config.log_redacted();
        StoryPipeline::from_config(&config)?
    };

    let intake = read_intake(&args.images, args.archive.as_deref())?;
    let run_id = new_run_id();
    let (captioner, narrator) = pipeline.provider_names();
    tracing::info!(run_id = %run_id, captioner, narrator, mode = %intake.mode(), "starting run");
    let mut sink = FanoutSink::new();
    sink.push(Box::new(print_notice));
    if let Some(path) = args.events.as_ref() {
        sink.push(Box::new(EventWriter::new(path, run_id.as_str())));
    }
    let pipeline = pipeline.with_sink(Box::new(sink));

    let report = pipeline
        .run_with_id(run_id, intake, &args.out)
        .context("story run failed")?;

    println!("{}", report.narrative);
    eprintln!("Bundle ready: {}", report.bundle.path.display());
    if let Some(path) = args.summary.as_ref() {
        write_summary(path, &report.summary(), None)
            .with_context(|| format!("writing summary {}", path.display()))?;
    }
    Ok(0)
}

fn read_intake(images: &[PathBuf], archive: Option<&Path>) -> Result<Intake> {
    match (images.is_empty(), archive) {
        (false, None) => {
            let mut uploads = Vec::with_capacity(images.len());
            for path in images {
                let bytes =
                    fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
                uploads.push(UploadedImage::new(bytes, display_name(path)));
            }
            Ok(Intake::Files(uploads))
        }
        (true, Some(path)) => {
            let bytes =
                fs::read(path).with_context(|| format!("reading archive {}", path.display()))?;
            Ok(Intake::Archive {
                name: display_name(path),
                bytes,
            })
        }
        (false, Some(_)) => bail!("choose either --images or --archive, not both"),
        (true, None) => bail!("no images given; pass --images or --archive"),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn print_notice(event: &PipelineEvent) {
    if let Some(line) = notice_text(event) {
        eprintln!("{line}");
    }
}

/// User-facing status line for the events worth showing on a terminal.
fn notice_text(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::IntakeAccepted { mode, count } => Some(match mode {
            storyweave_contracts::model::IntakeMode::Files => {
                format!("Processed {count} images.")
            }
            storyweave_contracts::model::IntakeMode::Archive => {
                format!("Extracted {count} images from the archive.")
            }
        }),
        PipelineEvent::ImageSkipped { name, reason } => {
            Some(format!("Skipped {name}: {reason}"))
        }
        PipelineEvent::CaptionFailed { name, message, .. } => {
            Some(format!("Could not caption {name}: {message}"))
        }
        PipelineEvent::RunFailed { stage, message } => {
            Some(format!("Run stopped during {stage}: {message}"))
        }
        _ => None,
    }
}

fn run_inspect(args: InspectArgs) -> Result<i32> {
    let entries = read_bundle_entries(&args.bundle)
        .with_context(|| format!("reading bundle {}", args.bundle.display()))?;
    for entry in &entries {
        println!("{entry}");
    }
    if entries.iter().any(|entry| entry == NARRATIVE_ENTRY) {
        let narrative = read_bundle_text(&args.bundle, NARRATIVE_ENTRY)?;
        eprintln!(
            "{} entries; narrative has {} words",
            entries.len(),
            narrative.split_whitespace().count()
        );
        Ok(0)
    } else {
        eprintln!("{} is missing {NARRATIVE_ENTRY}", args.bundle.display());
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;
    use storyweave_contracts::events::PipelineEvent;
    use storyweave_contracts::model::{Intake, IntakeMode};

    use super::{notice_text, read_intake, run_inspect, run_story, Cli, Command, InspectArgs};

    #[test]
    fn intake_modes_are_mutually_exclusive() {
        let err = Cli::try_parse_from([
            "storyweave",
            "run",
            "--images",
            "a.png",
            "--archive",
            "b.zip",
        ]);
        assert!(err.is_err());

        let missing = Cli::try_parse_from(["storyweave", "run"]);
        assert!(missing.is_err());
    }

    #[test]
    fn parses_image_list_and_defaults() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "storyweave",
            "run",
            "--images",
            "a.png",
            "b.jpg",
            "--dryrun",
        ])?;
        let Command::Run(args) = cli.command else {
            anyhow::bail!("expected run command");
        };
        assert_eq!(args.images.len(), 2);
        assert!(args.archive.is_none());
        assert!(args.dryrun);
        assert_eq!(args.out.to_string_lossy(), "bundle.zip");
        Ok(())
    }

    #[test]
    fn reads_files_in_given_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let first = temp.path().join("z.png");
        let second = temp.path().join("a.jpg");
        fs::write(&first, b"one")?;
        fs::write(&second, b"two")?;

        let Intake::Files(uploads) = read_intake(&[first, second], None)? else {
            anyhow::bail!("expected file intake");
        };
        let names: Vec<&str> = uploads
            .iter()
            .map(|upload| upload.original_name.as_str())
            .collect();
        assert_eq!(names, vec!["z.png", "a.jpg"]);
        assert_eq!(uploads[1].bytes, b"two");
        Ok(())
    }

    #[test]
    fn reads_archive_bytes_with_its_name() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("photos.zip");
        fs::write(&path, b"PK")?;
        let intake = read_intake(&[], Some(&path))?;
        assert_eq!(intake.mode(), IntakeMode::Archive);
        let Intake::Archive { name, bytes } = intake else {
            anyhow::bail!("expected archive intake");
        };
        assert_eq!(name, "photos.zip");
        assert_eq!(bytes, b"PK");
        Ok(())
    }

    #[test]
    fn notices_cover_failures_and_counts() {
        assert_eq!(
            notice_text(&PipelineEvent::IntakeAccepted {
                mode: IntakeMode::Archive,
                count: 4
            })
            .as_deref(),
            Some("Extracted 4 images from the archive.")
        );
        assert_eq!(
            notice_text(&PipelineEvent::CaptionFailed {
                index: 0,
                name: "a.png".to_string(),
                message: "x".to_string(),
            })
            .as_deref(),
            Some("Could not caption a.png: x")
        );
        assert!(notice_text(&PipelineEvent::NarrativeStarted { captions: 1 }).is_none());
    }

    #[test]
    fn dryrun_with_no_usable_images_still_bundles_when_allowed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("fake.png");
        fs::write(&image, b"not really a png")?;
        let out = temp.path().join("out").join("bundle.zip");
        let events = temp.path().join("events.jsonl");
        let summary = temp.path().join("summary.json");

        let cli = Cli::try_parse_from([
            "storyweave".to_string(),
            "run".to_string(),
            "--images".to_string(),
            image.to_string_lossy().to_string(),
            "--out".to_string(),
            out.to_string_lossy().to_string(),
            "--events".to_string(),
            events.to_string_lossy().to_string(),
            "--summary".to_string(),
            summary.to_string_lossy().to_string(),
            "--dryrun".to_string(),
            "--allow-empty-captions".to_string(),
        ])?;
        let Command::Run(args) = cli.command else {
            anyhow::bail!("expected run command");
        };
        assert_eq!(run_story(args)?, 0);
        assert!(out.exists());

        let log = fs::read_to_string(&events)?;
        assert!(log.contains("\"type\":\"image_skipped\""));
        assert!(log.contains("\"type\":\"run_finished\""));
        let summary: serde_json::Value = serde_json::from_str(&fs::read_to_string(&summary)?)?;
        assert_eq!(summary["images_processed"], 0);
        assert_eq!(summary["skipped"][0], "fake.png");

        assert_eq!(run_inspect(InspectArgs { bundle: out })?, 0);
        Ok(())
    }

    #[test]
    fn dryrun_with_no_usable_images_fails_fast_by_default() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("fake.jpg");
        fs::write(&image, b"nope")?;
        let out = temp.path().join("bundle.zip");

        let cli = Cli::try_parse_from([
            "storyweave".to_string(),
            "run".to_string(),
            "--images".to_string(),
            image.to_string_lossy().to_string(),
            "--out".to_string(),
            out.to_string_lossy().to_string(),
            "--dryrun".to_string(),
        ])?;
        let Command::Run(args) = cli.command else {
            anyhow::bail!("expected run command");
        };
        let err = run_story(args).unwrap_err();
        assert!(format!("{err:#}").contains("no captions"));
        assert!(!out.exists());
        Ok(())
    }
}
