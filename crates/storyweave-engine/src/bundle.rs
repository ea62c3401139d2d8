use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use image::ImageFormat;
use sha2::{Digest, Sha256};
use storyweave_contracts::model::Narrative;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{PipelineError, Result};
use crate::normalize::ImageItem;

pub const NARRATIVE_ENTRY: &str = "narrative.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub path: PathBuf,
    pub entries: Vec<String>,
}

pub fn image_entry_name(index: usize) -> String {
    format!("image_{index}.png")
}

/// Writes `narrative.txt` followed by `image_<i>.png` for every item.
///
/// Each entry is staged in a scratch directory and removed as soon as it is
/// in the archive. The scratch directory and the in-progress archive are both
/// temp files, so an error at any point leaves nothing behind and never
/// replaces an existing file at `out_path` with a partial archive.
pub fn bundle(narrative: &Narrative, items: &[ImageItem], out_path: &Path) -> Result<Bundle> {
    let parent = out_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|err| PipelineError::bundle_write("create output directory", err))?;

    let staging = tempfile::Builder::new()
        .prefix("storyweave-bundle-")
        .tempdir()
        .map_err(|err| PipelineError::bundle_write("create staging directory", err))?;
    let archive_file = NamedTempFile::new_in(parent)
        .map_err(|err| PipelineError::bundle_write("create archive file", err))?;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(archive_file);
    let mut entries = Vec::with_capacity(items.len() + 1);

    let narrative_path = staged_path(&staging, NARRATIVE_ENTRY);
    fs::write(&narrative_path, narrative.as_str())
        .map_err(|err| PipelineError::bundle_write("stage narrative", err))?;
    add_staged_entry(&mut zip, &narrative_path, NARRATIVE_ENTRY, options)?;
    entries.push(NARRATIVE_ENTRY.to_string());

    for (index, item) in items.iter().enumerate() {
        let entry_name = image_entry_name(index);
        let image_path = staged_path(&staging, &entry_name);
        item.image
            .save_with_format(&image_path, ImageFormat::Png)
            .map_err(|err| {
                PipelineError::bundle_write(&format!("encode {} as {entry_name}", item.name), err)
            })?;
        add_staged_entry(&mut zip, &image_path, &entry_name, options)?;
        debug!(source = %item.name, entry = %entry_name, "bundled image");
        entries.push(entry_name);
    }

    let archive_file = zip
        .finish()
        .map_err(|err| PipelineError::bundle_write("finish archive", err))?;
    archive_file
        .persist(out_path)
        .map_err(|err| PipelineError::bundle_write("persist archive", err.error))?;

    info!(path = %out_path.display(), entries = entries.len(), "bundle written");
    Ok(Bundle {
        path: out_path.to_path_buf(),
        entries,
    })
}

fn staged_path(staging: &TempDir, entry_name: &str) -> PathBuf {
    staging.path().join(entry_name)
}

fn add_staged_entry<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    staged: &Path,
    entry_name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let mut source = File::open(staged)
        .map_err(|err| PipelineError::bundle_write(&format!("open staged {entry_name}"), err))?;
    zip.start_file(entry_name, options)
        .map_err(|err| PipelineError::bundle_write(&format!("start {entry_name}"), err))?;
    io::copy(&mut source, zip)
        .map_err(|err| PipelineError::bundle_write(&format!("write {entry_name}"), err))?;
    drop(source);
    fs::remove_file(staged)
        .map_err(|err| PipelineError::bundle_write(&format!("remove staged {entry_name}"), err))?;
    Ok(())
}

/// Entry names of an archive, in archive order.
pub fn read_bundle_entries(path: &Path) -> anyhow::Result<Vec<String>> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        names.push(archive.by_index(index)?.name().to_string());
    }
    Ok(names)
}

pub fn read_bundle_text(path: &Path, entry_name: &str) -> anyhow::Result<String> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut entry = archive.by_name(entry_name)?;
    let mut text = String::new();
    entry.read_to_string(&mut text)?;
    Ok(text)
}

pub fn bundle_sha256(path: &Path) -> anyhow::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
