use std::io::{Cursor, Read};
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use storyweave_contracts::model::{is_allowed_image_name, Intake, UploadedImage};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::encode::{encode, EncodedImage};
use crate::error::{PipelineError, Result};

/// A decoded, validated image owned by the pipeline for one run.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub name: String,
    /// Extension exactly as it appeared in the name, without the dot.
    pub extension: String,
    pub bytes: Vec<u8>,
    pub image: DynamicImage,
}

impl ImageItem {
    pub fn encode(&self) -> EncodedImage {
        encode(&self.bytes, &self.extension)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub items: Vec<ImageItem>,
    pub skipped: Vec<SkippedEntry>,
}

pub fn normalize_intake(intake: Intake) -> Result<NormalizedBatch> {
    match intake {
        Intake::Files(uploads) => Ok(normalize_uploads(uploads)),
        Intake::Archive { name, bytes } => read_archive(&name, bytes),
    }
}

fn normalize_uploads(uploads: Vec<UploadedImage>) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for upload in uploads {
        let name = upload.original_name.clone();
        match normalize_upload(upload) {
            Ok(item) => batch.items.push(item),
            Err(err) => {
                warn!(name = %name, "skipping upload: {err}");
                batch.skipped.push(SkippedEntry {
                    name,
                    reason: err.to_string(),
                });
            }
        }
    }
    batch
}

/// Decodes one upload. Only PNG and JPEG content under an allowlisted
/// extension is accepted.
pub fn normalize_upload(upload: UploadedImage) -> Result<ImageItem> {
    let UploadedImage {
        bytes,
        original_name,
    } = upload;
    if !is_allowed_image_name(&original_name) {
        return Err(PipelineError::invalid_image(
            original_name,
            "extension is not one of png, jpg, jpeg",
        ));
    }
    let format = match image::guess_format(&bytes) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => format,
        Ok(other) => {
            return Err(PipelineError::invalid_image(
                original_name,
                format!("unsupported image format {other:?}"),
            ))
        }
        Err(err) => return Err(PipelineError::invalid_image(original_name, err)),
    };
    let image = image::load_from_memory_with_format(&bytes, format)
        .map_err(|err| PipelineError::invalid_image(original_name.as_str(), err))?;
    let extension = Path::new(&original_name)
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_string();

    Ok(ImageItem {
        name: original_name,
        extension,
        bytes,
        image,
    })
}

/// Enumerates a zip archive in entry order and decodes every allowlisted
/// entry independently. Entries that are not images are ignored without a
/// trace in the batch; image entries that fail to read or decode land in
/// `skipped`. Only an unreadable container fails the call.
pub fn read_archive(archive_name: &str, bytes: Vec<u8>) -> Result<NormalizedBatch> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|err| PipelineError::InvalidArchive {
            name: archive_name.to_string(),
            reason: err.to_string(),
        })?;

    let mut batch = NormalizedBatch::default();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(archive = archive_name, index, "unreadable archive entry: {err}");
                batch.skipped.push(SkippedEntry {
                    name: format!("#{index}"),
                    reason: err.to_string(),
                });
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();
        if is_resource_fork(&entry_name) || !is_allowed_image_name(&entry_name) {
            debug!(archive = archive_name, entry = %entry_name, "ignoring non-image entry");
            continue;
        }

        let mut data = Vec::new();
        if let Err(err) = entry.read_to_end(&mut data) {
            warn!(archive = archive_name, entry = %entry_name, "failed reading entry: {err}");
            batch.skipped.push(SkippedEntry {
                name: entry_name,
                reason: err.to_string(),
            });
            continue;
        }
        drop(entry);

        match normalize_upload(UploadedImage::new(data, entry_name.clone())) {
            Ok(item) => batch.items.push(item),
            Err(err) => {
                warn!(archive = archive_name, entry = %entry_name, "{err}; entry skipped");
                batch.skipped.push(SkippedEntry {
                    name: entry_name,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok(batch)
}

fn is_resource_fork(entry_name: &str) -> bool {
    entry_name.starts_with("__MACOSX/")
}
