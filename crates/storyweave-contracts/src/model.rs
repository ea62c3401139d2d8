use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// File extensions accepted as images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Raw upload as it arrives from either intake mode.
///
/// Individual files and archive entries both become one of these, so later
/// stages never branch on where an image came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub original_name: String,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>, original_name: impl Into<String>) -> Self {
        Self {
            bytes,
            original_name: original_name.into(),
        }
    }

    /// Lowercased extension without the dot, if the name has one.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.original_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeMode {
    Files,
    Archive,
}

impl IntakeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            IntakeMode::Files => "files",
            IntakeMode::Archive => "archive",
        }
    }
}

impl fmt::Display for IntakeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run's input. The two modes are mutually exclusive.
#[derive(Debug, Clone)]
pub enum Intake {
    Files(Vec<UploadedImage>),
    Archive { name: String, bytes: Vec<u8> },
}

impl Intake {
    pub fn mode(&self) -> IntakeMode {
        match self {
            Intake::Files(_) => IntakeMode::Files,
            Intake::Archive { .. } => IntakeMode::Archive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionPair {
    pub short: String,
    pub detailed: String,
}

impl CaptionPair {
    /// Returns `None` when either caption is blank; a blank field means the
    /// extraction failed rather than the service describing nothing.
    pub fn new(short: impl Into<String>, detailed: impl Into<String>) -> Option<Self> {
        let short = short.into();
        let detailed = detailed.into();
        if short.trim().is_empty() || detailed.trim().is_empty() {
            return None;
        }
        Some(Self { short, detailed })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionSet {
    pairs: Vec<CaptionPair>,
}

impl CaptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pair: CaptionPair) {
        self.pairs.push(pair);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CaptionPair> {
        self.pairs.iter()
    }

    pub fn as_slice(&self) -> &[CaptionPair] {
        &self.pairs
    }
}

impl FromIterator<CaptionPair> for CaptionSet {
    fn from_iter<I: IntoIterator<Item = CaptionPair>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CaptionSet {
    type Item = &'a CaptionPair;
    type IntoIter = std::slice::Iter<'a, CaptionPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Narrative(String);

impl Narrative {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn word_count(&self) -> usize {
        self.0.split_whitespace().count()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Narrative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_ascii_lowercase())
}

pub fn is_allowed_image_name(name: &str) -> bool {
    extension_of(name)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::{extension_of, is_allowed_image_name, CaptionPair, CaptionSet, Intake, IntakeMode, Narrative};

    #[test]
    fn allowlist_is_case_insensitive() {
        assert!(is_allowed_image_name("beach.PNG"));
        assert!(is_allowed_image_name("trip/day1.Jpeg"));
        assert!(is_allowed_image_name("a.jpg"));
        assert!(!is_allowed_image_name("notes.txt"));
        assert!(!is_allowed_image_name("png"));
        assert!(!is_allowed_image_name("photo.gif"));
    }

    #[test]
    fn extension_is_lowercased_without_dot() {
        assert_eq!(extension_of("IMG_001.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
    }

    #[test]
    fn caption_pair_rejects_blank_fields() {
        assert!(CaptionPair::new("a dog", "").is_none());
        assert!(CaptionPair::new("  ", "a long story").is_none());
        let pair = CaptionPair::new("a dog", "a dog on a beach").unwrap();
        assert_eq!(pair.short, "a dog");
        assert_eq!(pair.detailed, "a dog on a beach");
    }

    #[test]
    fn caption_set_preserves_insertion_order() {
        let mut set = CaptionSet::new();
        set.push(CaptionPair::new("one", "first").unwrap());
        set.push(CaptionPair::new("two", "second").unwrap());
        let shorts: Vec<&str> = set.iter().map(|pair| pair.short.as_str()).collect();
        assert_eq!(shorts, vec!["one", "two"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn narrative_counts_words() {
        let narrative = Narrative::new("Once upon a  time\nthere was a boat.");
        assert_eq!(narrative.word_count(), 8);
        assert_eq!(narrative.to_string(), "Once upon a  time\nthere was a boat.");
    }

    #[test]
    fn intake_reports_its_mode() {
        let files = Intake::Files(Vec::new());
        let archive = Intake::Archive {
            name: "photos.zip".to_string(),
            bytes: Vec::new(),
        };
        assert_eq!(files.mode(), IntakeMode::Files);
        assert_eq!(archive.mode(), IntakeMode::Archive);
        assert_eq!(archive.mode().to_string(), "archive");
    }
}
