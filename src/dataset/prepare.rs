//! Dataset Preparation Module
//!
//! Tiny-ImageNet ships its validation images flat in `val/images/` with the
//! labels in `val/val_annotations.txt`. Before the validation set can be read
//! as an image folder, every image is moved under `val/images/<wnid>/`.
//!
//! The class vocabulary (`words.txt`) maps each wnid to a comma-separated
//! list of human labels; the first one is kept.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::utils::error::{FinetuneError, Result};

/// Annotation file, relative to the data root
pub const ANNOTATIONS_FILE: &str = "val/val_annotations.txt";
/// Class vocabulary file, relative to the data root
pub const WORDS_FILE: &str = "words.txt";
/// Validation images directory, relative to the data root
pub const VAL_IMAGES_DIR: &str = "val/images";
/// Training images directory, relative to the data root
pub const TRAIN_DIR: &str = "train";

/// Outcome of one preparer run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReport {
    /// Images moved into their class folder during this run
    pub moved: usize,
    /// Annotated images whose source no longer exists (already moved)
    pub skipped: usize,
    /// Distinct classes named by the annotation file
    pub classes: usize,
}

/// Split a non-blank line into tab-separated fields, requiring at least two.
fn split_fields<'a>(file: &Path, line_no: usize, line: &'a str) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 2 {
        return Err(FinetuneError::Annotation {
            file: file.to_path_buf(),
            line: line_no,
            reason: "expected at least 2 tab-separated fields".to_string(),
        });
    }
    Ok(fields)
}

/// Read `val_annotations.txt` into an image -> wnid map.
///
/// A later line for the same image overrides an earlier one.
pub fn read_annotations(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Err(FinetuneError::PathNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;

    let mut annotations = BTreeMap::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(path, idx + 1, line)?;
        annotations.insert(
            fields[0].to_string(),
            fields[1].trim_end().to_string(),
        );
    }

    debug!("Read {} annotations from {:?}", annotations.len(), path);
    Ok(annotations)
}

/// File validation images under `val/images/<wnid>/`.
///
/// Safe to run repeatedly: an annotated image that is no longer at its flat
/// location is skipped.
pub fn prepare_validation_split(data_dir: &Path) -> Result<PrepareReport> {
    let annotations = read_annotations(&data_dir.join(ANNOTATIONS_FILE))?;
    let images_dir = data_dir.join(VAL_IMAGES_DIR);

    let mut report = PrepareReport::default();
    let mut seen_classes: Vec<&str> = Vec::new();

    for (image, class) in &annotations {
        let class_dir = images_dir.join(class);
        if !class_dir.exists() {
            fs::create_dir_all(&class_dir)?;
        }
        if !seen_classes.contains(&class.as_str()) {
            seen_classes.push(class);
        }

        let source = images_dir.join(image);
        if source.exists() {
            fs::rename(&source, class_dir.join(image))?;
            report.moved += 1;
        } else {
            report.skipped += 1;
        }
    }
    report.classes = seen_classes.len();

    info!(
        "Validation split prepared: {} moved, {} already in place, {} classes",
        report.moved, report.skipped, report.classes
    );
    Ok(report)
}

/// Read `words.txt` into a wnid -> first human label map.
pub fn read_vocabulary(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Err(FinetuneError::PathNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;

    let mut vocabulary = HashMap::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_fields(path, idx + 1, line)?;
        let label = fields[1].split(',').next().unwrap_or_default().trim_end();
        vocabulary.insert(fields[0].to_string(), label.to_string());
    }

    Ok(vocabulary)
}

/// Map each training class folder to its human label.
///
/// Classes missing from the vocabulary are left out of the map.
pub fn class_labels(data_dir: &Path, class_names: &[String]) -> Result<BTreeMap<String, String>> {
    let vocabulary = read_vocabulary(&data_dir.join(WORDS_FILE))?;

    let mut labels = BTreeMap::new();
    for class in class_names {
        match vocabulary.get(class) {
            Some(label) => {
                labels.insert(class.clone(), label.clone());
            }
            None => warn!("Class '{}' has no entry in {}", class, WORDS_FILE),
        }
    }

    Ok(labels)
}

/// Data root paths the pipeline reads from
#[derive(Debug, Clone)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn train_dir(&self) -> PathBuf {
        self.root.join(TRAIN_DIR)
    }

    pub fn val_images_dir(&self) -> PathBuf {
        self.root.join(VAL_IMAGES_DIR)
    }
}
