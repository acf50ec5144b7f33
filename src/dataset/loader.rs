//! Image Folder Loader
//!
//! Scans a `root/<class>/<image>` tree into labeled samples. Classes are the
//! sub-directory names sorted lexicographically; the label of a sample is the
//! index of its class in that order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{FinetuneError, Result};

/// File extensions accepted as images (compared lowercase)
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
}

/// A labeled image directory
#[derive(Debug, Clone)]
pub struct ImageFolder {
    /// Root directory of the split
    pub root: PathBuf,
    /// Ordered class names; position is the label
    pub classes: Vec<String>,
    /// All samples, grouped by class, files in name order
    pub samples: Vec<ImageSample>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted names of the immediate sub-directories of `root`
fn class_dirs(root: &Path) -> Result<Vec<String>> {
    let mut classes = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                classes.push(name.to_string());
            }
        }
    }
    classes.sort();
    Ok(classes)
}

impl ImageFolder {
    /// Scan `root`, deriving the class list from its sub-directories
    pub fn scan<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(FinetuneError::PathNotFound(root.to_path_buf()));
        }
        let classes = class_dirs(root)?;
        Self::scan_with_classes(root, &classes)
    }

    /// Scan `root`, labelling samples against an existing class list.
    ///
    /// Used for the validation split so its labels agree with training. A
    /// sub-directory that is not in `classes` is an error.
    pub fn scan_with_classes<P: AsRef<Path>>(root: P, classes: &[String]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Scanning image folder: {:?}", root);

        if !root.exists() {
            return Err(FinetuneError::PathNotFound(root));
        }

        let mut samples = Vec::new();
        for dir in class_dirs(&root)? {
            let label = classes.iter().position(|c| *c == dir).ok_or_else(|| {
                FinetuneError::Dataset(format!(
                    "class folder '{}' in {:?} is not a known class",
                    dir, root
                ))
            })?;

            let before = samples.len();
            for entry in WalkDir::new(root.join(&dir))
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && is_image(entry.path()) {
                    samples.push(ImageSample {
                        path: entry.path().to_path_buf(),
                        label,
                    });
                }
            }
            debug!("Class '{}' (label {}): {} samples", dir, label, samples.len() - before);
        }

        info!("Found {} samples in {} classes", samples.len(), classes.len());

        Ok(Self {
            root,
            classes: classes.to_vec(),
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Number of samples per label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}
