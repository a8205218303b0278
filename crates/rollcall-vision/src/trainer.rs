//! Offline training: dataset directory -> LBPH model + label map.
//!
//! Every immediate subdirectory of the dataset is one person, named by its
//! composite key (`Alice_001/`). Subdirectories are visited in byte-wise
//! sorted order so the same dataset always yields the same labels.

use crate::labels::{fingerprint, LabelMap, ModelError};
use crate::lbph::{LbphParams, LbphRecognizer};
use rollcall_core::Identity;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("dataset directory not found: {}", .0.display())]
    DatasetNotFound(PathBuf),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no usable face images under {}", .0.display())]
    NoSamples(PathBuf),
    #[error("saving artifacts: {0}")]
    Model(#[from] ModelError),
}

/// What a training run picked up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingSummary {
    /// People that received a label, in label order.
    pub people: Vec<String>,
    pub images: usize,
    pub skipped_images: usize,
    pub skipped_dirs: Vec<String>,
}

fn io_err(path: &Path, source: std::io::Error) -> TrainError {
    TrainError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Sorted entries of `dir` matching `keep`.
fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, TrainError> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let path = entry.map_err(|e| io_err(dir, e))?.path();
        if keep(&path) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

/// Train an LBPH model from `dataset`.
pub fn train_from_dir(
    dataset: &Path,
    params: LbphParams,
) -> Result<(LbphRecognizer, LabelMap, TrainingSummary), TrainError> {
    if !dataset.is_dir() {
        return Err(TrainError::DatasetNotFound(dataset.to_path_buf()));
    }

    let mut recognizer = LbphRecognizer::new(params);
    let mut labels = LabelMap::default();
    let mut summary = TrainingSummary::default();

    for person_dir in sorted_entries(dataset, Path::is_dir)? {
        let dir_name = person_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let identity = match Identity::try_decode(&dir_name) {
            Ok(identity) if !identity.is_unknown() => identity,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    dir = %person_dir.display(),
                    "directory name is not a person key, skipping"
                );
                summary.skipped_dirs.push(dir_name);
                continue;
            }
        };

        let mut faces = Vec::new();
        for image_path in sorted_entries(&person_dir, Path::is_file)? {
            match image::open(&image_path) {
                Ok(img) => faces.push(img.to_luma8()),
                Err(e) => {
                    tracing::warn!(
                        path = %image_path.display(),
                        error = %e,
                        "skipping unreadable image"
                    );
                    summary.skipped_images += 1;
                }
            }
        }

        if faces.is_empty() {
            tracing::warn!(dir = %person_dir.display(), "no usable images, person gets no label");
            summary.skipped_dirs.push(dir_name);
            continue;
        }

        let key = identity.key();
        let label = labels.push(key.clone());
        for face in &faces {
            recognizer.add(label, face);
        }
        tracing::info!(label, key = %key, images = faces.len(), "added person");
        summary.images += faces.len();
        summary.people.push(key);
    }

    if recognizer.sample_count() == 0 {
        return Err(TrainError::NoSamples(dataset.to_path_buf()));
    }

    Ok((recognizer, labels, summary))
}

/// Write the model, then the label map stamped with the model's fingerprint.
pub fn save_artifacts(
    recognizer: &LbphRecognizer,
    labels: &mut LabelMap,
    model_path: &Path,
    labels_path: &Path,
) -> Result<(), TrainError> {
    recognizer.save(model_path)?;
    labels.model_sha256 = Some(fingerprint(model_path)?);
    labels.save(labels_path)?;
    tracing::info!(
        model = %model_path.display(),
        labels = %labels_path.display(),
        "saved training artifacts"
    );
    Ok(())
}
