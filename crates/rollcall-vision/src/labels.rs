//! Label map artifact: recognizer label -> composite identity key.
//!
//! The map is bound to the model file it was trained with by the model's
//! SHA-256, so a retrained model is never read with a stale map.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LABELS_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("artifact not found: {}; run `rollcall train` first", .0.display())]
    NotFound(PathBuf),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: unsupported format version {found} (expected {expected})", path.display())]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error(
        "label map was built for a different model \
         (expected sha256 {expected}, model is {actual}); retrain"
    )]
    ModelMismatch { expected: String, actual: String },
}

/// Read a file, mapping a missing file to [`ModelError::NotFound`].
pub(crate) fn read_artifact(path: &Path) -> Result<Vec<u8>, ModelError> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ModelError::NotFound(path.to_path_buf())
        } else {
            ModelError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ModelError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }
    let bytes = serde_json::to_vec(value).map_err(|e| ModelError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::write(path, bytes).map_err(|e| ModelError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Hex SHA-256 of an artifact file.
pub fn fingerprint(path: &Path) -> Result<String, ModelError> {
    let bytes = read_artifact(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Mapping from recognizer label to composite identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMap {
    pub format_version: u32,
    /// SHA-256 of the model file these labels belong to.
    #[serde(default)]
    pub model_sha256: Option<String>,
    pub labels: BTreeMap<u32, String>,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self {
            format_version: LABELS_FORMAT_VERSION,
            model_sha256: None,
            labels: BTreeMap::new(),
        }
    }
}

impl LabelMap {
    /// Append a key under the next dense label and return that label.
    pub fn push(&mut self, key: impl Into<String>) -> u32 {
        let label = self.labels.len() as u32;
        self.labels.insert(label, key.into());
        label
    }

    pub fn get(&self, label: u32) -> Option<&str> {
        self.labels.get(&label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = read_artifact(path)?;
        let map: LabelMap = serde_json::from_slice(&bytes).map_err(|e| ModelError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        if map.format_version != LABELS_FORMAT_VERSION {
            return Err(ModelError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: map.format_version,
                expected: LABELS_FORMAT_VERSION,
            });
        }
        tracing::info!(path = %path.display(), people = map.len(), "loaded label map");
        Ok(map)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_json(path, self)
    }

    /// Check that these labels were produced together with the model at `model_path`.
    pub fn verify_model(&self, model_path: &Path) -> Result<(), ModelError> {
        let actual = fingerprint(model_path)?;
        match &self.model_sha256 {
            Some(expected) if *expected != actual => Err(ModelError::ModelMismatch {
                expected: expected.clone(),
                actual,
            }),
            Some(_) => Ok(()),
            None => {
                tracing::warn!(
                    model = %model_path.display(),
                    "label map carries no model fingerprint; cannot verify it matches the model"
                );
                Ok(())
            }
        }
    }
}
