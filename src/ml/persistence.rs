//! Model persistence - save and load trained model artifacts

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Serializes artifact writes within the process.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// A versioned, whole-file model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact<T> {
    /// Version for backward compatibility
    pub version: u32,
    /// When the artifact was trained
    pub created_at: DateTime<Utc>,
    /// Observations the training pass saw, before segmenting
    pub training_observations: usize,
    pub payload: T,
}

impl<T> ModelArtifact<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Current version number
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(training_observations: usize, payload: T, created_at: DateTime<Utc>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            created_at,
            training_observations,
            payload,
        }
    }

    /// Save with bincode, replacing any existing file atomically.
    ///
    /// The bytes go to a temporary file in the target directory which is then
    /// renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let _guard = WRITE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let bytes = bincode::serialize(self).map_err(|e| PersistenceError::Serialize(e.to_string()))?;

        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| PersistenceError::Io(e.error))?;

        Ok(())
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            return Err(PersistenceError::FileNotFound(path.to_path_buf()));
        }

        let bytes = fs::read(path)?;

        let artifact: Self =
            bincode::deserialize(&bytes).map_err(|e| PersistenceError::Deserialize(e.to_string()))?;

        if artifact.version != Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: artifact.version,
            });
        }

        Ok(artifact)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Model v{}: {} observations, created {}",
            self.version,
            self.training_observations,
            self.created_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}

/// Errors that can occur during model persistence
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("model file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("model version mismatch: expected v{expected}, found v{found}")]
    VersionMismatch { expected: u32, found: u32 },
}

impl PersistenceError {
    /// True when there simply is no artifact yet
    pub fn is_missing(&self) -> bool {
        matches!(self, PersistenceError::FileNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    type Payload = BTreeMap<String, Vec<f64>>;

    fn create_test_artifact() -> ModelArtifact<Payload> {
        let mut payload = BTreeMap::new();
        payload.insert("Lunch".to_string(), vec![1.0, 2.5]);
        ModelArtifact::new(21, payload, Utc::now())
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("attendance_model.bin");

        let artifact = create_test_artifact();
        artifact.save(&path).unwrap();

        let loaded = ModelArtifact::<Payload>::load(&path).unwrap();
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_save_overwrites_whole_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("food_model.bin");

        create_test_artifact().save(&path).unwrap();
        let replacement = ModelArtifact::new(99, Payload::new(), Utc::now());
        replacement.save(&path).unwrap();

        let loaded = ModelArtifact::<Payload>::load(&path).unwrap();
        assert_eq!(loaded.training_observations, 99);
        assert!(loaded.payload.is_empty());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        create_test_artifact().save(&path).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ModelArtifact::<Payload>::load(Path::new("/nonexistent/model.bin"));
        assert!(matches!(result, Err(ref e) if e.is_missing()));
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        fs::write(&path, b"not a model").unwrap();

        let result = ModelArtifact::<Payload>::load(&path);
        assert!(matches!(result, Err(PersistenceError::Deserialize(_))));
    }

    #[test]
    fn test_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        let mut artifact = create_test_artifact();
        artifact.version = 7;
        let bytes = bincode::serialize(&artifact).unwrap();
        fs::write(&path, bytes).unwrap();

        let result = ModelArtifact::<Payload>::load(&path);
        assert!(matches!(
            result,
            Err(PersistenceError::VersionMismatch { expected: 1, found: 7 })
        ));
    }

    #[test]
    fn test_summary() {
        let summary = create_test_artifact().summary();
        assert!(summary.contains("v1"));
        assert!(summary.contains("21 observations"));
    }
}
