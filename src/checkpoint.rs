//! Persistence of the last transmitted row timestamp.
//!
//! A run reads the checkpoint once before it starts and writes it once after
//! the last row, so an interrupted or repeated run resumes where the previous
//! one finished.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::{Result, TagalongError};

/// Trait for checkpoint storage
pub trait CheckpointStore: Send {
    /// Load the stored timestamp; `Ok(None)` when nothing was saved yet.
    fn load(&self) -> Result<Option<f64>>;

    /// Replace the stored timestamp.
    fn save(&mut self, timestamp: f64) -> Result<()>;
}

impl<S: CheckpointStore + ?Sized> CheckpointStore for Box<S> {
    fn load(&self) -> Result<Option<f64>> {
        (**self).load()
    }

    fn save(&mut self, timestamp: f64) -> Result<()> {
        (**self).save(timestamp)
    }
}

/// Stores the timestamp as decimal text in a single file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<f64>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No checkpoint at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(TagalongError::file_error(self.path.clone(), e)),
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let timestamp = trimmed.parse::<f64>().map_err(|e| {
            TagalongError::checkpoint(
                format!("{} does not hold a timestamp: '{}'", self.path.display(), trimmed),
                Some(Box::new(e)),
            )
        })?;
        if !timestamp.is_finite() {
            return Err(TagalongError::checkpoint(
                format!("{} holds a non-finite timestamp: '{}'", self.path.display(), trimmed),
                None,
            ));
        }
        Ok(Some(timestamp))
    }

    fn save(&mut self, timestamp: f64) -> Result<()> {
        if !timestamp.is_finite() {
            return Err(TagalongError::checkpoint(
                format!("refusing to save non-finite timestamp {}", timestamp),
                None,
            ));
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| TagalongError::file_error(parent.to_path_buf(), e))?;
        }
        std::fs::write(&self.path, timestamp.to_string())
            .map_err(|e| TagalongError::file_error(self.path.clone(), e))?;
        info!("Checkpoint {} saved to {}", timestamp, self.path.display());
        Ok(())
    }
}

/// In-memory store; clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    value: Arc<Mutex<Option<f64>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(timestamp: f64) -> Self {
        Self { value: Arc::new(Mutex::new(Some(timestamp))) }
    }

    /// Current value, for inspection.
    pub fn get(&self) -> Option<f64> {
        self.value.lock().map(|guard| *guard).unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<f64>> {
        Ok(self.get())
    }

    fn save(&mut self, timestamp: f64) -> Result<()> {
        let mut guard = self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tagalong-checkpoint-{}-{}", name, std::process::id()))
    }

    #[test]
    fn missing_file_means_no_checkpoint() {
        let store = FileCheckpointStore::new(temp_path("missing"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn file_round_trip() {
        let path = temp_path("roundtrip");
        let mut store = FileCheckpointStore::new(&path);
        store.save(1_693_380_000.25).unwrap();
        assert_eq!(store.load().unwrap(), Some(1_693_380_000.25));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1693380000.25");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn garbage_is_a_checkpoint_error() {
        let path = temp_path("garbage");
        std::fs::write(&path, "yesterday").unwrap();
        let err = FileCheckpointStore::new(&path).load().unwrap_err();
        assert!(matches!(err, TagalongError::Checkpoint { .. }));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn non_finite_values_are_checkpoint_errors() {
        let path = temp_path("non-finite");
        for stored in ["NaN", "inf", "-inf"] {
            std::fs::write(&path, stored).unwrap();
            let err = FileCheckpointStore::new(&path).load().unwrap_err();
            assert!(matches!(err, TagalongError::Checkpoint { .. }), "{}", stored);
        }

        let mut store = FileCheckpointStore::new(&path);
        std::fs::write(&path, "7").unwrap();
        assert!(matches!(store.save(f64::NAN), Err(TagalongError::Checkpoint { .. })));
        assert_eq!(store.load().unwrap(), Some(7.0));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn memory_store_clones_share_state() {
        let store = MemoryCheckpointStore::new();
        let mut writer = store.clone();
        writer.save(5.0).unwrap();
        assert_eq!(store.load().unwrap(), Some(5.0));
        assert_eq!(MemoryCheckpointStore::with_value(2.0).get(), Some(2.0));
    }
}
