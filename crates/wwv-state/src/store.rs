//! Versioned state-file persistence (C14): every state file carries an
//! integer schema version; on version mismatch or a failed invariant
//! check the component reinitialises from default rather than operate
//! on corrupt state (§7 "Persisted state versioning" — reinitialisation
//! is always safe because all state is recoverable from Phase 1 raw +
//! Phase 2 CSVs). Writes are atomic: write to a sibling temp file, then
//! rename (§5 "Disk" policy).

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use wwv_core::{WwvError, WwvResult};

/// On-disk envelope: a schema version wrapping the actual payload, so a
/// future incompatible layout change can be detected without parsing
/// the payload first. Split into borrowing (write) and owned (read)
/// forms since `serde_json::to_vec` never needs to own the payload.
#[derive(Debug, serde::Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Debug, serde::Deserialize)]
struct EnvelopeOwned<T> {
    version: u32,
    data: T,
}

/// Handle to one versioned JSON state file on disk.
pub struct StateStore<T> {
    path: PathBuf,
    expected_version: u32,
    _marker: std::marker::PhantomData<T>,
}

impl<T> StateStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>, expected_version: u32) -> Self {
        Self {
            path: path.into(),
            expected_version,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `value` via write-temp-then-rename, so a reader never
    /// observes a partially-written file.
    pub fn save(&self, value: &T) -> WwvResult<()> {
        let envelope = EnvelopeRef {
            version: self.expected_version,
            data: value,
        };
        let json = serde_json::to_vec_pretty(&envelope).map_err(|e| WwvError::Serde(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &json)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Loads the state file, running `validate` against the deserialised
    /// payload. On any failure — missing file, version mismatch,
    /// malformed JSON, or a failed invariant — logs the reason and
    /// returns `T::default()` rather than propagating the error upward,
    /// matching the "reinitialisation is always safe" policy.
    pub fn load_or_reinit<F>(&self, validate: F) -> T
    where
        F: FnOnce(&T) -> WwvResult<()>,
    {
        match self.load(validate) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file reinitialised");
                T::default()
            }
        }
    }

    fn load(&self, validate: impl FnOnce(&T) -> WwvResult<()>) -> WwvResult<T> {
        let bytes = fs::read(&self.path)?;
        let envelope: EnvelopeOwned<T> =
            serde_json::from_slice(&bytes).map_err(|e| WwvError::Serde(e.to_string()))?;
        if envelope.version != self.expected_version {
            return Err(WwvError::StateFileCorrupt {
                detail: format!(
                    "schema version {} does not match expected {}",
                    envelope.version, self.expected_version
                ),
            });
        }
        validate(&envelope.data)?;
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Dummy {
        value: i64,
    }

    #[test]
    fn round_trips_through_atomic_replace() {
        let dir = tempfile::tempdir().unwrap();
        let store: StateStore<Dummy> = StateStore::new(dir.path().join("dummy.json"), 1);
        store.save(&Dummy { value: 42 }).unwrap();
        let loaded = store.load_or_reinit(|_| Ok(()));
        assert_eq!(loaded.value, 42);
    }

    #[test]
    fn missing_file_reinitializes_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store: StateStore<Dummy> = StateStore::new(dir.path().join("missing.json"), 1);
        let loaded = store.load_or_reinit(|_| Ok(()));
        assert_eq!(loaded, Dummy::default());
    }

    #[test]
    fn version_mismatch_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versioned.json");
        let store_v1: StateStore<Dummy> = StateStore::new(&path, 1);
        store_v1.save(&Dummy { value: 7 }).unwrap();

        let store_v2: StateStore<Dummy> = StateStore::new(&path, 2);
        let loaded = store_v2.load_or_reinit(|_| Ok(()));
        assert_eq!(loaded, Dummy::default());
    }

    #[test]
    fn failed_invariant_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let store: StateStore<Dummy> = StateStore::new(dir.path().join("bad.json"), 1);
        store.save(&Dummy { value: -1 }).unwrap();
        let loaded = store.load_or_reinit(|d| {
            if d.value < 0 {
                Err(WwvError::StateFileCorrupt {
                    detail: "negative value".into(),
                })
            } else {
                Ok(())
            }
        });
        assert_eq!(loaded, Dummy::default());
    }
}
