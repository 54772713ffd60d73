use crate::error::{Error, Result};
use crate::models::{DraftPatch, SightingDraft};
use crate::steps::FlowProgress;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

/// Raw byte storage behind the draft store.
pub trait DraftStorage: Send + Sync {
    fn read(&self) -> Result<Option<Vec<u8>>>;
    fn write(&self, bytes: &[u8]) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

/// Keeps the draft in a single JSON file, replaced atomically on every write.
pub struct FileDraftStorage {
    path: PathBuf,
}

impl FileDraftStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl DraftStorage for FileDraftStorage {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| Error::Path(format!("No parent directory for {}", self.path.display())))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryDraftStorage {
    slots: Mutex<HashMap<&'static str, Vec<u8>>>,
}

const SLOT: &str = "sighting-draft";

impl DraftStorage for MemoryDraftStorage {
    fn read(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.slots.lock().get(SLOT).cloned())
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        self.slots.lock().insert(SLOT, bytes.to_vec());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.slots.lock().remove(SLOT);
        Ok(())
    }
}

pub struct DraftStore<S: DraftStorage> {
    storage: S,
    lock: Mutex<()>,
}

impl<S: DraftStorage> DraftStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the stored draft. Missing, unreadable or corrupt state yields an empty draft.
    pub fn load(&self) -> SightingDraft {
        let _guard = self.lock.lock();
        self.load_unlocked().unwrap_or_else(|err| {
            log::warn!("Could not read stored draft: {err}");
            SightingDraft::default()
        })
    }

    /// Only an absent or unparsable payload becomes an empty draft. Read errors propagate so
    /// a caller about to write never replaces a draft it failed to see.
    fn load_unlocked(&self) -> Result<SightingDraft> {
        let Some(bytes) = self.storage.read()? else {
            return Ok(SightingDraft::default());
        };
        match serde_json::from_slice::<SightingDraft>(&bytes) {
            Ok(draft) => Ok(draft),
            Err(err) => {
                log::warn!("Discarding unreadable draft: {}", Error::Persistence(err.to_string()));
                if let Err(err) = self.storage.remove() {
                    log::warn!("Could not discard unreadable draft: {err}");
                }
                Ok(SightingDraft::default())
            }
        }
    }

    pub fn update(&self, patch: DraftPatch) -> Result<SightingDraft> {
        self.update_with(|draft| {
            draft.apply(patch);
            Ok(())
        })
        .map(|(draft, ())| draft)
    }

    /// Applies `f` to the stored draft and persists the result as one step.
    /// Nothing is written if `f` fails.
    pub fn update_with<T>(
        &self,
        f: impl FnOnce(&mut SightingDraft) -> Result<T>,
    ) -> Result<(SightingDraft, T)> {
        let _guard = self.lock.lock();
        let mut draft = self.load_unlocked()?;
        let out = f(&mut draft)?;
        let bytes = serde_json::to_vec(&draft)?;
        self.storage.write(&bytes)?;
        Ok((draft, out))
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.storage.remove()
    }
}

/// Step cursor and completion marks, stored beside the draft so navigation survives restarts.
pub struct ProgressStore<S: DraftStorage> {
    storage: S,
}

impl<S: DraftStorage> ProgressStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// `None` when nothing was saved or the saved state cannot be parsed.
    pub fn load(&self) -> Result<Option<FlowProgress>> {
        let Some(bytes) = self.storage.read()? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(progress) => Ok(Some(progress)),
            Err(err) => {
                log::warn!("Ignoring unreadable step progress: {err}");
                Ok(None)
            }
        }
    }

    pub fn save(&self, progress: &FlowProgress) -> Result<()> {
        self.storage.write(&serde_json::to_vec(progress)?)
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SightingSource;
    use crate::steps::FlowState;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory storage whose reads fail while `failures` is above zero.
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryDraftStorage,
        failures: AtomicUsize,
    }

    impl DraftStorage for FlakyStorage {
        fn read(&self) -> Result<Option<Vec<u8>>> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Io(std::io::Error::other("device busy")));
            }
            self.inner.read()
        }

        fn write(&self, bytes: &[u8]) -> Result<()> {
            self.inner.write(bytes)
        }

        fn remove(&self) -> Result<()> {
            self.inner.remove()
        }
    }

    fn species(name: &str) -> DraftPatch {
        DraftPatch {
            species: Some(Some(name.into())),
            ..Default::default()
        }
    }

    #[test]
    fn empty_storage_loads_empty_draft() {
        let store = DraftStore::new(MemoryDraftStorage::default());
        assert!(store.load().is_empty());
    }

    #[test]
    fn update_merges_with_previous_fields() {
        let store = DraftStore::new(MemoryDraftStorage::default());
        store.update(species("Schweinswal")).unwrap();
        store
            .update(DraftPatch {
                sighting_source: Some(Some(SightingSource::Boat)),
                latitude: Some(Some(54.5)),
                ..Default::default()
            })
            .unwrap();

        let draft = store.load();
        assert_eq!(draft.report.species.as_deref(), Some("Schweinswal"));
        assert_eq!(draft.report.sighting_source, Some(SightingSource::Boat));
        assert_eq!(draft.report.latitude, Some(54.5));
    }

    #[test]
    fn clear_then_load_is_empty() {
        let store = DraftStore::new(MemoryDraftStorage::default());
        store.update(species("Kegelrobbe")).unwrap();
        store.clear().unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_payload_is_discarded() {
        let storage = MemoryDraftStorage::default();
        storage.write(b"{not json").unwrap();
        let store = DraftStore::new(storage);
        assert!(store.load().is_empty());
        assert!(store.storage().read().unwrap().is_none());
    }

    #[test]
    fn failed_mutation_writes_nothing() {
        let store = DraftStore::new(MemoryDraftStorage::default());
        store.update(species("Schweinswal")).unwrap();
        let res = store.update_with(|draft| {
            draft.report.species = None;
            Err::<(), _>(Error::Navigation("nope".into()))
        });
        assert!(res.is_err());
        assert_eq!(store.load().report.species.as_deref(), Some("Schweinswal"));
    }

    #[test]
    fn file_storage_survives_a_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draft.json");
        DraftStore::new(FileDraftStorage::new(path.clone()))
            .update(species("Weißschnauzendelfin"))
            .unwrap();

        let reopened = DraftStore::new(FileDraftStorage::new(path.clone()));
        assert_eq!(
            reopened.load().report.species.as_deref(),
            Some("Weißschnauzendelfin")
        );
        reopened.clear().unwrap();
        assert!(!path.exists());
        reopened.clear().unwrap();
    }

    #[test]
    fn read_error_during_update_keeps_the_stored_draft() {
        let store = DraftStore::new(FlakyStorage::default());
        store.update(species("Schweinswal")).unwrap();

        store.storage().failures.store(1, Ordering::SeqCst);
        let notes = DraftPatch {
            notes: Some(Some("n".into())),
            ..Default::default()
        };
        assert!(matches!(store.update(notes.clone()), Err(Error::Io(_))));

        let draft = store.update(notes).unwrap();
        assert_eq!(draft.report.species.as_deref(), Some("Schweinswal"));
        assert_eq!(draft.report.notes.as_deref(), Some("n"));
    }

    #[test]
    fn read_error_on_load_shows_empty_draft_without_touching_storage() {
        let store = DraftStore::new(FlakyStorage::default());
        store.update(species("Kegelrobbe")).unwrap();
        store.storage().failures.store(1, Ordering::SeqCst);
        assert!(store.load().is_empty());
        assert_eq!(store.load().report.species.as_deref(), Some("Kegelrobbe"));
    }

    #[test]
    fn progress_round_trips_and_ignores_garbage() {
        let progress = ProgressStore::new(MemoryDraftStorage::default());
        assert_eq!(progress.load().unwrap(), None);

        let saved = FlowProgress {
            state: FlowState::Active(2),
            completed: BTreeSet::from([0, 1]),
        };
        progress.save(&saved).unwrap();
        assert_eq!(progress.load().unwrap(), Some(saved));

        progress.storage.write(b"[1,2").unwrap();
        assert_eq!(progress.load().unwrap(), None);
        progress.clear().unwrap();
        assert_eq!(progress.load().unwrap(), None);
    }
}
