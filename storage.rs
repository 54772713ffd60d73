use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_128;

pub const MEDIA_PREFIX: &str = "sightings";

pub trait MediaStorage: Send + Sync {
    /// Stores `bytes` under `key` and returns its public URL.
    fn upload(&self, key: &str, bytes: &[u8], content_type: Option<&str>) -> Result<String>;
    /// Returns whether something was deleted.
    fn delete(&self, key: &str) -> Result<bool>;
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
    fn exists(&self, key: &str) -> Result<bool>;
    fn url(&self, key: &str) -> String;
}

/// Content-addressed key, so re-uploading the same photo lands on the same object.
pub fn storage_key(bytes: &[u8], ext: &str) -> String {
    let digest = xxh3_128(bytes);
    if ext.is_empty() {
        format!("{MEDIA_PREFIX}/{digest:032x}")
    } else {
        format!("{MEDIA_PREFIX}/{digest:032x}.{ext}")
    }
}

pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: PathBuf, public_base_url: &str) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(Error::Path(format!("Invalid storage key: {key}")));
        }
        Ok(self.root.join(relative))
    }
}

impl MediaStorage for LocalStorage {
    fn upload(&self, key: &str, bytes: &[u8], content_type: Option<&str>) -> Result<String> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        log::debug!(
            "Stored {} ({} bytes, {})",
            key,
            bytes.len(),
            content_type.unwrap_or("unknown type")
        );
        Ok(self.url(key))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                let relative = e.path().strip_prefix(&self.root).ok()?;
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .collect();
                Some(parts.join("/"))
            })
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.resolve(key)?.is_file())
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}
