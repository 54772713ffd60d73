use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_QUALIFIER: &str = "de";
const APP_ORG: &str = "ostsee";
const APP_NAME: &str = "sightings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_backend_mode")]
    pub backend: BackendMode,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_public_media_url")]
    pub public_media_url: String,
    #[serde(default = "default_admin_role")]
    pub admin_role: String,
    #[serde(default = "default_roles_claim")]
    pub roles_claim: String,
    #[serde(default)]
    pub exiftool_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: default_backend_mode(),
            api_base_url: default_api_base_url(),
            public_media_url: default_public_media_url(),
            admin_role: default_admin_role(),
            roles_claim: default_roles_claim(),
            exiftool_path: None,
        }
    }
}

fn default_backend_mode() -> BackendMode {
    BackendMode::Local
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_public_media_url() -> String {
    "/media".to_string()
}

fn default_admin_role() -> String {
    "admin".to_string()
}

fn default_roles_claim() -> String {
    "https://ostsee-sichtungen.de/roles".to_string()
}

impl Settings {
    /// Reads `settings.json` from the data root, falling back to defaults when missing.
    pub fn load(paths: &AppPaths) -> Result<Self, crate::error::Error> {
        let path = paths.settings_path();
        if !path.exists() {
            log::info!("No settings at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn save(&self, paths: &AppPaths) -> Result<(), crate::error::Error> {
        let raw = serde_json::to_vec_pretty(self)?;
        std::fs::write(paths.settings_path(), raw)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppPaths {
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub draft_path: PathBuf,
    pub progress_path: PathBuf,
    pub media_dir: PathBuf,
    pub bin_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self, crate::error::Error> {
        let root = match std::env::var("OSTSEE_DATA_DIR") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or_else(|| {
                    crate::error::Error::Path("Failed to get app data dir".to_string())
                })?,
        };
        Self::at(root)
    }

    pub fn at(root: PathBuf) -> Result<Self, crate::error::Error> {
        let db_path = root.join("sightings.db");
        let draft_path = root.join("draft.json");
        let progress_path = root.join("progress.json");
        let media_dir = root.join("media");
        let bin_dir = root.join("bin");

        std::fs::create_dir_all(&media_dir)?;
        std::fs::create_dir_all(&bin_dir)?;

        Ok(Self {
            root,
            db_path,
            draft_path,
            progress_path,
            media_dir,
            bin_dir,
        })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    /// Prefers a bundled binary, then the dev checkout's `bin/`, then whatever is on `PATH`.
    pub fn resolve_bin(&self, name: &str) -> PathBuf {
        let file_name = if cfg!(windows) {
            format!("{name}.exe")
        } else {
            name.to_string()
        };
        let primary = self.bin_dir.join(&file_name);
        if primary.exists() {
            return primary;
        }
        let dev_fallback = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("bin")
            .join(&file_name);
        if dev_fallback.exists() {
            return dev_fallback;
        }
        PathBuf::from(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_settings_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path().to_path_buf()).unwrap();
        let settings = Settings::load(&paths).unwrap();
        assert_eq!(settings.backend, BackendMode::Local);
        assert_eq!(settings.admin_role, "admin");
        assert!(paths.media_dir.is_dir());
    }

    #[test]
    fn partial_settings_keep_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path().to_path_buf()).unwrap();
        std::fs::write(
            paths.settings_path(),
            r#"{"backend":"remote","api_base_url":"https://meldung.example"}"#,
        )
        .unwrap();
        let settings = Settings::load(&paths).unwrap();
        assert_eq!(settings.backend, BackendMode::Remote);
        assert_eq!(settings.api_base_url, "https://meldung.example");
        assert_eq!(settings.public_media_url, "/media");
    }
}
