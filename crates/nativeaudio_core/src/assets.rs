//! Asset Store
//!
//! Read-only directory of bundled audio files, addressed by relative name.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// File extensions listed by `AssetStore::list`
const AUDIO_EXTENSIONS: &[&str] = &["aac", "flac", "m4a", "mp3", "ogg", "wav"];

#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an asset, checked to exist and to stay inside the root
    pub fn resolve(&self, name: &str) -> EngineResult<PathBuf> {
        let relative = Path::new(name);
        if name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(EngineError::InvalidAssetName(name.to_string()));
        }

        let path = self.root.join(relative);
        if !path.is_file() {
            return Err(EngineError::AssetNotFound(name.to_string()));
        }
        debug!("Asset {} -> {}", name, path.display());
        Ok(path)
    }

    /// Audio files directly under the root, sorted by name
    pub fn list(&self) -> EngineResult<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, AssetStore) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("background.mp3"), b"x").unwrap();
        fs::write(dir.path().join("ambient.ogg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep.wav"), b"x").unwrap();
        let store = AssetStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_resolve() {
        let (dir, store) = store();
        assert_eq!(
            store.resolve("background.mp3").unwrap(),
            dir.path().join("background.mp3")
        );
        assert!(store.resolve("sub/deep.wav").is_ok());
        assert!(matches!(
            store.resolve("missing.mp3"),
            Err(EngineError::AssetNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let (_dir, store) = store();
        for name in ["../secret.wav", "/etc/passwd", "sub/../../x.wav", ""] {
            assert!(
                matches!(store.resolve(name), Err(EngineError::InvalidAssetName(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[test]
    fn test_list() {
        let (_dir, store) = store();
        assert_eq!(store.list().unwrap(), vec!["ambient.ogg", "background.mp3"]);
    }

    #[test]
    fn test_list_missing_root() {
        let store = AssetStore::new("/nonexistent/assets");
        assert!(matches!(store.list(), Err(EngineError::Io(_))));
    }
}
