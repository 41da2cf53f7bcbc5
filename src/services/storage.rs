use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::core::config::Settings;

/// Local directory holding downloaded photos and annotated results. Files are
/// never removed by the bot.
#[derive(Debug, Clone)]
pub(crate) struct StorageService {
    root: PathBuf,
}

impl StorageService {
    pub(crate) async fn from_settings(settings: &Settings) -> Result<Self> {
        Self::open(settings.storage().root.clone()).await
    }

    pub(crate) async fn open(root: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create storage directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` under the root. Names carrying path separators or
    /// parent references are rejected.
    pub(crate) fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name == "."
            || name.contains("..")
        {
            return Err(anyhow!("Invalid storage file name: {name:?}"));
        }
        Ok(self.root.join(name))
    }

    pub(crate) async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Maps an externally supplied id onto characters safe for a file name.
pub(crate) fn file_stem(value: &str) -> String {
    let stem: String = value
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect();
    if stem.is_empty() {
        String::from("_")
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::{file_stem, StorageService};

    #[test]
    fn file_stem_replaces_path_characters() {
        assert_eq!(file_stem("T1"), "T1");
        assert_eq!(file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(file_stem(""), "_");
    }

    #[tokio::test]
    async fn write_places_file_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageService::open(dir.path().join("exams")).await.expect("storage");

        let path = storage.write("42_q.jpg", b"jpeg").await.expect("write");

        assert_eq!(path, dir.path().join("exams").join("42_q.jpg"));
        assert_eq!(tokio::fs::read(&path).await.expect("read"), b"jpeg");
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = StorageService::open(dir.path().to_path_buf()).await.expect("storage");

        assert!(storage.path_for("../escape.jpg").is_err());
        assert!(storage.path_for("nested/file.jpg").is_err());
        assert!(storage.path_for("").is_err());
        assert!(storage.path_for("res_T1.jpg").is_ok());
    }
}
