//! Local Artifact Storage
//!
//! The on-disk copy of the current artifact. Each write goes to its own
//! temporary file in the same directory, is synced, and is then renamed
//! over the target, so local readers never see a partially written
//! artifact and overlapping writers never share a temp file.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Authoritative on-disk copy of the current artifact
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    path: PathBuf,
}

impl ArtifactStore {
    /// Store writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prefix of in-flight temp files, e.g. `.index.m3u8.`
    fn temp_prefix(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        format!(".{}.", name)
    }

    /// Replace the artifact with `bytes`
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.write_atomic(bytes).await.map_err(|e| Error::Persistence {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::info!("File saved successfully at {} ({} bytes)", self.path.display(), bytes.len());
        Ok(())
    }

    async fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let prefix = self.temp_prefix();
        let target = self.path.clone();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || {
            // Removed on drop if anything below fails
            let mut temp = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".tmp")
                .tempfile_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.as_file().sync_all()?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok::<(), std::io::Error>(())
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
    }

    /// Read the current artifact, if one has been written
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_write_replaces_content() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("live").join("index.m3u8"));
        assert_eq!(store.read().await.unwrap(), None);

        store.write(b"#EXTM3U\nseg-1.ts\n").await.unwrap();
        store.write(b"#EXTM3U\n").await.unwrap();

        assert_eq!(store.read().await.unwrap().as_deref(), Some(&b"#EXTM3U\n"[..]));
        assert_eq!(entries(&dir.path().join("live")), vec!["index.m3u8"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_writes_all_succeed() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("index.m3u8"));
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![b'0' + i; 1024 * 1024]).collect();

        for _ in 0..3 {
            let writes = payloads.iter().cloned().map(|payload| {
                let store = store.clone();
                tokio::spawn(async move { store.write(&payload).await })
            });
            for result in futures::future::join_all(writes).await {
                result.unwrap().unwrap();
            }

            let content = store.read().await.unwrap().unwrap();
            assert!(payloads.contains(&content));
            assert_eq!(entries(dir.path()), vec!["index.m3u8"]);
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_persistence_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = ArtifactStore::new(blocker.join("index.m3u8"));
        let result = store.write(b"#EXTM3U\n").await;
        assert!(matches!(result, Err(Error::Persistence { .. })));
    }
}
