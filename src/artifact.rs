use std::{
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::warn;
use uuid::Uuid;

use crate::error::StorageError;

/// Per-request identifier namespacing every file the request writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// The downloads directory and the public prefix it is served under.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    public_prefix: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_prefix: public_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|error| {
            StorageError::new(format!(
                "Could not create downloads directory {:?}: {error}",
                self.dir
            ))
        })
    }

    pub fn new_artifact_id(&self) -> RequestId {
        RequestId(Uuid::new_v4())
    }

    /// Output pattern for the extractor; `%(ext)s` is resolved by it.
    pub fn output_template(&self, id: RequestId) -> String {
        format!("{}/{id}.%(ext)s", self.dir.to_string_lossy())
    }

    pub fn placeholder_path(&self, id: RequestId) -> PathBuf {
        self.dir.join(format!("{id}_placeholder.txt"))
    }

    pub fn public_path(&self, filename: &str) -> String {
        format!("{}/{}", self.public_prefix, urlencoding::encode(filename))
    }

    /// Deletes whatever an attempt left under `<id>.*`, e.g. `.part` files of
    /// a killed download. The placeholder (`<id>_placeholder.txt`) is kept.
    pub async fn remove_attempt_leftovers(&self, id: RequestId) -> Result<usize, StorageError> {
        let prefix = format!("{id}.");
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|error| {
            StorageError::new(format!("Could not open downloads directory: {error}"))
        })?;

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|error| {
            StorageError::new(format!("Could not read downloads directory: {error}"))
        })? {
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix));
            if !matches {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    return Err(StorageError::new(format!(
                        "Could not remove leftover {:?}: {error}",
                        entry.path()
                    )));
                }
            }
        }

        Ok(removed)
    }

    /// Canonical path of `candidate` if it is a regular file inside the
    /// downloads directory.
    pub async fn resolve_artifact(&self, candidate: &Path) -> Result<Option<PathBuf>, StorageError> {
        let metadata = match tokio::fs::metadata(candidate).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(StorageError::new(format!(
                    "Could not read downloaded file {:?}: {error}",
                    candidate
                )));
            }
        };

        if !metadata.is_file() {
            return Ok(None);
        }

        let canonical_dir = tokio::fs::canonicalize(&self.dir).await.map_err(|error| {
            StorageError::new(format!("Could not resolve downloads directory: {error}"))
        })?;
        let canonical_candidate = tokio::fs::canonicalize(candidate).await.map_err(|error| {
            StorageError::new(format!("Could not resolve downloaded file: {error}"))
        })?;

        if !canonical_candidate.starts_with(&canonical_dir) {
            warn!(
                "Rejected a file outside the downloads directory: {:?}",
                canonical_candidate
            );
            return Ok(None);
        }

        Ok(Some(canonical_candidate))
    }
}

pub fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
}
