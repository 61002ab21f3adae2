use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StateError;
use crate::schema::ValidatorState;
use crate::storage_traits::{StateResult, StateStore};

/// Single-document JSON store.
///
/// Writes go to a temp file in the same directory and are renamed over the
/// target, so a crash mid-save leaves the previous snapshot intact.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store at `path`. Parent directories are created on first save.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StateResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StateError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_state(&self) -> StateResult<ValidatorState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file yet, starting fresh");
                return Ok(ValidatorState::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| StateError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn save_state(&self, state: &ValidatorState) -> StateResult<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StateError::Query(format!("state writer task failed: {e}")))??;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
