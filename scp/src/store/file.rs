use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::{Store, StoreError, StoreState};

/// Store persisted as a single JSON document.
///
/// Every committed transaction rewrites the whole document to `<path>.tmp`
/// and renames it over `<path>`, so a crash leaves either the old or the new
/// state on disk, never a torn file. A file that fails to parse on open is
/// replaced with an empty state.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonFileStore {
    /// Opens or creates the store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory or file cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<StoreState>(&bytes) {
                Ok(state) => Some(state),
                Err(_e) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(path = %path.display(), error = %_e, "store file is corrupt, starting empty");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let store = match state {
            Some(state) => Self {
                path,
                state: Mutex::new(state),
            },
            None => {
                let state = StoreState::default();
                persist(&path, &state).await?;
                Self {
                    path,
                    state: Mutex::new(state),
                }
            }
        };
        Ok(store)
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn persist(path: &Path, state: &StoreState) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(state)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

impl Store for JsonFileStore {
    async fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&StoreState) -> R + Send,
        R: Send,
    {
        let guard = self.state.lock().await;
        f(&guard)
    }

    async fn transact<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut StoreState) -> Result<R, E> + Send,
        R: Send,
        E: From<StoreError> + Send,
    {
        let mut guard = self.state.lock().await;
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        persist(&self.path, &draft).await?;
        *guard = draft;
        Ok(out)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let guard = self.state.lock().await;
        persist(&self.path, &guard).await
    }
}
