use super::error::StorageError;
use dashmap::{DashMap, DashSet};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tracing::{debug, warn};

const OPEN_RETRIES: u32 = 3;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// An open file shared between the handle cache and queued disk operations.
///
/// The disk worker is the only thread that seeks and transfers through the
/// handle; the mutex exists so `close` can sync it from another thread.
pub struct FileHandle {
    path: PathBuf,
    file: parking_lot::Mutex<std::fs::File>,
    writable: bool,
}

impl FileHandle {
    pub(crate) fn new(path: PathBuf, file: std::fs::File, writable: bool) -> Self {
        Self {
            path,
            file: parking_lot::Mutex::new(file),
            writable,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn file(&self) -> parking_lot::MutexGuard<'_, std::fs::File> {
        self.file.lock()
    }

    pub(crate) fn sync(&self) -> std::io::Result<()> {
        if self.writable {
            self.file.lock().sync_all()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .finish()
    }
}

pub(crate) fn validate_file_path(file_path: &Path) -> Result<(), StorageError> {
    for component in file_path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathTraversal(file_path.display().to_string()));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Lazily opened file handles keyed by resolved path.
///
/// Paths that were confirmed missing on a read are remembered so repeated
/// reads of a file we haven't downloaded yet fail without a syscall.
pub(crate) struct HandleCache {
    root: PathBuf,
    handles: DashMap<PathBuf, Arc<FileHandle>>,
    missing: DashSet<PathBuf>,
    open_lock: tokio::sync::Mutex<()>,
}

impl HandleCache {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self {
            root,
            handles: DashMap::new(),
            missing: DashSet::new(),
            open_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub(crate) fn is_known_missing(&self, relative: &Path) -> bool {
        self.missing.contains(&self.resolve(relative))
    }

    pub(crate) async fn get_read(&self, relative: &Path) -> Result<Arc<FileHandle>, StorageError> {
        let path = self.resolve(relative);

        if let Some(handle) = self.handles.get(&path) {
            return Ok(handle.clone());
        }
        if self.missing.contains(&path) {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }

        let _guard = self.open_lock.lock().await;
        if let Some(handle) = self.handles.get(&path) {
            return Ok(handle.clone());
        }

        let opened = open_with_retry(&path, || {
            let path = path.clone();
            async move { File::open(&path).await }
        })
        .await;

        let file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} does not exist yet", path.display());
                self.missing.insert(path.clone());
                return Err(StorageError::FileNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let handle = Arc::new(FileHandle::new(path.clone(), file, false));
        self.handles.insert(path, handle.clone());
        Ok(handle)
    }

    pub(crate) async fn get_write(&self, relative: &Path) -> Result<Arc<FileHandle>, StorageError> {
        let path = self.resolve(relative);

        if let Some(handle) = self.handles.get(&path) {
            if handle.is_writable() {
                return Ok(handle.clone());
            }
        }

        let _guard = self.open_lock.lock().await;
        if let Some(handle) = self.handles.get(&path) {
            if handle.is_writable() {
                return Ok(handle.clone());
            }
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = open_with_retry(&path, || {
            let path = path.clone();
            async move {
                OpenOptions::new()
                    .create(true)
                    .read(true)
                    .write(true)
                    .truncate(false)
                    .open(&path)
                    .await
            }
        })
        .await?;

        // Replaces any read-only handle; reads already queued keep theirs.
        let handle = Arc::new(FileHandle::new(path.clone(), file, true));
        self.handles.insert(path.clone(), handle.clone());
        self.missing.remove(&path);
        Ok(handle)
    }

    /// Removes every cached handle and returns them.
    pub(crate) fn drain(&self) -> Vec<Arc<FileHandle>> {
        let keys: Vec<PathBuf> = self.handles.iter().map(|r| r.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.handles.remove(&key).map(|(_, handle)| handle))
            .collect()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.handles.len()
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    !matches!(
        e.kind(),
        ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::InvalidInput
            | ErrorKind::AlreadyExists
    )
}

async fn open_with_retry<F, Fut>(path: &Path, mut open: F) -> std::io::Result<std::fs::File>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<File>>,
{
    let mut attempt = 0;
    loop {
        match open().await {
            Ok(file) => return Ok(file.into_std().await),
            Err(e) if is_transient(&e) && attempt + 1 < OPEN_RETRIES => {
                attempt += 1;
                warn!(
                    "Opening {} failed (attempt {}/{}): {}",
                    path.display(),
                    attempt,
                    OPEN_RETRIES,
                    e
                );
                tokio::time::sleep(OPEN_RETRY_DELAY * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
