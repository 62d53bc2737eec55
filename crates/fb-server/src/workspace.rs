//! Run workspaces: one directory and one concurrency permit per request.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fb_core::{EvalId, WORKSPACE_DIR_PREFIX};
use fb_deploy::WorkspaceDef;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ServiceError, ServiceResult};

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Allocates workspaces under one root, at most `max_concurrent` at a time.
///
/// Waiters are admitted in submission order (the semaphore is fair).
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    permits: Arc<Semaphore>,
    capacity: usize,
    queue_wait: Option<Duration>,
    live: Arc<AtomicUsize>,
}

impl WorkspaceManager {
    pub fn new(def: &WorkspaceDef) -> ServiceResult<Self> {
        std::fs::create_dir_all(&def.root).map_err(|e| ServiceError::workspace(&def.root, e))?;
        let queue_wait = def
            .queue_wait_s
            .map(|s| Duration::try_from_secs_f64(s).unwrap_or(Duration::MAX));
        Ok(Self {
            root: def.root.clone(),
            permits: Arc::new(Semaphore::new(def.max_concurrent)),
            capacity: def.max_concurrent,
            queue_wait,
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workspaces allocated and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Remove `eval-*` directories left behind by a previous process.
    pub fn remove_stale(&self) -> ServiceResult<usize> {
        let mut removed = 0;
        let entries = std::fs::read_dir(&self.root).map_err(|e| ServiceError::workspace(&self.root, e))?;
        for entry in entries.flatten() {
            let is_workspace = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(WORKSPACE_DIR_PREFIX));
            if !is_workspace || !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove stale workspace"),
            }
        }
        if removed > 0 {
            tracing::info!(removed, root = %self.root.display(), "removed stale workspaces");
        }
        Ok(removed)
    }

    /// Wait for a permit (bounded by `queue_wait_s`), then create the
    /// workspace directory for `id`.
    pub async fn acquire(&self, id: EvalId) -> ServiceResult<Workspace> {
        let permits = Arc::clone(&self.permits);
        let closed = |_| ServiceError::Internal("workspace semaphore closed".to_string());
        let permit = match self.queue_wait {
            Some(wait) if wait.is_zero() => permits
                .try_acquire_owned()
                .map_err(|_| ServiceError::Overloaded { waited: wait })?,
            Some(wait) => tokio::time::timeout(wait, permits.acquire_owned())
                .await
                .map_err(|_| ServiceError::Overloaded { waited: wait })?
                .map_err(closed)?,
            None => permits.acquire_owned().await.map_err(closed)?,
        };

        let dir = self.root.join(id.workspace_dir_name());
        // create_dir, not create_dir_all: an existing directory is never reused.
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|e| ServiceError::workspace(&dir, e))?;
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(eval_id = %id, dir = %dir.display(), live, "workspace allocated");

        Ok(Workspace {
            id,
            dir,
            permit: Some(permit),
            live: Arc::clone(&self.live),
        })
    }
}

/// An allocated workspace. Released exactly once: by [`Workspace::release`]
/// or, if the owner is dropped early, by `Drop`.
#[derive(Debug)]
pub struct Workspace {
    id: EvalId,
    dir: PathBuf,
    permit: Option<OwnedSemaphorePermit>,
    live: Arc<AtomicUsize>,
}

impl Workspace {
    pub fn id(&self) -> EvalId {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Delete the directory off the executor, then return the permit.
    /// Deletion failures are logged and otherwise ignored.
    pub async fn release(mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let dir = self.dir.clone();
        let id = self.id;
        let live = Arc::clone(&self.live);
        let task = tokio::task::spawn_blocking(move || remove_and_return(id, &dir, &live, permit));
        if let Err(e) = task.await {
            tracing::warn!(eval_id = %self.id, error = %e, "workspace release task failed");
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let dir = std::mem::take(&mut self.dir);
        let id = self.id;
        let live = Arc::clone(&self.live);
        tracing::debug!(eval_id = %id, "workspace dropped without explicit release");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_and_return(id, &dir, &live, permit));
            }
            Err(_) => remove_and_return(id, &dir, &live, permit),
        }
    }
}

fn remove_and_return(id: EvalId, dir: &Path, live: &AtomicUsize, permit: OwnedSemaphorePermit) {
    if let Err(e) = remove_workspace_dir(dir) {
        tracing::warn!(eval_id = %id, dir = %dir.display(), error = %e, "failed to delete workspace");
    }
    live.fetch_sub(1, Ordering::SeqCst);
    drop(permit);
    tracing::debug!(eval_id = %id, "workspace released");
}

/// A killed solver may still be flushing files while the tree is removed;
/// retry briefly until the directory is really gone.
fn remove_workspace_dir(dir: &Path) -> std::io::Result<()> {
    let mut attempt = 0;
    loop {
        match std::fs::remove_dir_all(dir) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Ok(()) if !dir.exists() => return Ok(()),
            Err(e) if attempt >= REMOVE_ATTEMPTS => return Err(e),
            _ if attempt >= REMOVE_ATTEMPTS => {
                return Err(std::io::Error::other("directory reappeared during removal"));
            }
            _ => {}
        }
        attempt += 1;
        std::thread::sleep(REMOVE_RETRY_DELAY);
    }
}
