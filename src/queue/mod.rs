//! [`DownloadQueue`] — the single re-entrant-by-convention lock point for
//! every mutation to the NzbInfo/FileInfo/ArticleInfo/history graph (§4.2,
//! §5 "the queue lock").
//!
//! Re-entrancy is not implemented (a plain `tokio::sync::Mutex`) since every
//! call site in this crate acquires, does its work, then releases — a
//! non-reentrant mutex is sufficient and avoids the bookkeeping a reentrant
//! lock would need under async cancellation.

mod edit;
mod state;

pub use edit::{EditAction, EditError};
pub use state::QueueState;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::model::NzbId;

/// Shared handle to the queue. Clone freely — it's an `Arc` underneath.
#[derive(Clone)]
pub struct DownloadQueue {
    state: Arc<Mutex<QueueState>>,
    mass_edit_depth: Arc<AtomicUsize>,
    /// Fired when a snapshot should be written: after any mutating guard
    /// drops outside of mass-edit mode. The engine's persistence task
    /// awaits this rather than polling.
    save_requested: Arc<Notify>,
}

impl Default for DownloadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::new())),
            mass_edit_depth: Arc::new(AtomicUsize::new(0)),
            save_requested: Arc::new(Notify::new()),
        }
    }

    /// Construct a queue pre-seeded with restored state (used by C8 on
    /// startup recovery).
    pub fn from_state(state: QueueState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            mass_edit_depth: Arc::new(AtomicUsize::new(0)),
            save_requested: Arc::new(Notify::new()),
        }
    }

    /// Acquire the queue lock. The returned guard derefs to [`QueueState`]
    /// for reads; use [`QueueGuard::mark_dirty`] (or the edit helpers,
    /// which call it for you) to request a snapshot on drop.
    pub async fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            inner: self.state.lock().await,
            mass_edit_depth: &self.mass_edit_depth,
            save_requested: &self.save_requested,
            dirty: false,
        }
    }

    /// Enter "mass edit" mode: snapshot writes are deferred until the
    /// returned guard (and any nested ones) are dropped. Mirrors
    /// `CoordinatorDownloadQueue::m_massEdit`/`m_wantSave`.
    pub fn begin_mass_edit(&self) -> MassEditGuard {
        self.mass_edit_depth.fetch_add(1, Ordering::SeqCst);
        MassEditGuard {
            depth: self.mass_edit_depth.clone(),
            save_requested: self.save_requested.clone(),
        }
    }

    /// Wait until a mutation has requested a snapshot write. Intended for
    /// the persistence task's main loop.
    pub async fn wait_for_save_request(&self) {
        self.save_requested.notified().await;
    }

    pub fn apply_edit(
        &self,
        id: NzbId,
        action: EditAction,
    ) -> impl std::future::Future<Output = Result<(), EditError>> + '_ {
        async move {
            let mut guard = self.lock().await;
            let result = guard.apply_edit(id, &action);
            if result.is_ok() {
                guard.mark_dirty();
            }
            result
        }
    }
}

/// RAII guard held while the queue lock is taken.
pub struct QueueGuard<'a> {
    inner: MutexGuard<'a, QueueState>,
    mass_edit_depth: &'a AtomicUsize,
    save_requested: &'a Notify,
    dirty: bool,
}

impl std::ops::Deref for QueueGuard<'_> {
    type Target = QueueState;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for QueueGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl QueueGuard<'_> {
    /// Mark that this critical section mutated queue state and a snapshot
    /// should be written once we are not inside mass-edit mode.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if self.dirty && self.mass_edit_depth.load(Ordering::SeqCst) == 0 {
            self.save_requested.notify_one();
        }
    }
}

/// RAII mass-edit scope. Dropping the last nested guard flushes a single
/// deferred save request.
pub struct MassEditGuard {
    depth: Arc<AtomicUsize>,
    save_requested: Arc<Notify>,
}

impl Drop for MassEditGuard {
    fn drop(&mut self) {
        if self.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.save_requested.notify_one();
        }
    }
}
