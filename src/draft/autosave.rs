//! Debounced write-through of draft snapshots.
//!
//! Every mutation hands the controller a fresh snapshot. Only the last
//! snapshot inside the debounce window is written. While the initial read
//! is in flight (`Loading`) snapshots are dropped, so a late save can never
//! overwrite the draft that is about to be restored.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serde::Serialize;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::{log_debug, log_info};

use super::{key::DraftKey, model::Draft, store::DraftStore};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "cilt_drafts::autosave";

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AutosaveState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}

#[derive(Default)]
struct AutosaveInner {
    state: AutosaveState,
    key: Option<DraftKey>,
    pending: Option<Draft>,
    timer: Option<CancellationToken>,
}

impl AutosaveInner {
    fn cancel_timer(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
    }
}

#[derive(Clone)]
pub struct AutosaveController {
    store: DraftStore,
    delay: Duration,
    inner: Arc<Mutex<AutosaveInner>>,
}

impl AutosaveController {
    pub fn new(store: DraftStore, delay: Duration) -> Self {
        Self {
            store,
            delay,
            inner: Arc::new(Mutex::new(AutosaveInner::default())),
        }
    }

    pub fn store(&self) -> &DraftStore {
        &self.store
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn state(&self) -> AutosaveState {
        self.lock().state
    }

    pub fn key(&self) -> Option<DraftKey> {
        self.lock().key.clone()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Enters `Loading` for `key`. Anything still pending belongs to the
    /// previous key and must be flushed by the caller beforehand.
    pub fn begin_loading(&self, key: DraftKey) {
        let mut inner = self.lock();
        inner.cancel_timer();
        inner.pending = None;
        inner.key = Some(key);
        inner.state = AutosaveState::Loading;
    }

    /// Found or not, a completed read makes the controller `Ready`.
    pub fn finish_loading(&self) {
        let mut inner = self.lock();
        if inner.state == AutosaveState::Loading {
            inner.state = AutosaveState::Ready;
        }
    }

    /// Schedules `draft` for writing after the debounce delay, replacing any
    /// snapshot still waiting. Must be called inside a tokio runtime.
    /// Returns false when the snapshot was dropped because no draft has been
    /// loaded yet.
    pub fn on_change(&self, draft: Draft) -> bool {
        let (token, key) = {
            let mut inner = self.lock();
            if inner.state != AutosaveState::Ready {
                log_debug!("ignoring change while {:?}", inner.state);
                return false;
            }
            let Some(key) = inner.key.clone() else {
                return false;
            };

            inner.cancel_timer();
            inner.pending = Some(draft);
            let token = CancellationToken::new();
            inner.timer = Some(token.clone());
            (token, key)
        };

        let inner = self.inner.clone();
        let store = self.store.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = time::sleep(delay) => {}
            }

            let draft = {
                let mut guard = lock_inner(&inner);
                if token.is_cancelled() {
                    return;
                }
                guard.timer = None;
                guard.pending.take()
            };

            // Once past the timer the write runs to completion even if a
            // newer edit arrives meanwhile.
            if let Some(draft) = draft {
                store.save(&key, &draft).await;
            }
        });

        true
    }

    /// Writes the waiting snapshot now, if any.
    pub async fn flush(&self) {
        let (key, draft) = {
            let mut inner = self.lock();
            inner.cancel_timer();
            (inner.key.clone(), inner.pending.take())
        };

        if let (Some(key), Some(draft)) = (key, draft) {
            log_debug!("flushing draft {}", key);
            self.store.save(&key, &draft).await;
        }
    }

    /// Unmount path: the flush is started but not awaited.
    pub fn flush_in_background(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            controller.flush().await;
        });
    }

    /// Drops anything pending and deletes the stored draft.
    pub async fn clear(&self) {
        let key = {
            let mut inner = self.lock();
            inner.cancel_timer();
            inner.pending = None;
            inner.key.clone()
        };

        if let Some(key) = key {
            log_info!("clearing draft {}", key);
            self.store.remove(&key).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, AutosaveInner> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<AutosaveInner>) -> MutexGuard<'_, AutosaveInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{model::Row, store::MemoryBackend};

    fn draft_with(qty: &str) -> Draft {
        let mut row = Row::empty(1);
        row.set("qty", qty);
        Draft::new(vec![row, Row::empty(2)], Default::default())
    }

    fn ready_controller(backend: &Arc<MemoryBackend>) -> AutosaveController {
        let autosave =
            AutosaveController::new(DraftStore::new(backend.clone()), Duration::from_millis(400));
        autosave.begin_loading(DraftKey::from("paper_L1_draft"));
        autosave.finish_loading();
        autosave
    }

    async fn stored(backend: &MemoryBackend) -> Option<Draft> {
        let raw = backend.raw("paper_L1_draft").await?;
        serde_json::from_str(&raw).ok()
    }

    #[tokio::test(start_paused = true)]
    async fn edits_inside_the_window_coalesce_into_one_write() {
        let backend = Arc::new(MemoryBackend::new());
        let autosave = ready_controller(&backend);

        assert!(autosave.on_change(draft_with("1")));
        time::sleep(Duration::from_millis(100)).await;
        assert!(autosave.on_change(draft_with("12")));
        assert_eq!(backend.write_count(), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.write_count(), 1);
        assert_eq!(stored(&backend).await.unwrap().rows[0].get("qty"), "12");
        assert!(!autosave.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn edits_in_separate_windows_write_twice() {
        let backend = Arc::new(MemoryBackend::new());
        let autosave = ready_controller(&backend);

        autosave.on_change(draft_with("1"));
        time::sleep(Duration::from_secs(1)).await;
        autosave.on_change(draft_with("2"));
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(backend.write_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn changes_while_loading_are_not_saved() {
        let backend = Arc::new(MemoryBackend::new());
        let autosave =
            AutosaveController::new(DraftStore::new(backend.clone()), Duration::from_millis(400));
        assert_eq!(autosave.state(), AutosaveState::Uninitialized);
        assert!(!autosave.on_change(draft_with("1")));

        autosave.begin_loading(DraftKey::from("paper_L1_draft"));
        assert_eq!(autosave.state(), AutosaveState::Loading);
        assert!(!autosave.on_change(draft_with("1")));

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.write_count(), 0);

        autosave.finish_loading();
        assert_eq!(autosave.state(), AutosaveState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_immediately_and_cancels_the_timer() {
        let backend = Arc::new(MemoryBackend::new());
        let autosave = ready_controller(&backend);

        autosave.on_change(draft_with("7"));
        autosave.flush().await;
        assert_eq!(backend.write_count(), 1);

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.write_count(), 1);

        autosave.flush().await;
        assert_eq!(backend.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_flush_completes_on_its_own() {
        let backend = Arc::new(MemoryBackend::new());
        let autosave = ready_controller(&backend);

        autosave.on_change(draft_with("3"));
        autosave.flush_in_background();
        time::sleep(Duration::from_millis(10)).await;

        assert_eq!(backend.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_removes_the_draft_and_drops_pending_work() {
        let backend = Arc::new(MemoryBackend::new());
        let autosave = ready_controller(&backend);

        autosave.on_change(draft_with("3"));
        autosave.flush().await;
        autosave.on_change(draft_with("4"));
        autosave.clear().await;

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.write_count(), 1);
        assert!(stored(&backend).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_do_not_poison_later_saves() {
        let backend = Arc::new(MemoryBackend::new());
        let autosave = ready_controller(&backend);

        backend.set_failing(true);
        autosave.on_change(draft_with("1"));
        time::sleep(Duration::from_secs(1)).await;
        assert!(stored(&backend).await.is_none());

        backend.set_failing(false);
        autosave.on_change(draft_with("2"));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stored(&backend).await.unwrap().rows[0].get("qty"), "2");
    }
}
