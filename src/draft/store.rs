//! Draft persistence over a shared key/value medium.
//!
//! `KvBackend` is the raw medium (SQLite in the app, memory in tests).
//! `DraftStore` sits on top and absorbs every failure: a draft that cannot
//! be read is treated as absent and a draft that cannot be written is
//! dropped. Data entry never blocks on storage.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{log_debug, log_error, log_warn};

use super::{key::DraftKey, model::Draft};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "cilt_drafts::store";

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-process medium. Counts writes and can be told to fail, which is
/// what the autosave tests observe.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().await.get(key).cloned()
    }

    pub async fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn check(&self, op: &str, key: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("memory backend refused {op} for {key}");
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check("get", key)?;
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check("set", key)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check("remove", key)?;
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct DraftStore {
    backend: Arc<dyn KvBackend>,
}

impl DraftStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Missing, unreadable and malformed drafts all come back as `None`.
    pub async fn load(&self, key: &DraftKey) -> Option<Draft> {
        let raw = match self.backend.get(key.as_str()).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                log_warn!("failed to read draft {}: {:#}", key, err);
                return None;
            }
        };

        match serde_json::from_str::<Draft>(&raw)
            .with_context(|| format!("malformed draft payload under {key}"))
        {
            Ok(draft) => {
                log_debug!("loaded draft {} ({} rows)", key, draft.rows.len());
                Some(draft)
            }
            Err(err) => {
                log_warn!("{:#}", err);
                None
            }
        }
    }

    pub async fn save(&self, key: &DraftKey, draft: &Draft) {
        if let Err(err) = self.try_save(key, draft).await {
            log_error!("failed to save draft {}: {:#}", key, err);
        }
    }

    pub async fn remove(&self, key: &DraftKey) {
        match self.backend.remove(key.as_str()).await {
            Ok(()) => log_debug!("removed draft {}", key),
            Err(err) => log_error!("failed to remove draft {}: {:#}", key, err),
        }
    }

    async fn try_save(&self, key: &DraftKey, draft: &Draft) -> Result<()> {
        let payload = serde_json::to_string(draft).context("failed to serialize draft")?;
        self.backend.set(key.as_str(), payload).await?;
        log_debug!("saved draft {} ({} rows)", key, draft.rows.len());
        Ok(())
    }
}
