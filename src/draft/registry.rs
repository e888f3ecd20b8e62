//! Orchestrator-side bookkeeping: which controller is mounted for which
//! table, and the last snapshot seen per package type.

use std::{collections::HashMap, sync::Arc};

use log::{info, warn};
use tokio::sync::Mutex;

use crate::forms::FormKind;

use super::{controller::DraftController, model::Draft};

pub type ControllerHandle = Arc<Mutex<DraftController>>;

#[derive(Default)]
pub struct ControllerRegistry {
    controllers: HashMap<FormKind, ControllerHandle>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounting a table of a kind that is already registered replaces the
    /// old handle; the old controller is flushed in the background.
    pub async fn register(&mut self, controller: DraftController) -> ControllerHandle {
        let kind = controller.kind();
        let handle = Arc::new(Mutex::new(controller));

        if let Some(previous) = self.controllers.insert(kind, handle.clone()) {
            warn!("replacing mounted controller for {kind}");
            previous.lock().await.unmount();
        }
        handle
    }

    pub fn get(&self, kind: FormKind) -> Option<ControllerHandle> {
        self.controllers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<FormKind> {
        self.controllers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Unmounts and forgets the controller for `kind`.
    pub async fn unregister(&mut self, kind: FormKind) -> bool {
        match self.controllers.remove(&kind) {
            Some(handle) => {
                handle.lock().await.unmount();
                true
            }
            None => false,
        }
    }

    /// The post-submit clear signal for one table. Returns false when no
    /// table of that kind is mounted.
    pub async fn clear(&self, kind: FormKind) -> bool {
        let Some(handle) = self.get(kind) else {
            return false;
        };
        handle.lock().await.clear().await;
        true
    }

    pub async fn clear_all(&self) {
        for (kind, handle) in &self.controllers {
            info!("clearing {kind}");
            handle.lock().await.clear().await;
        }
    }
}

/// Package type -> last snapshot, so switching package types and back does
/// not go through storage.
#[derive(Debug, Default)]
pub struct PackageCache {
    entries: HashMap<String, Draft>,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&mut self, package_type: &str, draft: Draft) {
        self.entries.insert(package_type.to_string(), draft);
    }

    pub fn get(&self, package_type: &str) -> Option<&Draft> {
        self.entries.get(package_type)
    }

    pub fn forget(&mut self, package_type: &str) -> Option<Draft> {
        self.entries.remove(package_type)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
