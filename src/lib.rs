//! Local draft persistence for CILT inspection tables.
//!
//! `FormsRuntime` wires the SQLite store, the settings file and the
//! per-table `DraftController`s together for a host application.

mod db;
pub mod draft;
pub mod forms;
pub mod settings;
mod utils;

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex as StdMutex, MutexGuard},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{info, warn};
use tokio::sync::Mutex;

use db::Database;
use draft::{
    AutosaveController, ControllerHandle, ControllerRegistry, DraftContext, DraftController,
    DraftStore, PackageCache, Row,
};
use forms::FormKind;
use settings::SettingsStore;

const DB_FILE: &str = "cilt-drafts.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

/// Reads `RUST_LOG`, defaulting to info. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

pub struct FormsRuntime {
    db: Database,
    settings: SettingsStore,
    store: DraftStore,
    registry: Mutex<ControllerRegistry>,
    /// One cache per table kind; package type names repeat across kinds.
    packages: StdMutex<HashMap<FormKind, PackageCache>>,
}

impl FormsRuntime {
    /// Opens (or creates) the draft database and settings under `data_dir`
    /// and drops drafts older than the configured retention.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DB_FILE))?;
        let settings = SettingsStore::new(data_dir.join(SETTINGS_FILE))?;

        let retention = settings.current().draft_retention_days;
        let cutoff = Utc::now().checked_sub_signed(ChronoDuration::days(i64::from(retention)));
        let pruned = match cutoff {
            Some(cutoff) => db
                .prune_drafts_older_than(cutoff)
                .await
                .context("failed to prune stale drafts")?,
            None => {
                warn!("Retention of {retention} days reaches past the calendar; skipping prune");
                0
            }
        };
        let remaining = db.count_drafts().await?;
        info!(
            "Drafts ready at {} ({remaining} kept, {pruned} older than {retention} days pruned)",
            db.path().display()
        );

        let store = DraftStore::new(Arc::new(db.clone()));
        Ok(Self {
            db,
            settings,
            store,
            registry: Mutex::new(ControllerRegistry::new()),
            packages: StdMutex::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn store(&self) -> &DraftStore {
        &self.store
    }

    /// Builds, loads and registers the controller for one table. A table of
    /// the same kind that is still mounted gets unmounted.
    pub async fn mount_form(
        &self,
        kind: FormKind,
        context: DraftContext,
        initial_data: Vec<Row>,
    ) -> Result<ControllerHandle> {
        let settings = self.settings.current();
        let profile = kind
            .profile(&settings.key_tokens())
            .with_context(|| format!("failed to build profile for {kind}"))?;
        let autosave = AutosaveController::new(self.store.clone(), settings.debounce());

        let mut controller = DraftController::new(profile, context, autosave);
        controller.mount(initial_data).await;

        Ok(self.registry.lock().await.register(controller).await)
    }

    pub async fn controller(&self, kind: FormKind) -> Option<ControllerHandle> {
        self.registry.lock().await.get(kind)
    }

    pub async fn unmount_form(&self, kind: FormKind) -> bool {
        self.registry.lock().await.unregister(kind).await
    }

    /// Post-submit clear for one table.
    pub async fn clear_form(&self, kind: FormKind) -> bool {
        self.registry.lock().await.clear(kind).await
    }

    pub async fn clear_all(&self) {
        self.registry.lock().await.clear_all().await;
        self.packages_guard().clear();
    }

    /// Switches a mounted table to another package type. The outgoing
    /// table is cached, so switching back restores it as it was left.
    pub async fn switch_package(&self, kind: FormKind, package_type: &str) -> bool {
        let Some(handle) = self.controller(kind).await else {
            warn!("package switch for unmounted {kind}");
            return false;
        };
        let mut controller = handle.lock().await;

        let outgoing = controller.context().package_type.clone();
        if outgoing == package_type {
            return false;
        }

        let cached = {
            let mut packages = self.packages_guard();
            let cache = packages.entry(kind).or_default();
            cache.remember(&outgoing, controller.snapshot());
            cache.get(package_type).cloned()
        };

        let context = DraftContext {
            package_type: package_type.to_string(),
            ..controller.context().clone()
        };
        controller.set_context(context).await;

        if let Some(draft) = cached {
            if draft.has_content() {
                controller.restore(draft);
            }
        }
        true
    }

    /// Keys of every stored draft for `kind`.
    pub async fn saved_drafts(&self, kind: FormKind) -> Result<Vec<String>> {
        self.db
            .draft_keys_with_prefix(&format!("{}_", kind.as_str()))
            .await
    }

    pub async fn draft_saved_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        self.db.draft_updated_at(key).await
    }

    fn packages_guard(&self) -> MutexGuard<'_, HashMap<FormKind, PackageCache>> {
        match self.packages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
