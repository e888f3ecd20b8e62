//! One `DraftController` per mounted inspection table.
//!
//! Flow of an edit: the row list mutates, derived columns are recomputed in
//! the same call, the snapshot goes to autosave, and the host is told about
//! the filled rows.

use std::sync::Arc;

use log::info;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::forms::{FormKind, FormProfile};

use super::{
    autosave::{AutosaveController, AutosaveState},
    derive::{DeriveContext, DerivedFieldEngine},
    key::{DraftContext, DraftKey, DraftKeyBuilder, KeyMode},
    model::{rows_from_json, Draft, FormData, Row},
    rows::{Edit, RowListModel, Stamp},
    store::DraftStore,
};

pub type DataChangeCallback = Arc<dyn Fn(&[Row]) + Send + Sync>;

/// What the orchestrator bundles for the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub form: FormKind,
    pub rows: Vec<Row>,
    pub form_data: FormData,
}

pub struct DraftController {
    instance_id: Uuid,
    kind: FormKind,
    keys: DraftKeyBuilder,
    context: DraftContext,
    key: DraftKey,
    store: DraftStore,
    model: RowListModel,
    form_data: FormData,
    engine: DerivedFieldEngine,
    autosave: AutosaveController,
    on_data_change: Option<DataChangeCallback>,
}

impl DraftController {
    pub fn new(profile: FormProfile, context: DraftContext, autosave: AutosaveController) -> Self {
        let key = profile.keys.build_key(&context, KeyMode::Primary);
        let store = autosave.store().clone();

        Self {
            instance_id: Uuid::new_v4(),
            kind: profile.kind,
            keys: profile.keys,
            context,
            key,
            store,
            model: RowListModel::new(profile.completion),
            form_data: FormData::new(),
            engine: DerivedFieldEngine::new(profile.derive),
            autosave,
            on_data_change: None,
        }
    }

    pub fn set_on_data_change(&mut self, callback: DataChangeCallback) {
        self.on_data_change = Some(callback);
    }

    pub fn kind(&self) -> FormKind {
        self.kind
    }

    pub fn key(&self) -> &DraftKey {
        &self.key
    }

    pub fn context(&self) -> &DraftContext {
        &self.context
    }

    pub fn state(&self) -> AutosaveState {
        self.autosave.state()
    }

    pub fn rows(&self) -> &[Row] {
        self.model.rows()
    }

    pub fn form_data(&self) -> &FormData {
        &self.form_data
    }

    /// Loads the stored draft for the current key and merges `initial_data`
    /// under it. Also used to reload after a key change.
    pub async fn mount(&mut self, initial_data: Vec<Row>) {
        self.autosave.begin_loading(self.key.clone());

        let stored = self.load_stored().await;
        let restored = stored.is_some();
        let (rows, form_data) = merge_on_load(stored, initial_data);

        self.model.replace(rows);
        self.form_data = form_data;
        let context = self.derive_context();
        self.engine.apply(self.model.rows_mut(), &context);

        self.autosave.finish_loading();
        info!(
            "[{}] mounted {} under {} ({} rows, restored: {})",
            self.instance_id,
            self.kind,
            self.key,
            self.model.len(),
            restored
        );
        self.emit();
    }

    /// `mount` for a loosely typed `initialData` payload as delivered by the
    /// host; anything that is not an array of objects counts as no rows.
    pub async fn mount_json(&mut self, initial_data: &Value) {
        self.mount(rows_from_json(initial_data)).await;
    }

    pub fn update(&mut self, index: usize, field: &str, value: &str) -> Edit {
        let stamp = Stamp::now(&self.context.username);
        let edit = self.model.update(index, field, value, &stamp);

        if let Edit::Applied { .. } = edit {
            if let Some(row) = self.model.rows_mut().get_mut(index) {
                self.engine.note_manual_edit(row, field);
            }
            self.settle();
        }
        edit
    }

    pub fn delete_row(&mut self, index: usize) -> bool {
        let deleted = self.model.delete(index);
        if deleted {
            self.settle();
        }
        deleted
    }

    pub fn set_form_field(&mut self, name: &str, value: &str) {
        self.form_data.insert(name.to_string(), value.to_string());
        self.settle();
    }

    /// Applies a new screen context. A different key means a different
    /// draft: the old one is flushed and the new one loaded. A line change
    /// re-letters date codes.
    pub async fn set_context(&mut self, context: DraftContext) {
        if context == self.context {
            return;
        }

        let line_changed = context.line != self.context.line;
        let next_key = self.keys.build_key(&context, KeyMode::Primary);
        self.context = context;

        let reloaded = next_key != self.key;
        if reloaded {
            self.autosave.flush().await;
            self.key = next_key;
            self.mount(Vec::new()).await;
        }

        let relettered = line_changed
            && self
                .engine
                .apply_line_suffix(self.model.rows_mut(), &self.context.line)
                > 0;

        if relettered || !reloaded {
            self.settle();
        }
    }

    /// Replaces the table with a cached snapshot (package type switch).
    pub fn restore(&mut self, draft: Draft) {
        self.model.replace(draft.rows);
        self.form_data = draft.form_data;
        self.settle();
    }

    pub fn snapshot(&self) -> Draft {
        Draft::new(self.model.rows().to_vec(), self.form_data.clone())
    }

    pub fn submission(&self) -> Submission {
        Submission {
            form: self.kind,
            rows: self.model.filled_rows(),
            form_data: self.form_data.clone(),
        }
    }

    pub fn effective_flavour(&self) -> String {
        self.engine
            .effective_flavour(self.model.rows(), &self.derive_context())
    }

    /// Navigation blur.
    pub async fn blur(&self) {
        self.autosave.flush().await;
    }

    /// Best-effort flush; the write finishes after the table is gone.
    pub fn unmount(&self) {
        self.autosave.flush_in_background();
    }

    /// After a successful submission or a form reset.
    pub async fn clear(&mut self) {
        self.autosave.clear().await;
        self.model.reset();
        self.form_data.clear();
        info!("[{}] cleared {} ({})", self.instance_id, self.kind, self.key);
        self.emit();
    }

    fn settle(&mut self) {
        let context = self.derive_context();
        self.engine.apply(self.model.rows_mut(), &context);
        self.autosave.on_change(self.snapshot());
        self.emit();
    }

    fn emit(&self) {
        if let Some(callback) = &self.on_data_change {
            callback(&self.model.filled_rows());
        }
    }

    fn derive_context(&self) -> DeriveContext {
        DeriveContext {
            base_product: self.context.product.trim().to_string(),
            line: self.context.line.trim().to_string(),
        }
    }

    /// Primary key first; a draft found under the legacy layout is moved
    /// to the primary key.
    async fn load_stored(&self) -> Option<Draft> {
        if let Some(draft) = self.store.load(&self.key).await {
            return Some(draft);
        }

        let legacy = self.keys.legacy_key(&self.context)?;
        let draft = self.store.load(&legacy).await?;
        info!("migrating draft {} to {}", legacy, self.key);
        self.store.save(&self.key, &draft).await;
        self.store.remove(&legacy).await;
        Some(draft)
    }
}

/// A stored draft with any filled row wins over `initial_data`; its
/// table-level fields are kept either way.
fn merge_on_load(stored: Option<Draft>, initial_data: Vec<Row>) -> (Vec<Row>, FormData) {
    match stored {
        Some(draft) if draft.has_content() => (draft.rows, draft.form_data),
        Some(draft) => (initial_data, draft.form_data),
        None => (initial_data, FormData::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{
        key::KeyTokens,
        store::{KvBackend, MemoryBackend},
    };
    use std::{sync::Mutex, time::Duration};
    use tokio::time;

    struct Harness {
        backend: Arc<MemoryBackend>,
        emitted: Arc<Mutex<Vec<Vec<Row>>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                backend: Arc::new(MemoryBackend::new()),
                emitted: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn controller(&self, kind: FormKind, context: DraftContext) -> DraftController {
            let store = DraftStore::new(self.backend.clone());
            let autosave = AutosaveController::new(store, Duration::from_millis(400));
            let profile = kind.profile(&KeyTokens::default()).unwrap();
            let mut controller = DraftController::new(profile, context, autosave);

            let emitted = self.emitted.clone();
            controller.set_on_data_change(Arc::new(move |rows: &[Row]| {
                emitted.lock().unwrap().push(rows.to_vec());
            }));
            controller
        }

        fn last_emitted(&self) -> Vec<Row> {
            self.emitted.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    fn context(line: &str) -> DraftContext {
        DraftContext {
            line: line.into(),
            shift: "A".into(),
            product: "Mango".into(),
            username: "amir".into(),
            ..DraftContext::default()
        }
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        let mut row = Row::default();
        for (field, value) in pairs {
            row.set(field, *value);
        }
        row
    }

    #[tokio::test(start_paused = true)]
    async fn first_keystroke_grows_the_table_and_reports_one_row() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller.mount(Vec::new()).await;
        assert_eq!(controller.state(), AutosaveState::Ready);

        controller.update(0, "qty", "5");

        assert_eq!(controller.rows().len(), 2);
        let first = &controller.rows()[0];
        assert_eq!(first.get("qty"), "5");
        assert_eq!(first.user, "amir");
        assert_eq!(first.time.len(), 5);
        assert_eq!(&first.time[2..3], ":");

        let reported = harness.last_emitted();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].get("qty"), "5");
    }

    #[tokio::test(start_paused = true)]
    async fn two_quick_edits_write_once() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller.mount(Vec::new()).await;

        controller.update(0, "qty", "5");
        controller.update(0, "qty", "55");
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(harness.backend.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remount_restores_the_saved_draft() {
        let harness = Harness::new();
        let mut first = harness.controller(FormKind::PressureCheck, context("Line 1"));
        first.mount(Vec::new()).await;
        first.update(0, "pressure", "4.2");
        first.set_form_field("activeTab", "filler");
        first.blur().await;

        let mut second = harness.controller(FormKind::PressureCheck, context("Line 1"));
        second.mount(vec![row(&[("pressure", "9.9")])]).await;

        assert_eq!(second.rows().len(), 2);
        assert_eq!(second.rows()[0].get("pressure"), "4.2");
        assert_eq!(second.form_data().get("activeTab").map(String::as_str), Some("filler"));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_data_is_used_without_a_stored_draft() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller
            .mount(vec![row(&[("pressure", "3")]), row(&[("pressure", "4")])])
            .await;

        let ids: Vec<u32> = controller.rows().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(harness.last_emitted().len(), 2);
        assert_eq!(harness.backend.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn json_initial_data_is_normalised_on_mount() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller
            .mount_json(&serde_json::json!([
                { "id": 7, "pressure": 3.5, "user": "lina" },
                "not a row",
                { "pressure": null }
            ]))
            .await;

        assert_eq!(controller.rows().len(), 2);
        assert_eq!(controller.rows()[0].id, 1);
        assert_eq!(controller.rows()[0].get("pressure"), "3.5");
        assert_eq!(controller.rows()[0].user, "lina");
        assert_eq!(harness.last_emitted().len(), 1);

        let mut empty = harness.controller(FormKind::PressureCheck, context("Line 2"));
        empty.mount_json(&serde_json::json!({ "rows": [] })).await;
        assert_eq!(empty.rows().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn legacy_drafts_move_to_the_primary_key() {
        let harness = Harness::new();
        let legacy = r#"{"rows":[{"id":1,"pressure":"2.5"}],"timestamp":"2026-10-01T06:00:00Z"}"#;
        harness
            .backend
            .insert_raw("pressure_check_Line_1_A_Mango_amir", legacy)
            .await;

        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller.mount(Vec::new()).await;

        assert_eq!(controller.rows()[0].get("pressure"), "2.5");
        assert!(harness
            .backend
            .get("pressure_check_Line_1_A_Mango_amir")
            .await
            .unwrap()
            .is_none());
        assert!(harness.backend.raw(controller.key().as_str()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn a_primary_draft_is_not_taken_as_another_contexts_legacy_draft() {
        let harness = Harness::new();
        let mut owner = harness.controller(FormKind::PressureCheck, context("Line 1"));
        owner.mount(Vec::new()).await;
        owner.update(0, "pressure", "4");
        owner.blur().await;

        let mut shift = context("Line 1");
        shift.username = "amir draft".into();
        // Legacy layout of this context spells the owner's primary key.
        let mut other = harness.controller(FormKind::PressureCheck, shift);
        other.mount(Vec::new()).await;

        assert!(!other.rows()[0].has_content());
        assert!(harness.backend.raw(owner.key().as_str()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn switching_line_swaps_drafts() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller.mount(Vec::new()).await;
        controller.update(0, "pressure", "4");

        controller.set_context(context("Line 2")).await;
        assert_eq!(controller.rows().len(), 1);
        assert!(harness.last_emitted().is_empty());

        controller.set_context(context("Line 1")).await;
        assert_eq!(controller.rows()[0].get("pressure"), "4");
    }

    #[tokio::test(start_paused = true)]
    async fn line_change_reletters_date_codes_when_key_is_unchanged() {
        let harness = Harness::new();
        let profile = FormKind::ScrewCap.profile(&KeyTokens::default()).unwrap();
        // Key without the line so the same draft stays mounted.
        let keys = DraftKeyBuilder::new("screw_cap", &[crate::draft::key::ContextField::Username])
            .unwrap();
        let profile = FormProfile { keys, ..profile };
        let autosave = AutosaveController::new(
            DraftStore::new(harness.backend.clone()),
            Duration::from_millis(400),
        );
        let mut controller = DraftController::new(profile, context("Line 1"), autosave);
        controller.mount(Vec::new()).await;

        controller.update(0, "dateCode", "12/10/26");
        controller.set_context(context("Line 2")).await;
        assert_eq!(controller.rows()[0].get("dateCode"), "12/10/26B");

        controller.update(1, "dateCode", "see QA");
        controller.set_context(context("Line 3")).await;
        assert_eq!(controller.rows()[0].get("dateCode"), "12/10/26C");
        assert_eq!(controller.rows()[1].get("dateCode"), "see QA");
    }

    #[tokio::test(start_paused = true)]
    async fn auto_sum_respects_manual_totals() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::ScrewCap, context("Line 1"));
        controller.mount(Vec::new()).await;

        controller.update(0, "capsUsed", "3");
        controller.update(0, "capsRejected", "4");
        assert_eq!(controller.rows()[0].get("capsTotal"), "7");

        controller.update(0, "capsTotal", "99");
        controller.update(0, "capsUsed", "30");
        assert_eq!(controller.rows()[0].get("capsTotal"), "99");
    }

    #[tokio::test(start_paused = true)]
    async fn segregation_rows_pick_up_the_active_flavour() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::Segregation, context("Line 1"));
        controller.mount(Vec::new()).await;

        controller.update(0, "type", "Change Over");
        assert_eq!(controller.rows().len(), 1);
        assert_eq!(controller.rows()[0].get("flavour"), "Mango");

        controller.update(0, "dateCode", "12/10/26");
        assert_eq!(controller.rows().len(), 2);
        assert!(!controller.rows()[1].has_content());
        assert_eq!(controller.effective_flavour(), "Mango");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_removes_the_draft_and_resets() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller.mount(Vec::new()).await;
        controller.update(0, "pressure", "4");
        controller.blur().await;

        controller.clear().await;
        time::sleep(Duration::from_secs(1)).await;

        assert_eq!(controller.rows().len(), 1);
        assert!(harness.last_emitted().is_empty());
        assert!(harness.backend.raw(controller.key().as_str()).await.is_none());

        controller.update(0, "pressure", "5");
        controller.blur().await;
        assert!(harness.backend.raw(controller.key().as_str()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn delete_and_submission_skip_the_open_row() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PaperUsage, context("Line 1"));
        controller.mount(Vec::new()).await;
        controller.update(0, "paperUsedKg", "10");
        controller.update(1, "paperUsedKg", "12");

        assert!(controller.delete_row(0));
        let submission = controller.submission();
        assert_eq!(submission.form, FormKind::PaperUsage);
        assert_eq!(submission.rows.len(), 1);
        assert_eq!(submission.rows[0].id, 1);
        assert_eq!(submission.rows[0].get("paperUsedKg"), "12");
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_flushes_in_the_background() {
        let harness = Harness::new();
        let mut controller = harness.controller(FormKind::PressureCheck, context("Line 1"));
        controller.mount(Vec::new()).await;
        controller.update(0, "pressure", "4");
        controller.unmount();
        drop(controller);

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(harness.backend.write_count(), 1);
    }
}
