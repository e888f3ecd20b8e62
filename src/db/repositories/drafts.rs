use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::{
    db::{
        helpers::{format_datetime, parse_datetime, to_usize},
        Database,
    },
    draft::KvBackend,
};

impl Database {
    pub async fn get_draft(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let payload = conn
                .query_row(
                    "SELECT payload FROM drafts WHERE key = ?1",
                    params![key],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .with_context(|| format!("failed to read draft {key}"))?;
            Ok(payload)
        })
        .await
    }

    /// Insert or replace, stamping `updated_at`.
    pub async fn put_draft(
        &self,
        key: &str,
        payload: String,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO drafts (key, payload, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     payload = excluded.payload,
                     updated_at = excluded.updated_at",
                params![key, payload, format_datetime(updated_at)],
            )
            .with_context(|| format!("failed to write draft {key}"))?;
            Ok(())
        })
        .await
    }

    pub async fn delete_draft(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM drafts WHERE key = ?1", params![key])
                .with_context(|| format!("failed to delete draft {key}"))?;
            Ok(())
        })
        .await
    }

    pub async fn draft_updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT updated_at FROM drafts WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|value| parse_datetime(&value, "updated_at"))
                .transpose()
        })
        .await
    }

    /// Keys starting with `prefix`, e.g. every segregation draft.
    pub async fn draft_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM drafts
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;

            let keys = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(keys)
        })
        .await
    }

    pub async fn count_drafts(&self) -> Result<usize> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM drafts", [], |row| row.get(0))?;
            to_usize(count, "draft count")
        })
        .await
    }

    /// Deletes drafts not written since `cutoff`; returns how many went.
    pub async fn prune_drafts_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM drafts WHERE updated_at < ?1",
                    params![format_datetime(cutoff)],
                )
                .context("failed to prune stale drafts")?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl KvBackend for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_draft(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.put_draft(key, value, Utc::now()).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.delete_draft(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{Draft, DraftKey, DraftStore, Row};
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("nested").join("drafts.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn upsert_replaces_payload() {
        let (_dir, db) = open();
        db.put_draft("a", "one".into(), Utc::now()).await.unwrap();
        db.put_draft("a", "two".into(), Utc::now()).await.unwrap();

        assert_eq!(db.get_draft("a").await.unwrap().as_deref(), Some("two"));
        assert_eq!(db.count_drafts().await.unwrap(), 1);

        db.delete_draft("a").await.unwrap();
        assert!(db.get_draft("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefix_listing_is_literal() {
        let (_dir, db) = open();
        for key in ["segregation_L1_draft", "segregation_L2_draft", "screw_cap_L1_draft", "seg%"] {
            db.put_draft(key, "{}".into(), Utc::now()).await.unwrap();
        }

        let keys = db.draft_keys_with_prefix("segregation_").await.unwrap();
        assert_eq!(keys, vec!["segregation_L1_draft", "segregation_L2_draft"]);
        assert_eq!(db.draft_keys_with_prefix("seg%").await.unwrap(), vec!["seg%"]);
    }

    #[tokio::test]
    async fn prune_removes_only_stale_drafts() {
        let (_dir, db) = open();
        let now = Utc::now();
        db.put_draft("old", "{}".into(), now - Duration::days(30)).await.unwrap();
        db.put_draft("fresh", "{}".into(), now).await.unwrap();

        let removed = db.prune_drafts_older_than(now - Duration::days(14)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_draft("fresh").await.unwrap().is_some());
        assert!(db.draft_updated_at("old").await.unwrap().is_none());
        assert!(db.draft_updated_at("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn draft_store_round_trips_through_sqlite() {
        let (dir, db) = open();
        let store = DraftStore::new(Arc::new(db));
        let key = DraftKey::from("paper_usage_Line_1_A_Milk_sam_PO-7_draft");

        let mut filled = Row::empty(1);
        filled.user = "sam".into();
        filled.time = "13:05".into();
        filled.set("paperUsedKg", "18.5");
        let draft = Draft::new(vec![filled, Row::empty(2)], Default::default());

        store.save(&key, &draft).await;
        assert_eq!(store.load(&key).await, Some(draft.clone()));
        drop(store);

        let reopened = Database::new(dir.path().join("nested").join("drafts.sqlite3")).unwrap();
        let store = DraftStore::new(Arc::new(reopened));
        assert_eq!(store.load(&key).await, Some(draft));
    }
}
