// crates/db/src/records.rs
//! SQLite implementation of the record repository seam.

use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

use tracedeck_core::record::{Session, TraceRecord, Turn};
use tracedeck_core::store::{RecordContentPatch, RecordScope, RecordStore, StoreError};

use crate::Database;

/// Record repository backed by the shared [`Database`] pool.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db: Database,
}

type RecordRow = (
    String,         // id
    String,         // session_id
    Option<i64>,    // score
    Option<String>, // query
    Option<String>, // reasoning
    Option<String>, // answer
    Option<String>, // messages (JSON)
    String,         // created_at
);

const RECORD_COLUMNS: &str = "id, session_id, score, query, reasoning, answer, messages, created_at";

impl SqliteRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn row_to_record(row: RecordRow) -> TraceRecord {
        let (id, session_id, score, query, reasoning, answer, messages, created_at) = row;
        let messages = messages.and_then(|json| {
            serde_json::from_str::<Vec<Turn>>(&json)
                .map_err(|e| debug!(record_id = %id, error = %e, "malformed messages JSON, treating as flat"))
                .ok()
        });
        TraceRecord {
            id,
            session_id,
            score,
            query,
            reasoning,
            answer,
            messages,
            created_at: Some(created_at),
        }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list_records(
        &self,
        scope: &RecordScope,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<TraceRecord>, StoreError> {
        let rows: Vec<RecordRow> = match scope {
            RecordScope::Session(session_id) => {
                sqlx::query_as(&format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE session_id = ? ORDER BY id LIMIT ? OFFSET ?"
                ))
                .bind(session_id)
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(self.db.pool())
                .await
                .map_err(backend)?
            }
            RecordScope::Ids(ids) => {
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                let placeholders = vec!["?"; ids.len()].join(",");
                let sql = format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE id IN ({placeholders}) ORDER BY id LIMIT ? OFFSET ?"
                );
                let mut query = sqlx::query_as(&sql);
                for id in ids {
                    query = query.bind(id);
                }
                query
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(self.db.pool())
                    .await
                    .map_err(backend)?
            }
            RecordScope::MaxScore(threshold) => {
                sqlx::query_as(&format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE score IS NOT NULL AND score <= ? ORDER BY id LIMIT ? OFFSET ?"
                ))
                .bind(threshold)
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(self.db.pool())
                .await
                .map_err(backend)?
            }
        };

        Ok(rows.into_iter().map(Self::row_to_record).collect())
    }

    async fn get_record(&self, id: &str) -> Result<Option<TraceRecord>, StoreError> {
        let row: Option<RecordRow> =
            sqlx::query_as(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"))
                .bind(id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(backend)?;
        Ok(row.map(Self::row_to_record))
    }

    async fn update_score(&self, id: &str, score: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE records SET score = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now') WHERE id = ?",
        )
        .bind(score)
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_content(
        &self,
        id: &str,
        patch: &RecordContentPatch,
    ) -> Result<(), StoreError> {
        let mut sets: Vec<&str> = Vec::new();
        if patch.query.is_some() {
            sets.push("query = ?");
        }
        if patch.reasoning.is_some() {
            sets.push("reasoning = ?");
        }
        if patch.answer.is_some() {
            sets.push("answer = ?");
        }
        if patch.messages.is_some() {
            sets.push("messages = ?");
        }
        if sets.is_empty() {
            return Ok(());
        }
        sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')");

        let sql = format!("UPDATE records SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);
        if let Some(q) = &patch.query {
            query = query.bind(q);
        }
        if let Some(r) = &patch.reasoning {
            query = query.bind(r);
        }
        if let Some(a) = &patch.answer {
            query = query.bind(a);
        }
        if let Some(m) = &patch.messages {
            let json = serde_json::to_string(m)
                .map_err(|e| StoreError::Backend(format!("messages serialization: {e}")))?;
            query = query.bind(json);
        }

        let result = query.bind(id).execute(self.db.pool()).await.map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_record(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM records WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_record(&self, record: &TraceRecord) -> Result<bool, StoreError> {
        let messages = record
            .messages
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Backend(format!("messages serialization: {e}")))?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO records (id, session_id, score, query, reasoning, answer, messages)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(record.score)
        .bind(&record.query)
        .bind(&record.reasoning)
        .bind(&record.answer)
        .bind(messages)
        .execute(self.db.pool())
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.id, s.name, s.created_at, COUNT(r.id) AS record_count
             FROM sessions s
             LEFT JOIN records r ON r.session_id = s.id
             GROUP BY s.id
             ORDER BY s.created_at DESC, s.id",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|row| Session {
                id: row.get(0),
                name: row.get(1),
                created_at: Some(row.get(2)),
                record_count: row.get(3),
            })
            .collect())
    }

    async fn list_orphans(&self, limit: u32) -> Result<Vec<TraceRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT r.id, r.session_id, r.score, r.query, r.reasoning, r.answer, r.messages, r.created_at
             FROM records r
             LEFT JOIN sessions s ON r.session_id = s.id
             WHERE s.id IS NULL
             ORDER BY r.id
             LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(Self::row_to_record).collect())
    }

    async fn create_session(&self, id: &str, name: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO sessions (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(self.db.pool())
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_session() -> SqliteRecordStore {
        let db = Database::new_in_memory().await.unwrap();
        let store = SqliteRecordStore::new(db);
        store.create_session("sess-1", "batch one").await.unwrap();
        store
    }

    fn record(id: &str, session: &str, score: Option<i64>) -> TraceRecord {
        TraceRecord {
            id: id.into(),
            session_id: session.into(),
            score,
            query: Some(format!("query for {id}")),
            answer: Some(format!("answer for {id}")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = store_with_session().await;
        assert!(store.insert_record(&record("r1", "sess-1", Some(5))).await.unwrap());
        // Duplicate insert is skipped, not an error.
        assert!(!store.insert_record(&record("r1", "sess-1", Some(5))).await.unwrap());

        let fetched = store.get_record("r1").await.unwrap().unwrap();
        assert_eq!(fetched.session_id, "sess-1");
        assert_eq!(fetched.score, Some(5));
        assert!(fetched.created_at.is_some());
    }

    #[tokio::test]
    async fn test_list_by_session_with_paging() {
        let store = store_with_session().await;
        for i in 0..5 {
            store.insert_record(&record(&format!("r{i}"), "sess-1", None)).await.unwrap();
        }

        let page = store
            .list_records(&RecordScope::Session("sess-1".into()), 1, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "r1");
        assert_eq!(page[1].id, "r2");
    }

    #[tokio::test]
    async fn test_list_by_ids() {
        let store = store_with_session().await;
        for i in 0..4 {
            store.insert_record(&record(&format!("r{i}"), "sess-1", None)).await.unwrap();
        }
        let page = store
            .list_records(&RecordScope::Ids(vec!["r3".into(), "r0".into()]), 0, 100)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "r0");
        assert_eq!(page[1].id, "r3");

        let empty = store.list_records(&RecordScope::Ids(vec![]), 0, 100).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_list_by_max_score_excludes_unscored() {
        let store = store_with_session().await;
        store.insert_record(&record("low", "sess-1", Some(2))).await.unwrap();
        store.insert_record(&record("high", "sess-1", Some(9))).await.unwrap();
        store.insert_record(&record("unscored", "sess-1", None)).await.unwrap();

        let page = store.list_records(&RecordScope::MaxScore(5), 0, 100).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "low");
    }

    #[tokio::test]
    async fn test_update_score_and_missing_record() {
        let store = store_with_session().await;
        store.insert_record(&record("r1", "sess-1", None)).await.unwrap();

        store.update_score("r1", 7).await.unwrap();
        assert_eq!(store.get_record("r1").await.unwrap().unwrap().score, Some(7));

        let err = store.update_score("ghost", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_content_partial() {
        let store = store_with_session().await;
        store.insert_record(&record("r1", "sess-1", None)).await.unwrap();

        let patch = RecordContentPatch {
            reasoning: Some("cleaned reasoning".into()),
            answer: Some("new answer".into()),
            ..Default::default()
        };
        store.update_content("r1", &patch).await.unwrap();

        let rec = store.get_record("r1").await.unwrap().unwrap();
        assert_eq!(rec.reasoning.as_deref(), Some("cleaned reasoning"));
        assert_eq!(rec.answer.as_deref(), Some("new answer"));
        // Untouched field survives.
        assert_eq!(rec.query.as_deref(), Some("query for r1"));
    }

    #[tokio::test]
    async fn test_messages_round_trip() {
        let store = store_with_session().await;
        let rec = TraceRecord {
            id: "conv".into(),
            session_id: "sess-1".into(),
            messages: Some(vec![
                Turn { role: "user".into(), content: "q".into() },
                Turn { role: "assistant".into(), content: "a".into() },
            ]),
            ..Default::default()
        };
        store.insert_record(&rec).await.unwrap();

        let fetched = store.get_record("conv").await.unwrap().unwrap();
        assert!(fetched.is_conversational());
        assert_eq!(fetched.messages.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_record() {
        let store = store_with_session().await;
        store.insert_record(&record("r1", "sess-1", None)).await.unwrap();
        assert!(store.delete_record("r1").await.unwrap());
        assert!(!store.delete_record("r1").await.unwrap());
        assert!(store.get_record("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphan_detection_and_repair() {
        let store = store_with_session().await;
        store.insert_record(&record("ok", "sess-1", None)).await.unwrap();
        store.insert_record(&record("lost1", "sess-gone", None)).await.unwrap();
        store.insert_record(&record("lost2", "sess-gone", None)).await.unwrap();

        let orphans = store.list_orphans(100).await.unwrap();
        assert_eq!(orphans.len(), 2);
        assert!(orphans.iter().all(|r| r.session_id == "sess-gone"));

        // Repairing the session clears the orphan list.
        store.create_session("sess-gone", "recovered").await.unwrap();
        assert!(store.list_orphans(100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_sessions_with_counts() {
        let store = store_with_session().await;
        store.create_session("sess-2", "other").await.unwrap();
        store.insert_record(&record("r1", "sess-1", None)).await.unwrap();
        store.insert_record(&record("r2", "sess-1", None)).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        let s1 = sessions.iter().find(|s| s.id == "sess-1").unwrap();
        assert_eq!(s1.record_count, 2);
        assert_eq!(s1.name, "batch one");
    }
}
