//! SQLite-backed durable storage for the sync engine.
//!
//! Provides persistent storage for:
//! - The pending operation log, in dispatch order
//! - Dispatcher health statistics
//! - Tombstoned entity ids
//! - Google resource links
//! - Key-value state (sync tokens)

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::DatabaseError;
use crate::model::{EntityId, GoogleResourceLink, ResourceType};
use crate::sync::types::{OpType, QueueRecord, SyncStats};

use super::store::SyncStore;
use super::{data_dir, migrations, PersistError};

const STATS_KEY: &str = "stats";

/// SQLite database implementing [`SyncStore`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/offsync/offsync.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("offsync.db"))
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistError> {
        self.conn
            .lock()
            .map_err(|_| PersistError::Storage("database lock poisoned".into()))
    }
}

fn parse_timestamp(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl SyncStore for Database {
    fn load_queue(&self) -> Result<Vec<QueueRecord>, PersistError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, type, payload, timestamp, retries FROM sync_queue ORDER BY position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, u32>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, op_type, payload, timestamp, retries) = row?;
            let op_type: OpType = serde_json::from_value(serde_json::Value::String(op_type))?;
            records.push(QueueRecord {
                id,
                op_type,
                payload: serde_json::from_str(&payload)?,
                timestamp,
                retries,
            });
        }
        Ok(records)
    }

    fn save_queue(&self, records: &[QueueRecord]) -> Result<(), PersistError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sync_queue", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO sync_queue (position, id, type, payload, timestamp, retries)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, record) in records.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    record.id,
                    record.op_type.as_str(),
                    record.payload.to_string(),
                    record.timestamp,
                    record.retries,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_stats(&self) -> Result<Option<SyncStats>, PersistError> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT value FROM sync_stats WHERE key = ?1",
            params![STATS_KEY],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(v) => Ok(Some(serde_json::from_str(&v)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_stats(&self, stats: &SyncStats) -> Result<(), PersistError> {
        let value = serde_json::to_string(stats)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sync_stats (key, value) VALUES (?1, ?2)",
            params![STATS_KEY, value],
        )?;
        Ok(())
    }

    fn load_tombstones(&self) -> Result<BTreeSet<EntityId>, PersistError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM tombstones")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }

    fn save_tombstones(&self, ids: &BTreeSet<EntityId>) -> Result<(), PersistError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM tombstones", [])?;
        {
            let mut stmt = tx.prepare("INSERT INTO tombstones (id) VALUES (?1)")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_links(&self) -> Result<Vec<GoogleResourceLink>, PersistError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT local_id, resource_type, remote_id, container_id, last_synced_at, error
             FROM google_links",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut links = Vec::new();
        for row in rows {
            let (local_id, resource_type, remote_id, container_id, last_synced_at, error) = row?;
            let Some(resource_type) = ResourceType::parse(&resource_type) else {
                tracing::warn!(%local_id, %resource_type, "skipping link with unknown resource type");
                continue;
            };
            links.push(GoogleResourceLink {
                local_id,
                resource_type,
                remote_id,
                container_id,
                last_synced_at: parse_timestamp(last_synced_at),
                error,
            });
        }
        Ok(links)
    }

    fn save_link(&self, link: &GoogleResourceLink) -> Result<(), PersistError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO google_links
             (local_id, resource_type, remote_id, container_id, last_synced_at, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                link.local_id,
                link.resource_type.as_str(),
                link.remote_id,
                link.container_id,
                link.last_synced_at.map(|t| t.to_rfc3339()),
                link.error,
            ],
        )?;
        Ok(())
    }

    fn delete_link(&self, local_id: &str, resource_type: ResourceType) -> Result<(), PersistError> {
        self.conn()?.execute(
            "DELETE FROM google_links WHERE local_id = ?1 AND resource_type = ?2",
            params![local_id, resource_type.as_str()],
        )?;
        Ok(())
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>, PersistError> {
        let conn = self.conn()?;
        let result = conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get::<_, String>(0)
        });
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn kv_set(&self, key: &str, value: Option<&str>) -> Result<(), PersistError> {
        let conn = self.conn()?;
        match value {
            Some(v) => conn.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, v],
            )?,
            None => conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, op_type: OpType) -> QueueRecord {
        QueueRecord {
            id: id.into(),
            op_type,
            payload: json!({"id": id}),
            timestamp: 1_700_000_000_000,
            retries: 2,
        }
    }

    #[test]
    fn queue_order_is_preserved() {
        let db = Database::open_memory().unwrap();
        let records = vec![
            record("b", OpType::UpsertTask),
            record("a", OpType::DeleteEvent),
            record("c", OpType::UpsertList),
        ];
        db.save_queue(&records).unwrap();
        assert_eq!(db.load_queue().unwrap(), records);

        db.save_queue(&records[1..]).unwrap();
        assert_eq!(db.load_queue().unwrap().len(), 2);
    }

    #[test]
    fn stats_round_trip() {
        let db = Database::open_memory().unwrap();
        assert!(db.load_stats().unwrap().is_none());

        let stats = SyncStats {
            total_processed: 12,
            total_failed: 1,
            current_rate_limit_ms: 400,
            ..Default::default()
        };
        db.save_stats(&stats).unwrap();
        assert_eq!(db.load_stats().unwrap(), Some(stats));
    }

    #[test]
    fn tombstones_replace_previous_set() {
        let db = Database::open_memory().unwrap();
        db.save_tombstones(&BTreeSet::from(["a".to_string(), "b".to_string()]))
            .unwrap();
        db.save_tombstones(&BTreeSet::from(["c".to_string()])).unwrap();
        assert_eq!(db.load_tombstones().unwrap(), BTreeSet::from(["c".to_string()]));
    }

    #[test]
    fn links_are_keyed_by_local_id_and_type() {
        let db = Database::open_memory().unwrap();
        let mut link = GoogleResourceLink::new("ev-1", ResourceType::GoogleEvent, "g-1", "primary");
        db.save_link(&link).unwrap();
        link.remote_id = "g-2".into();
        db.save_link(&link).unwrap();
        db.save_link(&GoogleResourceLink::new("ev-1", ResourceType::GoogleTask, "t-1", "@default"))
            .unwrap();

        let links = db.load_links().unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().any(|l| l.remote_id == "g-2"));

        db.delete_link("ev-1", ResourceType::GoogleEvent).unwrap();
        assert_eq!(db.load_links().unwrap().len(), 1);
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", Some("hello")).unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
        db.kv_set("test", None).unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
    }
}
