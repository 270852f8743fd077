//! Durable session checkpoints with checksum validation.
//!
//! A checkpoint is written only after a phase transition fully completes,
//! so every stored row is an internally-consistent resume point. Payloads
//! are bincode with a crc32 checksum; a single SQLite insert gives the
//! atomicity of write-temp-then-rename, so a crash mid-write never leaves
//! a partial checkpoint visible to `load`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SymposiumError, persistence_err_with};
use crate::session::SessionSnapshot;

/// Latest checkpoint row per session, for listings.
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub checkpoint_id: String,
    pub session_id: String,
    pub seq: u64,
    pub phase: String,
    pub status: String,
    pub created_at: String,
}

pub struct CheckpointManager {
    conn: Arc<Mutex<Connection>>,
    retain_per_session: usize,
    db_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(db_path: impl AsRef<Path>, retain_per_session: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| persistence_err_with("Failed to create checkpoint directory", e))?;
        }

        let conn = Connection::open(&db_path)
            .map_err(|e| persistence_err_with("Failed to open checkpoint database", e))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retain_per_session: retain_per_session.max(1),
            db_path,
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                phase TEXT NOT NULL,
                status TEXT NOT NULL,
                data BLOB NOT NULL,
                checksum INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoint_lookup
                ON checkpoints(session_id, seq DESC);
            ",
        )
        .map_err(|e| persistence_err_with("Failed to init checkpoint schema", e))?;
        Ok(())
    }

    /// Persist a snapshot; returns the new checkpoint id. The snapshot is
    /// consistency-checked before anything touches disk.
    pub fn save(&self, snapshot: &SessionSnapshot) -> Result<String> {
        snapshot.validate()?;

        let data = bincode::serialize(snapshot)
            .map_err(|e| persistence_err_with("Failed to serialize snapshot", e))?;
        let checksum = crc32fast::hash(&data);
        let id = format!("cp-{}", Uuid::new_v4());
        let session_id = &snapshot.session.id;

        let conn = self.conn.lock();
        let seq: u64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) FROM checkpoints WHERE session_id = ?1",
                params![session_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64 + 1)
            .map_err(|e| persistence_err_with("Failed to allocate checkpoint seq", e))?;

        conn.execute(
            "INSERT INTO checkpoints (id, session_id, seq, phase, status, data, checksum, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &id,
                session_id,
                seq as i64,
                snapshot.session.phase.to_string(),
                snapshot.session.status.to_string(),
                &data,
                checksum as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| persistence_err_with("Failed to save checkpoint", e))?;

        self.prune(&conn, session_id)?;

        debug!(checkpoint_id = %id, session_id = %session_id, seq, "Checkpoint saved");
        Ok(id)
    }

    fn prune(&self, conn: &Connection, session_id: &str) -> Result<()> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|e| persistence_err_with("Failed to count checkpoints", e))?;

        if count as usize > self.retain_per_session {
            let to_delete = count as usize - self.retain_per_session;
            conn.execute(
                "DELETE FROM checkpoints WHERE id IN (
                    SELECT id FROM checkpoints
                    WHERE session_id = ?1
                    ORDER BY seq ASC
                    LIMIT ?2
                )",
                params![session_id, to_delete as i64],
            )
            .map_err(|e| persistence_err_with("Failed to prune checkpoints", e))?;
        }

        Ok(())
    }

    pub fn load(&self, checkpoint_id: &str) -> Result<SessionSnapshot> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT data, checksum FROM checkpoints WHERE id = ?1",
                params![checkpoint_id],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)? as u32)),
            )
            .optional()
            .map_err(|e| persistence_err_with("Failed to query checkpoint", e))?;

        let (data, checksum) = row.ok_or_else(|| {
            SymposiumError::NotFound(checkpoint_id.to_string())
        })?;

        Self::decode(checkpoint_id, &data, checksum)
    }

    /// Most recent checkpoint for a session.
    pub fn load_latest(&self, session_id: &str) -> Result<SessionSnapshot> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, data, checksum FROM checkpoints
                 WHERE session_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, i64>(2)? as u32,
                    ))
                },
            )
            .optional()
            .map_err(|e| persistence_err_with("Failed to query latest checkpoint", e))?;

        let (id, data, checksum) =
            row.ok_or_else(|| SymposiumError::SessionNotFound(session_id.to_string()))?;

        Self::decode(&id, &data, checksum)
    }

    /// One summary row per known session, newest first.
    pub fn list_sessions(&self) -> Result<Vec<CheckpointSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, seq, phase, status, created_at FROM checkpoints c
                 WHERE seq = (SELECT MAX(seq) FROM checkpoints WHERE session_id = c.session_id)
                 ORDER BY created_at DESC",
            )
            .map_err(|e| persistence_err_with("Failed to prepare session listing", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(CheckpointSummary {
                    checkpoint_id: row.get(0)?,
                    session_id: row.get(1)?,
                    seq: row.get::<_, i64>(2)? as u64,
                    phase: row.get(3)?,
                    status: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })
            .map_err(|e| persistence_err_with("Failed to list sessions", e))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| persistence_err_with("Failed to read session rows", e))
    }

    fn decode(id: &str, data: &[u8], checksum: u32) -> Result<SessionSnapshot> {
        if crc32fast::hash(data) != checksum {
            return Err(SymposiumError::CorruptCheckpoint {
                id: id.to_string(),
                reason: "checksum mismatch".into(),
            });
        }

        let snapshot: SessionSnapshot =
            bincode::deserialize(data).map_err(|e| SymposiumError::CorruptCheckpoint {
                id: id.to_string(),
                reason: format!("deserialization failed: {}", e),
            })?;

        snapshot
            .validate()
            .map_err(|e| SymposiumError::CorruptCheckpoint {
                id: id.to_string(),
                reason: format!("consistency check failed: {}", e),
            })?;

        Ok(snapshot)
    }
}

impl Clone for CheckpointManager {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            retain_per_session: self.retain_per_session,
            db_path: self.db_path.clone(),
        }
    }
}
