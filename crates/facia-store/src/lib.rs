//! facia-store — Durable layer beneath the in-memory gallery.
//!
//! Each enrollment persists two things: the original image artifact,
//! written under the faces directory with a `{identity}_{timestamp}_{seq}.{ext}`
//! key, and an embedding row in SQLite whose `provenance` column holds
//! that key. Revocation deletes rows by exact identity and removes the
//! artifacts those rows reference, so an identity that is a prefix of
//! another ("al" / "alice") can never over-match.
//!
//! The store is consulted at reload and at enroll/revoke time only; the
//! recognize path never touches it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use facia_core::Embedding;
use rusqlite::params;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("artifact io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One durable record as read back at reload.
#[derive(Debug, Clone)]
pub struct StoredFace {
    pub identity: String,
    pub embedding: Embedding,
    pub provenance: String,
    pub enrolled_at: DateTime<Utc>,
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identity TEXT NOT NULL,
    dim INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    provenance TEXT NOT NULL UNIQUE,
    enrolled_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_faces_identity ON faces(identity);
";

/// SQLite-backed gallery store. All database work runs on the
/// tokio-rusqlite worker thread; artifact I/O goes through tokio::fs.
pub struct GalleryStore {
    conn: Connection,
    faces_dir: PathBuf,
    seq: AtomicU64,
}

impl GalleryStore {
    /// Open (creating if needed) the database and the faces directory.
    pub async fn open(db_path: &Path, faces_dir: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(faces_dir).await?;

        let conn = Connection::open(db_path.to_path_buf()).await?;
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", 1)?;
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            faces_dir: faces_dir.to_path_buf(),
            seq: AtomicU64::new(0),
        })
    }

    /// Every durable record, oldest first. Rows whose embedding blob does
    /// not decode are skipped with a warning — reload must complete with
    /// whatever is valid.
    pub async fn list_all(&self) -> Result<Vec<StoredFace>, StoreError> {
        let rows: Vec<(String, i64, Vec<u8>, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity, dim, embedding, provenance, enrolled_at
                     FROM faces ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut faces = Vec::with_capacity(rows.len());
        for (identity, dim, blob, provenance, enrolled_at) in rows {
            let Some(values) = decode_embedding_blob(&blob, dim.max(0) as usize) else {
                tracing::warn!(
                    identity = %identity,
                    provenance = %provenance,
                    blob_len = blob.len(),
                    dim,
                    "skipping row with undecodable embedding blob"
                );
                continue;
            };
            let enrolled_at = match DateTime::parse_from_rfc3339(&enrolled_at) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(err) => {
                    tracing::warn!(
                        identity = %identity,
                        provenance = %provenance,
                        error = %err,
                        "skipping row with unparseable enrollment timestamp"
                    );
                    continue;
                }
            };
            faces.push(StoredFace {
                identity,
                embedding: Embedding::new(values),
                provenance,
                enrolled_at,
            });
        }
        Ok(faces)
    }

    /// Persist one enrollment: artifact first, then the embedding row.
    ///
    /// If the row insert fails the artifact is removed again, so the
    /// store never holds an image without a matching row. Returns the
    /// provenance key.
    pub async fn put(
        &self,
        identity: &str,
        embedding: &Embedding,
        image_bytes: &[u8],
        ext: &str,
    ) -> Result<String, StoreError> {
        let enrolled_at = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let key = artifact_key(identity, enrolled_at, seq, ext);

        let artifact_path = self.faces_dir.join(&key);
        tokio::fs::write(&artifact_path, image_bytes).await?;

        let row_identity = identity.to_string();
        let dim = embedding.dim() as i64;
        let blob = encode_embedding_blob(&embedding.values);
        let row_key = key.clone();
        let row_ts = enrolled_at.to_rfc3339();

        let insert = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO faces (identity, dim, embedding, provenance, enrolled_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row_identity, dim, blob, row_key, row_ts],
                )?;
                Ok(())
            })
            .await;

        if let Err(err) = insert {
            if let Err(rm_err) = tokio::fs::remove_file(&artifact_path).await {
                tracing::warn!(
                    key = %key,
                    error = %rm_err,
                    "failed to remove orphaned artifact after insert failure"
                );
            }
            return Err(err.into());
        }

        tracing::info!(identity = %identity, key = %key, dim, "persisted enrollment");
        Ok(key)
    }

    /// Delete every row for `identity` (exact match) and the artifacts
    /// those rows reference. Returns the number of rows deleted.
    pub async fn delete_by_identity(&self, identity: &str) -> Result<usize, StoreError> {
        let row_identity = identity.to_string();
        let keys: Vec<String> = self
            .conn
            .call(move |conn| {
                let keys = {
                    let mut stmt =
                        conn.prepare("SELECT provenance FROM faces WHERE identity = ?1")?;
                    let keys = stmt
                        .query_map(params![row_identity], |row| row.get(0))?
                        .collect::<rusqlite::Result<Vec<String>>>()?;
                    keys
                };
                conn.execute("DELETE FROM faces WHERE identity = ?1", params![row_identity])?;
                Ok(keys)
            })
            .await?;

        for key in &keys {
            let path = self.faces_dir.join(key);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "failed to remove artifact");
                }
            }
        }

        tracing::info!(identity = %identity, removed = keys.len(), "deleted enrollments");
        Ok(keys.len())
    }
}

/// Provenance keys are `{identity}_{timestamp}_{seq}.{ext}`. The
/// per-store sequence keeps two enrollments for the same identity in
/// the same microsecond from producing the same key; a collision would
/// overwrite the first artifact and trip the UNIQUE constraint on the
/// second row.
fn artifact_key(identity: &str, enrolled_at: DateTime<Utc>, seq: u64, ext: &str) -> String {
    format!(
        "{identity}_{}_{seq}.{ext}",
        enrolled_at.format("%Y%m%d_%H%M%S%6f")
    )
}

fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding_blob(blob: &[u8], dim: usize) -> Option<Vec<f32>> {
    if blob.len() != dim * 4 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
