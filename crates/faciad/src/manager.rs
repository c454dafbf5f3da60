//! Gallery manager: the only component allowed to mutate the gallery.
//!
//! Keeps the in-memory index and the durable store consistent. Enroll
//! writes the store first, then admits into the index; revoke deletes
//! from the store first, then the index — so a crash never leaves the
//! index ahead of the store, and a revoked identity cannot resurrect at
//! the next reload.
//!
//! Concurrency: matches take a brief read lock and never wait on store
//! I/O. Enroll, revoke, and reload serialize on a single mutation lock.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use facia_core::{DetectedFace, Embedding, EnrollmentRecord, GalleryIndex, IndexError, MatchResult};
use facia_store::{GalleryStore, StoreError};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("identity must be a non-empty name without path separators")]
    InvalidIdentity,
    #[error("expected exactly one face in the image, found {found}")]
    AmbiguousInput { found: usize },
    #[error("no enrolled faces for identity {0:?}")]
    NotFound(String),
    #[error("gallery not initialized — reload must run first")]
    NotInitialized,
    #[error(transparent)]
    Dimension(#[from] IndexError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug)]
pub struct EnrollOutcome {
    pub identity: String,
    /// Durable artifact key the enrollment can be traced back to.
    pub provenance: String,
}

#[derive(Debug)]
pub struct RevokeOutcome {
    pub identity: String,
    pub removed: usize,
}

pub struct GalleryManager {
    index: RwLock<GalleryIndex>,
    store: GalleryStore,
    /// Serializes enroll/revoke/reload. Matches never take this.
    mutation: Mutex<()>,
    ready: AtomicBool,
    threshold: f32,
}

impl GalleryManager {
    /// A manager starts uninitialized; mutations fail until [`reload`]
    /// has run once.
    ///
    /// [`reload`]: GalleryManager::reload
    pub fn new(store: GalleryStore, threshold: f32) -> Self {
        Self {
            index: RwLock::new(GalleryIndex::new(threshold)),
            store,
            mutation: Mutex::new(()),
            ready: AtomicBool::new(false),
            threshold,
        }
    }

    /// Rebuild the in-memory gallery from the durable store.
    ///
    /// Malformed or dimension-mismatched durable records are logged and
    /// skipped; reload completes with whatever is valid. Returns the
    /// number of records admitted.
    pub async fn reload(&self) -> Result<usize, GalleryError> {
        let _guard = self.mutation.lock().await;

        let stored = self.store.list_all().await?;
        let mut fresh = GalleryIndex::new(self.threshold);
        let mut skipped = 0usize;

        for face in stored {
            let record = EnrollmentRecord {
                identity: face.identity,
                embedding: face.embedding,
                provenance: face.provenance,
                enrolled_at: face.enrolled_at,
            };
            if let Err(err) = fresh.admit(record) {
                tracing::warn!(error = %err, "skipping durable record at reload");
                skipped += 1;
            }
        }

        let admitted = fresh.len();
        *self.index.write() = fresh;
        self.ready.store(true, Ordering::SeqCst);

        tracing::info!(admitted, skipped, "gallery reloaded");
        Ok(admitted)
    }

    /// Enroll one identity from an analyzed image.
    ///
    /// The caller must have reduced the image to its detected faces;
    /// anything other than exactly one is rejected before any state
    /// changes. The store write happens before the index admit, and a
    /// store failure leaves both sides untouched.
    pub async fn enroll(
        &self,
        identity: &str,
        faces: &[DetectedFace],
        image_bytes: &[u8],
        ext: &str,
    ) -> Result<EnrollOutcome, GalleryError> {
        self.check_ready()?;
        validate_identity(identity)?;

        if faces.len() != 1 {
            return Err(GalleryError::AmbiguousInput { found: faces.len() });
        }
        let embedding = &faces[0].embedding;

        let _guard = self.mutation.lock().await;

        // Validate dimensionality up front so the store is never written
        // for a record the index would then reject.
        if let Some(expected) = self.index.read().dimension() {
            if expected != embedding.dim() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: embedding.dim(),
                }
                .into());
            }
        }

        let provenance = self
            .store
            .put(identity, embedding, image_bytes, ext)
            .await?;

        self.index.write().admit(EnrollmentRecord {
            identity: identity.to_string(),
            embedding: embedding.clone(),
            provenance: provenance.clone(),
            enrolled_at: Utc::now(),
        })?;

        tracing::info!(identity = %identity, provenance = %provenance, "enrolled");
        Ok(EnrollOutcome {
            identity: identity.to_string(),
            provenance,
        })
    }

    /// Remove every record for `identity`, store first, then index.
    pub async fn revoke(&self, identity: &str) -> Result<RevokeOutcome, GalleryError> {
        self.check_ready()?;

        let _guard = self.mutation.lock().await;

        // The index is the authoritative view of who is enrolled.
        if !self.index.read().contains_identity(identity) {
            return Err(GalleryError::NotFound(identity.to_string()));
        }

        let store_removed = self.store.delete_by_identity(identity).await?;
        let index_removed = self.index.write().revoke_all(identity);

        if store_removed != index_removed {
            tracing::warn!(
                identity = %identity,
                store_removed,
                index_removed,
                "store and index disagreed on revoke count"
            );
        }

        tracing::info!(identity = %identity, removed = index_removed, "revoked");
        Ok(RevokeOutcome {
            identity: identity.to_string(),
            removed: index_removed,
        })
    }

    /// Pure read over the current gallery snapshot.
    pub fn match_embedding(&self, probe: &Embedding) -> MatchResult {
        self.index.read().match_embedding(probe)
    }

    /// Distinct identities in first-enrollment order.
    pub fn known_identities(&self) -> Vec<String> {
        self.index.read().snapshot_identities()
    }

    /// Number of enrolled records (not distinct identities).
    pub fn face_count(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn check_ready(&self) -> Result<(), GalleryError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(GalleryError::NotInitialized)
        }
    }
}

/// Identities become artifact filename prefixes, so they must be
/// non-empty and free of path syntax.
fn validate_identity(identity: &str) -> Result<(), GalleryError> {
    if identity.is_empty()
        || identity.contains('/')
        || identity.contains('\\')
        || identity.contains('\0')
        || identity == "."
        || identity == ".."
    {
        return Err(GalleryError::InvalidIdentity);
    }
    Ok(())
}
