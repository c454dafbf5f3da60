//! In-memory gallery of enrolled faces and the nearest-neighbor match path.

use thiserror::Error;

use crate::types::{Embedding, EnrollmentRecord, EuclideanMatcher, MatchResult, Matcher};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("embedding dimension mismatch: gallery holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// The in-memory face gallery.
///
/// Holds every currently-enrolled record in insertion order and answers
/// "which known identity, if any, does this embedding belong to?".
/// Mutation goes through the daemon's gallery manager; the index itself
/// has no locking and no knowledge of durable storage.
pub struct GalleryIndex {
    records: Vec<EnrollmentRecord>,
    /// Fixed once the gallery becomes non-empty.
    dim: Option<usize>,
    /// Maximum distance accepted as a positive match.
    threshold: f32,
    matcher: Box<dyn Matcher + Send + Sync>,
}

impl GalleryIndex {
    pub fn new(threshold: f32) -> Self {
        Self::with_matcher(threshold, Box::new(EuclideanMatcher))
    }

    pub fn with_matcher(threshold: f32, matcher: Box<dyn Matcher + Send + Sync>) -> Self {
        Self {
            records: Vec::new(),
            dim: None,
            threshold,
            matcher,
        }
    }

    /// Match a probe embedding against every record in the gallery.
    ///
    /// Side-effect free. An empty gallery reports no match at infinite
    /// distance without scanning.
    pub fn match_embedding(&self, probe: &Embedding) -> MatchResult {
        if self.records.is_empty() {
            return MatchResult::no_match(f32::INFINITY);
        }
        self.matcher
            .best_match(probe, &self.records, self.threshold)
    }

    /// Append a record to the gallery.
    ///
    /// The first admitted record fixes the gallery dimensionality; later
    /// records with a different dimension are rejected, never stored.
    pub fn admit(&mut self, record: EnrollmentRecord) -> Result<(), IndexError> {
        let actual = record.embedding.dim();
        match self.dim {
            Some(expected) if expected != actual => {
                return Err(IndexError::DimensionMismatch { expected, actual });
            }
            None => self.dim = Some(actual),
            _ => {}
        }
        self.records.push(record);
        Ok(())
    }

    /// Remove every record for `identity`, returning how many were
    /// removed. Zero is not an error; callers decide what it means.
    pub fn revoke_all(&mut self, identity: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.identity != identity);
        before - self.records.len()
    }

    /// Distinct identities in first-enrollment order.
    pub fn snapshot_identities(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for record in &self.records {
            if !seen.iter().any(|s| s == &record.identity) {
                seen.push(record.identity.clone());
            }
        }
        seen
    }

    pub fn contains_identity(&self, identity: &str) -> bool {
        self.records.iter().any(|r| r.identity == identity)
    }

    /// Number of records (not distinct identities).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Dimensionality fixed by the first admitted record, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dim
    }
}
