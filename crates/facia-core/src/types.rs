use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel-space location of a detected face, in the orientation the
/// HTTP surface reports: top/right/bottom/left edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
    pub left: i64,
}

/// Face embedding vector (512-dimensional for ArcFace; the gallery fixes
/// the dimensionality from the first record it admits).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance to another embedding. Non-negative, symmetric.
    ///
    /// Dimensionality must match; the gallery index guarantees this for
    /// everything it holds.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled (identity, embedding) pair with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    /// Non-empty label naming the enrolled person. Several records may
    /// share one identity (re-enrollment under the same name).
    pub identity: String,
    pub embedding: Embedding,
    /// Key of the durable image artifact this embedding was derived from.
    pub provenance: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Identity of the best record, present only when `matched`.
    pub identity: Option<String>,
    /// Distance to the best record; +inf for an empty gallery.
    pub distance: f32,
    /// `1 - distance`, clamped to [0, 1]. Derived, not calibrated — only
    /// monotone in distance, and only meaningful when `matched`.
    pub confidence: f32,
}

impl MatchResult {
    /// The result for an empty gallery, or a probe nothing came close to.
    pub fn no_match(distance: f32) -> Self {
        Self {
            matched: false,
            identity: None,
            distance,
            confidence: 0.0,
        }
    }
}

/// Strategy for finding the nearest gallery record to a probe embedding.
///
/// The default is a linear scan; an indexed nearest-neighbor structure
/// (k-d tree, ANN) can be swapped in without touching callers.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[EnrollmentRecord],
        threshold: f32,
    ) -> MatchResult;
}

/// Linear-scan Euclidean matcher.
///
/// Visits every record; ties on distance keep the earliest-inserted
/// record so repeated matches are deterministic.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[EnrollmentRecord],
        threshold: f32,
    ) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, record) in gallery.iter().enumerate() {
            let dist = probe.distance(&record.embedding);
            // Strict `<` keeps the earliest record on a tie.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= threshold => MatchResult {
                matched: true,
                identity: Some(gallery[idx].identity.clone()),
                distance: best_dist,
                confidence: (1.0 - best_dist).clamp(0.0, 1.0),
            },
            _ => MatchResult::no_match(best_dist),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(identity: &str, values: Vec<f32>) -> EnrollmentRecord {
        EnrollmentRecord {
            identity: identity.into(),
            embedding: Embedding::new(values),
            provenance: format!("{identity}_test.jpg"),
            enrolled_at: Utc::now(),
        }
    }

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Embedding::new(vec![1.0, 2.0, 3.0]);
        let b = Embedding::new(vec![4.0, 6.0, 3.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_matcher_picks_nearest() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            record("far", vec![0.0, 5.0]),
            record("near", vec![0.9, 0.0]),
        ];
        let result = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.identity.as_deref(), Some("near"));
    }

    #[test]
    fn test_matcher_tie_keeps_earliest() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            record("first", vec![0.3, 0.0]),
            record("second", vec![0.0, 0.3]),
        ];
        let result = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert!(result.matched);
        assert_eq!(result.identity.as_deref(), Some("first"));
    }

    #[test]
    fn test_matcher_over_threshold_is_unknown() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![record("alice", vec![0.0, 2.0])];
        let result = EuclideanMatcher.best_match(&probe, &gallery, 0.6);
        assert!(!result.matched);
        assert!(result.identity.is_none());
        assert!((result.distance - 2.0).abs() < 1e-6);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_matcher_empty_gallery() {
        let probe = Embedding::new(vec![1.0]);
        let result = EuclideanMatcher.best_match(&probe, &[], 0.6);
        assert!(!result.matched);
        assert_eq!(result.distance, f32::INFINITY);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_confidence_clamped() {
        // A match at distance > 1 would produce a negative 1 - d; the
        // clamp keeps reported confidence in [0, 1].
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![record("alice", vec![1.1, 0.0])];
        let result = EuclideanMatcher.best_match(&probe, &gallery, 1.5);
        assert!(result.matched);
        assert_eq!(result.confidence, 0.0);
    }
}
