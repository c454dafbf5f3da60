//! facia-core — The face gallery: enrolled identities and nearest-neighbor
//! matching.
//!
//! Everything that looks at pixels (decoding, detection, embedding
//! extraction) lives behind the [`FaceAnalyzer`] contract; this crate only
//! deals in embeddings.

pub mod analyzer;
pub mod index;
pub mod types;

pub use analyzer::{decode_image, AnalyzerError, DetectedFace, FaceAnalyzer};
pub use index::{GalleryIndex, IndexError};
pub use types::{Embedding, EnrollmentRecord, EuclideanMatcher, FaceLocation, MatchResult, Matcher};

/// Default maximum embedding distance accepted as a positive match.
///
/// Matches the typical operating point of the upstream embedding model;
/// a policy knob, overridable via daemon configuration.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
