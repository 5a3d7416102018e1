use crate::gallery::Gallery;
use crate::types::{ClassificationResult, Signature};
use thiserror::Error;

/// Maximum accepted distance when nothing else is configured.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("signature dimension mismatch: gallery has {gallery}, query has {query}")]
    DimensionMismatch { gallery: usize, query: usize },
}

/// Strategy for classifying a query signature against a gallery.
pub trait Matcher {
    fn classify(
        &self,
        query: &Signature,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<ClassificationResult, MatchError>;

    /// Classify the first of `queries`; no queries at all is an unmatched result.
    fn classify_first(
        &self,
        queries: &[Signature],
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<ClassificationResult, MatchError> {
        match queries.first() {
            Some(query) => self.classify(query, gallery, tolerance),
            None => Ok(ClassificationResult::unmatched()),
        }
    }
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// The minimum-distance entry wins; on ties the entry stored first wins. A
/// match is accepted only when its distance is strictly below `tolerance`.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn classify(
        &self,
        query: &Signature,
        gallery: &Gallery,
        tolerance: f32,
    ) -> Result<ClassificationResult, MatchError> {
        let Some(dimension) = gallery.dimension() else {
            return Ok(ClassificationResult::unmatched());
        };
        if query.dimension() != dimension {
            return Err(MatchError::DimensionMismatch {
                gallery: dimension,
                query: query.dimension(),
            });
        }

        let mut best: Option<(usize, f32)> = None;
        for (idx, entry) in gallery.entries().iter().enumerate() {
            let distance = query.distance(&entry.signature);
            let better = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance || best_distance.is_nan(),
            };
            if better {
                best = Some((idx, distance));
            }
        }

        Ok(match best {
            Some((idx, distance)) if distance < tolerance => {
                ClassificationResult::matched(&gallery.entries()[idx].label, distance)
            }
            _ => ClassificationResult::unmatched(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryEntry;

    fn entry(label: &str, values: &[f32]) -> GalleryEntry {
        GalleryEntry { label: label.into(), signature: Signature::new(values.to_vec()) }
    }

    fn alice_bob() -> Gallery {
        Gallery::from_entries(vec![entry("alice", &[0.0, 0.0]), entry("bob", &[3.0, 0.0])]).unwrap()
    }

    #[test]
    fn test_exact_match_has_full_confidence() {
        let result = EuclideanMatcher
            .classify(&Signature::new(vec![0.0, 0.0]), &alice_bob(), DEFAULT_TOLERANCE)
            .unwrap();
        assert_eq!(result.matched_label.as_deref(), Some("alice"));
        assert_eq!(result.distance, Some(0.0));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_far_from_everyone_is_unmatched() {
        // 0.8 from alice at the origin; 2.2 from bob.
        let query = Signature::new(vec![0.8, 0.0]);
        let result = EuclideanMatcher.classify(&query, &alice_bob(), 0.6).unwrap();
        assert_eq!(result, ClassificationResult::unmatched());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_equidistant_from_all_entries_is_unmatched() {
        let gallery = Gallery::from_entries(vec![
            entry("alice", &[0.8, 0.0]),
            entry("bob", &[-0.8, 0.0]),
        ])
        .unwrap();
        let result = EuclideanMatcher
            .classify(&Signature::new(vec![0.0, 0.0]), &gallery, 0.6)
            .unwrap();
        assert!(!result.is_match());
    }

    #[test]
    fn test_tolerance_is_strict() {
        let gallery = Gallery::from_entries(vec![entry("alice", &[0.0])]).unwrap();
        let at_boundary = EuclideanMatcher.classify(&Signature::new(vec![0.5]), &gallery, 0.5).unwrap();
        assert!(!at_boundary.is_match());

        let inside = EuclideanMatcher.classify(&Signature::new(vec![0.25]), &gallery, 0.5).unwrap();
        assert_eq!(inside.matched_label.as_deref(), Some("alice"));
        assert!((inside.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_best_match_wins() {
        let query = Signature::new(vec![2.8, 0.0]);
        let result = EuclideanMatcher.classify(&query, &alice_bob(), DEFAULT_TOLERANCE).unwrap();
        assert_eq!(result.matched_label.as_deref(), Some("bob"));
        assert!((result.distance.unwrap() - 0.2).abs() < 1e-5);
        assert!((result.confidence - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_tie_goes_to_first_stored_entry() {
        let gallery = Gallery::from_entries(vec![
            entry("first", &[0.1, 0.0]),
            entry("second", &[-0.1, 0.0]),
        ])
        .unwrap();
        let result = EuclideanMatcher
            .classify(&Signature::new(vec![0.0, 0.0]), &gallery, DEFAULT_TOLERANCE)
            .unwrap();
        assert_eq!(result.matched_label.as_deref(), Some("first"));
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let gallery = Gallery::empty();
        for query in [vec![0.0], vec![1.0, 2.0, 3.0], vec![]] {
            let result = EuclideanMatcher.classify(&Signature::new(query), &gallery, 10.0).unwrap();
            assert_eq!(result, ClassificationResult::unmatched());
        }
    }

    #[test]
    fn test_dimension_mismatch_fails_fast() {
        let err = EuclideanMatcher
            .classify(&Signature::new(vec![0.0, 0.0, 0.0]), &alice_bob(), DEFAULT_TOLERANCE)
            .unwrap_err();
        assert_eq!(err, MatchError::DimensionMismatch { gallery: 2, query: 3 });
    }

    #[test]
    fn test_classify_is_deterministic() {
        let gallery = alice_bob();
        let query = Signature::new(vec![0.3, 0.1]);
        let first = EuclideanMatcher.classify(&query, &gallery, DEFAULT_TOLERANCE).unwrap();
        for _ in 0..10 {
            assert_eq!(EuclideanMatcher.classify(&query, &gallery, DEFAULT_TOLERANCE).unwrap(), first);
        }
    }

    #[test]
    fn test_classify_first_without_queries() {
        let result = EuclideanMatcher.classify_first(&[], &alice_bob(), DEFAULT_TOLERANCE).unwrap();
        assert_eq!(result, ClassificationResult::unmatched());

        let queries = [Signature::new(vec![3.0, 0.0]), Signature::new(vec![0.0, 0.0])];
        let result = EuclideanMatcher.classify_first(&queries, &alice_bob(), DEFAULT_TOLERANCE).unwrap();
        assert_eq!(result.matched_label.as_deref(), Some("bob"));
    }
}
