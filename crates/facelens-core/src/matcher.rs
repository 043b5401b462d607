//! Nearest-reference face matching over Euclidean descriptor distance.

use crate::types::{Descriptor, ReferenceIdentity};
use std::fmt;
use thiserror::Error;

/// Default maximum descriptor distance accepted as a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Label reported when no reference is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum MatcherError {
    #[error("match threshold must be a finite positive number, got {0}")]
    InvalidThreshold(f32),
}

/// Result of matching a query descriptor against the reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Matched reference label, or [`UNKNOWN_LABEL`].
    pub label: String,
    /// Distance to the nearest reference (infinite when nothing was comparable).
    pub distance: f32,
}

impl MatchResult {
    fn unknown(distance: f32) -> Self {
        Self {
            label: UNKNOWN_LABEL.to_string(),
            distance,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.label == UNKNOWN_LABEL
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label, self.distance)
    }
}

/// Strategy for comparing a query descriptor against the reference set.
pub trait Matcher {
    fn find_best_match(&self, query: &Descriptor) -> MatchResult;
}

/// Immutable matcher over labelled reference descriptors.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    references: Vec<ReferenceIdentity>,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(references: Vec<ReferenceIdentity>, threshold: f32) -> Result<Self, MatcherError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MatcherError::InvalidThreshold(threshold));
        }
        Ok(Self {
            references,
            threshold,
        })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn references(&self) -> &[ReferenceIdentity] {
        &self.references
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(|r| r.label.as_str())
    }
}

impl Matcher for FaceMatcher {
    fn find_best_match(&self, query: &Descriptor) -> MatchResult {
        let best = self
            .references
            .iter()
            .map(|r| (r, query.euclidean_distance(&r.descriptor)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((reference, distance)) if distance < self.threshold => MatchResult {
                label: reference.label.clone(),
                distance,
            },
            Some((_, distance)) => MatchResult::unknown(distance),
            None => MatchResult::unknown(f32::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(label: &str, values: &[f32]) -> ReferenceIdentity {
        ReferenceIdentity {
            label: label.into(),
            descriptor: Descriptor::new(values.to_vec()),
        }
    }

    #[test]
    fn test_exact_descriptor_matches_its_label() {
        let a = [0.1, 0.5, -0.3, 0.8];
        let matcher = FaceMatcher::new(vec![reference("A", &a)], DEFAULT_MATCH_THRESHOLD).unwrap();
        let result = matcher.find_best_match(&Descriptor::new(a.to_vec()));
        assert_eq!(result.label, "A");
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn test_nearest_reference_wins() {
        let matcher = FaceMatcher::new(
            vec![
                reference("far", &[1.0, 1.0]),
                reference("near", &[0.1, 0.0]),
                reference("decoy", &[-1.0, 0.0]),
            ],
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();
        let result = matcher.find_best_match(&Descriptor::new(vec![0.0, 0.0]));
        assert_eq!(result.label, "near");
        assert!((result.distance - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_distance_at_threshold_is_unknown() {
        let matcher = FaceMatcher::new(vec![reference("A", &[0.6, 0.0])], 0.6).unwrap();
        let result = matcher.find_best_match(&Descriptor::new(vec![0.0, 0.0]));
        assert!(result.is_unknown());
        assert!((result.distance - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_distance_above_threshold_is_unknown() {
        let matcher = FaceMatcher::new(vec![reference("A", &[1.0, 1.0])], 0.6).unwrap();
        let result = matcher.find_best_match(&Descriptor::new(vec![0.0, 0.0]));
        assert_eq!(result.label, UNKNOWN_LABEL);
    }

    #[test]
    fn test_empty_reference_set_is_unknown() {
        let matcher = FaceMatcher::new(Vec::new(), 0.6).unwrap();
        let result = matcher.find_best_match(&Descriptor::new(vec![0.0]));
        assert!(result.is_unknown());
        assert!(result.distance.is_infinite());
    }

    #[test]
    fn test_mismatched_length_is_unknown() {
        let matcher = FaceMatcher::new(vec![reference("A", &[0.0, 0.0])], 0.6).unwrap();
        let result = matcher.find_best_match(&Descriptor::new(vec![0.0, 0.0, 0.0]));
        assert!(result.is_unknown());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        assert!(FaceMatcher::new(Vec::new(), 0.0).is_err());
        assert!(FaceMatcher::new(Vec::new(), -0.5).is_err());
        assert!(FaceMatcher::new(Vec::new(), f32::NAN).is_err());
    }

    #[test]
    fn test_display_rounds_distance() {
        let result = MatchResult {
            label: "Connor".into(),
            distance: 0.4567,
        };
        assert_eq!(result.to_string(), "Connor (0.46)");
    }
}
