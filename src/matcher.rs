//! ExamGate - Descriptor Matcher
//!
//! Distance-based same-person decision. In production this comparison runs
//! server-side against the registration-time descriptor; this module is the
//! contract both sides follow, and the reference implementation used by
//! tests and the CLI.

use crate::descriptor::FaceDescriptor;

/// Default match threshold, calibrated for the current embedding model.
/// Lower is stricter. Must be re-derived whenever the embedding model
/// changes.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Outcome of a descriptor comparison, carrying the measured distance so
/// callers can log how close a rejected pair came.
#[derive(Debug, Clone, Copy)]
pub struct MatchDecision {
    /// Whether the two descriptors belong to the same person
    pub is_match: bool,
    /// Euclidean distance between the descriptors
    pub distance: f32,
    /// Threshold the decision was made against
    pub threshold: f32,
}

/// Compare two descriptors against a threshold. If `threshold` is `None`,
/// uses [`DEFAULT_MATCH_THRESHOLD`]. Match iff distance < threshold.
pub fn decide(a: &FaceDescriptor, b: &FaceDescriptor, threshold: Option<f32>) -> MatchDecision {
    let threshold = threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD);
    let distance = a.euclidean_distance(b);

    MatchDecision {
        is_match: distance < threshold,
        distance,
        threshold,
    }
}

/// Convenience form of [`decide`] under the default threshold
pub fn matches(a: &FaceDescriptor, b: &FaceDescriptor) -> bool {
    decide(a, b, None).is_match
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DESCRIPTOR_LEN;

    /// Fixture: a unit vector along the given axis
    fn axis(i: usize) -> FaceDescriptor {
        let mut values = vec![0.0f32; DESCRIPTOR_LEN];
        values[i] = 1.0;
        FaceDescriptor::from_vec(values).unwrap()
    }

    /// Fixture: `base` perturbed by `epsilon` on every component, the shape
    /// of a same-person re-capture
    fn perturbed(base: &FaceDescriptor, epsilon: f32) -> FaceDescriptor {
        let values = base.as_slice().iter().map(|v| v + epsilon).collect();
        FaceDescriptor::from_vec(values).unwrap()
    }

    #[test]
    fn test_same_person_pairs_match() {
        let enrolled = axis(0);
        // identical capture
        assert!(matches(&enrolled, &enrolled));
        // small re-capture drift: distance = sqrt(128) * 0.01 ~= 0.113
        let recapture = perturbed(&enrolled, 0.01);
        let decision = decide(&enrolled, &recapture, None);
        assert!(decision.is_match);
        assert!(decision.distance < 0.2);
    }

    #[test]
    fn test_different_person_pairs_rejected() {
        // Orthogonal unit embeddings sit at distance sqrt(2) ~= 1.414
        let a = axis(0);
        let b = axis(1);
        let decision = decide(&a, &b, None);
        assert!(!decision.is_match);
        assert!(decision.distance > 1.0);
    }

    #[test]
    fn test_distance_equal_to_threshold_is_not_a_match() {
        let a = axis(0);
        let b = perturbed(&a, 0.0);
        // distance 0.0 against threshold 0.0: strict less-than
        let decision = decide(&a, &b, Some(0.0));
        assert!(!decision.is_match);
        assert_eq!(decision.distance, 0.0);
    }

    #[test]
    fn test_stricter_threshold_rejects_drift() {
        let enrolled = axis(0);
        let recapture = perturbed(&enrolled, 0.01);
        // drift that passes the default threshold fails a strict one
        assert!(decide(&enrolled, &recapture, None).is_match);
        assert!(!decide(&enrolled, &recapture, Some(0.05)).is_match);
    }
}
