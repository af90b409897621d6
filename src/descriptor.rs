//! ExamGate - Face Descriptor
//!
//! Fixed-length face embedding produced by the extractor pipeline.
//! The registration-time copy lives server-side; per-attempt copies are
//! transient and zeroized on drop.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{GateError, GateResult};

/// Descriptor length produced by the embedding model
pub const DESCRIPTOR_LEN: usize = 128;

/// Fixed-length face embedding.
///
/// Wire form is a plain JSON number array, matching what the verification
/// and enrollment endpoints expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FaceDescriptor {
    values: Vec<f32>,
}

impl FaceDescriptor {
    /// Build a descriptor from a raw vector, checking the length
    pub fn from_vec(values: Vec<f32>) -> GateResult<Self> {
        if values.len() != DESCRIPTOR_LEN {
            return Err(GateError::InvalidDescriptorLength {
                expected: DESCRIPTOR_LEN,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    /// Internal constructor for values whose length is guaranteed by the
    /// embedding model (projection rows are validated at model load).
    pub(crate) fn from_raw(values: Vec<f32>) -> Self {
        debug_assert_eq!(values.len(), DESCRIPTOR_LEN);
        Self { values }
    }

    /// Descriptor components
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Copy out as a plain vector (wire form)
    pub fn to_vec(&self) -> Vec<f32> {
        self.values.clone()
    }

    /// Euclidean distance to another descriptor
    pub fn euclidean_distance(&self, other: &FaceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for FaceDescriptor {
    type Error = GateError;

    fn try_from(values: Vec<f32>) -> GateResult<Self> {
        Self::from_vec(values)
    }
}

impl From<FaceDescriptor> for Vec<f32> {
    fn from(descriptor: FaceDescriptor) -> Self {
        descriptor.to_vec()
    }
}

impl Drop for FaceDescriptor {
    fn drop(&mut self) {
        self.values.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor_with(first: f32) -> FaceDescriptor {
        let mut values = vec![0.0f32; DESCRIPTOR_LEN];
        values[0] = first;
        FaceDescriptor::from_vec(values).unwrap()
    }

    #[test]
    fn test_length_checked() {
        assert!(FaceDescriptor::from_vec(vec![0.0; DESCRIPTOR_LEN]).is_ok());

        let short = FaceDescriptor::from_vec(vec![0.0; 64]);
        assert!(matches!(
            short,
            Err(GateError::InvalidDescriptorLength { expected: 128, actual: 64 })
        ));
    }

    #[test]
    fn test_euclidean_distance() {
        let a = descriptor_with(0.0);
        let b = descriptor_with(3.0);

        assert_eq!(a.euclidean_distance(&a), 0.0);
        assert!((a.euclidean_distance(&b) - 3.0).abs() < 1e-6);
        // Distance is symmetric
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn test_wire_form_is_plain_array() {
        let d = descriptor_with(0.5);
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.starts_with("[0.5,"));

        let back: FaceDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_wire_form_rejects_wrong_length() {
        let result: Result<FaceDescriptor, _> = serde_json::from_str("[1.0, 2.0]");
        assert!(result.is_err());
    }
}
