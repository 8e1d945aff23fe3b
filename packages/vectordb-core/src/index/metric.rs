//! Distance metrics shared by every index backend.

use serde::{Deserialize, Serialize};

/// Distance function used to rank candidates. Smaller is always "more
/// similar" regardless of metric, including for `Dot`, which is negated so
/// the contract stays uniform across backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Euclidean,
    Cosine,
    Dot,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::Euclidean
    }
}

impl Metric {
    /// Compute the configured distance between two equal-length vectors.
    ///
    /// `Cosine` returns `1.0` when either vector has zero norm, matching the
    /// reference behavior rather than dividing by zero.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::Euclidean => euclidean(a, b),
            Metric::Cosine => cosine(a, b),
            Metric::Dot => -dot(a, b),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ═══ Euclidean Tests ═══

    #[test]
    fn euclidean_of_identical_vectors_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(Metric::Euclidean.distance(&v, &v) < 1e-6);
    }

    #[test]
    fn euclidean_unit_offset() {
        let a = vec![0.0, 0.0];
        let b = vec![3.0, 4.0];
        assert!((Metric::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-6);
    }

    // ═══ Cosine Tests ═══

    #[test]
    fn cosine_of_identical_direction_is_zero() {
        let a = vec![1.0, 1.0];
        let b = vec![2.0, 2.0];
        assert!(Metric::Cosine.distance(&a, &b) < 1e-6);
    }

    #[test]
    fn cosine_of_zero_vector_is_one() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(Metric::Cosine.distance(&a, &b), 1.0);
    }

    // ═══ Dot Tests ═══

    #[test]
    fn dot_is_negated_so_smaller_is_more_similar() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        assert!(Metric::Dot.distance(&a, &b) < Metric::Dot.distance(&a, &c));
    }
}
