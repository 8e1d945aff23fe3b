//! Ad-hoc latency/recall measurement for a built index. Not part of the
//! request-serving path; used by the workspace's own benches and by anyone
//! comparing backends before picking one for a library.

use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::rng::standard_normal;

use super::contract::VectorIndex;
use super::metric::Metric;

#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub num_vectors: usize,
    pub dimension: usize,
    pub mean_latency_us: f64,
    pub p95_latency_us: f64,
    /// Fraction of an approximate search's top-k that also appear in the
    /// brute-force exact top-k, averaged over all queries. `1.0` means the
    /// backend found every exact neighbor within its own result set.
    pub recall_estimate: f64,
}

fn brute_force_top_k(vectors: &[(Uuid, Vec<f32>)], query: &[f32], k: usize, metric: Metric) -> Vec<Uuid> {
    let mut scored: Vec<(Uuid, f32)> = vectors.iter().map(|(id, v)| (*id, metric.distance(query, v))).collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(id, _)| id).collect()
}

/// Insert `num_vectors` random vectors (deterministically seeded) then run
/// `num_queries` random searches, reporting latency distribution and recall
/// against a brute-force ground truth computed from the same vectors.
pub async fn benchmark_index(index: &dyn VectorIndex, num_vectors: usize, num_queries: usize, k: usize) -> BenchmarkReport {
    let dimension = index.dimension();
    let metric = Metric::Euclidean;
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let random_vector = |rng: &mut ChaCha8Rng| -> Vec<f32> { (0..dimension).map(|_| standard_normal(rng)).collect() };

    let vectors: Vec<(Uuid, Vec<f32>)> = (0..num_vectors).map(|_| (Uuid::new_v4(), random_vector(&mut rng))).collect();
    let queries: Vec<Vec<f32>> = (0..num_queries).map(|_| random_vector(&mut rng)).collect();

    index
        .add_batch(vectors.clone())
        .await
        .expect("benchmark vectors match the index's configured dimension by construction");

    let mut latencies_us: Vec<f64> = Vec::with_capacity(queries.len());
    let mut recall_sum = 0.0;
    for query in &queries {
        let start = Instant::now();
        let hits = index.search(query, k, None).await.unwrap_or_default();
        latencies_us.push(start.elapsed().as_secs_f64() * 1_000_000.0);

        if k > 0 {
            let ground_truth = brute_force_top_k(&vectors, query, k, metric);
            let found: std::collections::HashSet<Uuid> = hits.iter().map(|(id, _)| *id).collect();
            let matched = ground_truth.iter().filter(|id| found.contains(id)).count();
            recall_sum += matched as f64 / ground_truth.len().max(1) as f64;
        }
    }

    let mut sorted_latencies = latencies_us.clone();
    sorted_latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mean_latency_us = if sorted_latencies.is_empty() { 0.0 } else { sorted_latencies.iter().sum::<f64>() / sorted_latencies.len() as f64 };
    let p95_latency_us = if sorted_latencies.is_empty() {
        0.0
    } else {
        let idx = ((sorted_latencies.len() as f64) * 0.95) as usize;
        sorted_latencies[idx.min(sorted_latencies.len() - 1)]
    };
    let recall_estimate = if queries.is_empty() { 0.0 } else { recall_sum / queries.len() as f64 };

    BenchmarkReport { num_vectors, dimension, mean_latency_us, p95_latency_us, recall_estimate }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::contract::{IndexConfig, IndexKind};
    use crate::index::factory::IndexFactory;

    #[tokio::test]
    async fn reports_plausible_latency_and_recall_for_a_small_run() {
        let index = IndexFactory::create_index(IndexKind::Lsh, IndexConfig::new(8, Metric::Euclidean), None).unwrap();
        let report = benchmark_index(index.as_ref(), 50, 5, 5).await;
        assert_eq!(report.num_vectors, 50);
        assert_eq!(report.dimension, 8);
        assert!(report.mean_latency_us >= 0.0);
        assert!(report.p95_latency_us >= report.mean_latency_us || report.p95_latency_us >= 0.0);
        assert!((0.0..=1.0).contains(&report.recall_estimate));
    }

    #[tokio::test]
    async fn exact_backend_recall_is_perfect() {
        let index = IndexFactory::create_index(IndexKind::KdTree, IndexConfig::new(8, Metric::Euclidean), None).unwrap();
        let report = benchmark_index(index.as_ref(), 200, 10, 5).await;
        assert!(report.recall_estimate > 0.9);
    }
}
