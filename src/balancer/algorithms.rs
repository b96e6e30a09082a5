use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::instance::BackendInstance;

/// Load balancing algorithms implementation
///
/// Every function receives the already filtered eligible candidates and
/// returns an index into that slice.
pub struct LoadBalancingAlgorithms;

impl LoadBalancingAlgorithms {
    /// Round robin selection over a shared rotating index
    pub fn round_robin_select(
        candidates: &[Arc<BackendInstance>],
        rotation: &AtomicUsize,
    ) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let ticket = rotation.fetch_add(1, Ordering::Relaxed);
        Some(ticket % candidates.len())
    }

    /// Weight-proportional random selection; all-zero weights fall back to uniform
    pub fn weighted_random_select(candidates: &[Arc<BackendInstance>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let total: u64 = candidates.iter().map(|c| c.weight() as u64).sum();
        let mut rng = rand::thread_rng();
        if total == 0 {
            return Some(rng.gen_range(0..candidates.len()));
        }

        let mut point = rng.gen_range(0..total);
        for (index, candidate) in candidates.iter().enumerate() {
            let weight = candidate.weight() as u64;
            if point < weight {
                return Some(index);
            }
            point -= weight;
        }

        Some(candidates.len() - 1)
    }

    /// Least in-flight requests; ties are rotated
    pub fn least_connections_select(
        candidates: &[Arc<BackendInstance>],
        rotation: &AtomicUsize,
    ) -> Option<usize> {
        let min = candidates.iter().map(|c| c.in_flight()).min()?;

        let tied: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.in_flight() == min)
            .map(|(i, _)| i)
            .collect();

        // Counters may move between the two passes
        if tied.is_empty() {
            return Some(0);
        }

        let ticket = rotation.fetch_add(1, Ordering::Relaxed);
        Some(tied[ticket % tied.len()])
    }
}
