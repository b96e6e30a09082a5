use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::algorithms::LoadBalancingAlgorithms;
use super::instance::{BackendInstance, InFlightGuard};
use crate::config::LoadBalancingType;
use crate::error::{GatewayError, GatewayResult};

/// Backend pool of one service plus its selection policy
#[derive(Debug)]
pub struct LoadBalancer {
    service: String,
    policy: LoadBalancingType,
    instances: Vec<Arc<BackendInstance>>,
    rotation: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(
        service: impl Into<String>,
        policy: LoadBalancingType,
        instances: Vec<Arc<BackendInstance>>,
    ) -> Self {
        Self {
            service: service.into(),
            policy,
            instances,
            rotation: AtomicUsize::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn policy(&self) -> LoadBalancingType {
        self.policy
    }

    pub fn instances(&self) -> &[Arc<BackendInstance>] {
        &self.instances
    }

    /// Select an eligible instance and raise its in-flight counter
    pub fn pick(&self) -> GatewayResult<InFlightGuard> {
        let now = Instant::now();
        let eligible: Vec<Arc<BackendInstance>> = self
            .instances
            .iter()
            .filter(|instance| instance.health_at(now).is_eligible())
            .cloned()
            .collect();

        let selected = match self.policy {
            LoadBalancingType::RoundRobin => {
                LoadBalancingAlgorithms::round_robin_select(&eligible, &self.rotation)
            }
            LoadBalancingType::WeightedRandom => {
                LoadBalancingAlgorithms::weighted_random_select(&eligible)
            }
            LoadBalancingType::LeastConnections => {
                LoadBalancingAlgorithms::least_connections_select(&eligible, &self.rotation)
            }
        };

        match selected.and_then(|index| eligible.get(index)) {
            Some(instance) => {
                debug!(
                    service = %self.service,
                    backend = %instance.address(),
                    policy = self.policy.as_str(),
                    "Selected backend"
                );
                Ok(instance.acquire())
            }
            None => {
                warn!(
                    service = %self.service,
                    instances = self.instances.len(),
                    "No eligible backend instance"
                );
                Err(GatewayError::no_backend_available(&self.service))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::instance::test_instance;
    use std::collections::HashMap;
    use std::time::Duration;

    fn balancer(policy: LoadBalancingType, n: u16) -> LoadBalancer {
        let instances = (0..n).map(|i| test_instance("10.0.0.1", 9000 + i, 1)).collect();
        LoadBalancer::new("students", policy, instances)
    }

    fn open_circuit(instance: &BackendInstance) {
        let now = Instant::now();
        for _ in 0..5 {
            instance.circuit().try_acquire_at(now).unwrap().failure_at(now);
        }
    }

    #[test]
    fn test_round_robin_even_split() {
        let lb = balancer(LoadBalancingType::RoundRobin, 3);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..99 {
            let guard = lb.pick().unwrap();
            *counts.entry(guard.instance().address()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|c| *c == 33));
    }

    #[test]
    fn test_unhealthy_instances_are_skipped() {
        let lb = balancer(LoadBalancingType::RoundRobin, 2);
        open_circuit(&lb.instances()[0]);

        for _ in 0..10 {
            let guard = lb.pick().unwrap();
            assert_eq!(guard.instance().port(), 9001);
        }
    }

    #[test]
    fn test_no_backend_available_when_all_open() {
        let lb = balancer(LoadBalancingType::LeastConnections, 2);
        for instance in lb.instances() {
            open_circuit(instance);
        }

        let err = lb.pick().unwrap_err();
        assert!(matches!(err, GatewayError::NoBackendAvailable { ref service } if service == "students"));
    }

    #[test]
    fn test_empty_pool() {
        let lb = LoadBalancer::new("empty", LoadBalancingType::WeightedRandom, Vec::new());
        assert!(lb.pick().is_err());
    }

    #[test]
    fn test_pick_guard_released_on_drop() {
        let lb = balancer(LoadBalancingType::LeastConnections, 2);
        let first = lb.pick().unwrap();
        let second = lb.pick().unwrap();
        assert_ne!(first.instance().port(), second.instance().port());
        drop(first);
        drop(second);
        assert!(lb.instances().iter().all(|i| i.in_flight() == 0));
    }

    #[tokio::test]
    async fn test_concurrent_round_robin_split() {
        let lb = Arc::new(balancer(LoadBalancingType::RoundRobin, 3));
        let mut handles = Vec::new();
        for _ in 0..100 {
            let lb = Arc::clone(&lb);
            handles.push(tokio::spawn(async move {
                let guard = lb.pick().unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
                guard.instance().port()
            }));
        }

        let mut counts: HashMap<u16, usize> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }
        for count in counts.values() {
            assert!((33..=34).contains(count), "counts: {:?}", counts);
        }
    }
}
