use hyper::Request;
use std::fmt;
use std::sync::Arc;

use super::predicate::Predicate;
use crate::balancer::{BackendInstance, LoadBalancer};
use crate::filters::{Filter, RetryPolicy};

/// Where a matched request is sent
#[derive(Debug, Clone)]
pub enum Destination {
    /// `lb://<service>`: picked through the service's load balancer
    Service(Arc<LoadBalancer>),
    /// `http(s)://host:port`: a single implicit instance
    Static(Arc<BackendInstance>),
}

impl Destination {
    pub fn describe(&self) -> String {
        match self {
            Destination::Service(pool) => format!("lb://{}", pool.service()),
            Destination::Static(instance) => {
                format!("{}://{}", instance.scheme(), instance.address())
            }
        }
    }
}

/// A compiled, immutable route
pub struct Route {
    id: String,
    priority: i32,
    order: usize,
    predicates: Vec<Predicate>,
    destination: Destination,
    filters: Vec<Filter>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("order", &self.order)
            .field("destination", &self.destination.describe())
            .field("filters", &self.filters.iter().map(|f| f.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Route {
    pub fn new(
        id: impl Into<String>,
        priority: i32,
        order: usize,
        predicates: Vec<Predicate>,
        destination: Destination,
        filters: Vec<Filter>,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            order,
            predicates,
            destination,
            filters,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// First retry filter of the chain, if any
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.filters.iter().find_map(|f| match f {
            Filter::Retry(policy) => Some(policy),
            _ => None,
        })
    }

    /// All predicates hold; a route without predicates matches everything
    pub fn matches<B>(&self, req: &Request<B>) -> bool {
        self.predicates.iter().all(|p| p.matches(req))
    }
}
