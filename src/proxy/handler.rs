use hyper::header::HeaderValue;
use hyper::{Body, Method, Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GatewayResult;
use crate::filters::{ExchangeInfo, FilterChainExecutor};
use crate::gateway::Gateway;
use crate::monitoring::{GatewayEvent, HealthReport};
use crate::routing::{Destination, Route};

const X_REQUEST_ID: &str = "x-request-id";

/// Per-connection service entry point
#[derive(Clone)]
pub struct RequestHandler {
    gateway: Arc<Gateway>,
}

impl RequestHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    /// Never fails: every error is turned into its HTTP response
    pub async fn handle_request(&self, req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let client = req.extensions().get::<SocketAddr>().copied();
        Ok(self.gateway.handle(req, client).await)
    }
}

impl Gateway {
    /// Run one request through admission, routing, filters and the proxy
    pub async fn handle(&self, req: Request<Body>, client: Option<SocketAddr>) -> Response<Body> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let (route_id, mut response) = match self.admit() {
            Ok(_slot) => self.process(req, &request_id, client).await,
            Err(err) => {
                warn!(request_id = %request_id, path = %path, "Admission limit reached");
                (None, err.into_response())
            }
        };

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().entry(X_REQUEST_ID).or_insert(value);
        }

        self.events().emit(&GatewayEvent::RequestCompleted {
            request_id,
            route_id,
            method,
            path,
            status: response.status().as_u16(),
            latency: started.elapsed(),
        });

        response
    }

    async fn process(
        &self,
        req: Request<Body>,
        request_id: &str,
        client: Option<SocketAddr>,
    ) -> (Option<String>, Response<Body>) {
        // The table loaded here serves the whole request, even across a reload
        let table = self.current_table();

        if req.method() == Method::GET && req.uri().path() == self.health_path() {
            return (None, HealthReport::from_table(&table).into_response());
        }

        let route = match table.find(&req) {
            Ok(route) => route,
            Err(err) => {
                debug!(request_id = %request_id, error = %err, "No route matched");
                return (None, err.into_response());
            }
        };

        self.events().emit(&GatewayEvent::RouteMatched {
            request_id: request_id.to_string(),
            route_id: route.id().to_string(),
            table_version: table.version(),
        });

        let info = ExchangeInfo::new(&req, request_id, route.id(), client);
        let response = FilterChainExecutor::execute(
            route.filters(),
            req,
            &info,
            self.events().as_ref(),
            |req| self.dispatch(&route, req, &info),
        )
        .await;

        (Some(route.id().to_string()), response)
    }

    async fn dispatch(
        &self,
        route: &Route,
        req: Request<Body>,
        info: &ExchangeInfo,
    ) -> GatewayResult<Response<Body>> {
        match route.retry_policy() {
            Some(policy) => {
                policy
                    .execute(req, |req| self.forward_once(route, req, info))
                    .await
            }
            None => self.forward_once(route, req, info).await,
        }
    }

    /// One attempt: select a backend, hold its in-flight slot, forward
    async fn forward_once(
        &self,
        route: &Route,
        req: Request<Body>,
        info: &ExchangeInfo,
    ) -> GatewayResult<Response<Body>> {
        let guard = match route.destination() {
            Destination::Service(pool) => {
                let guard = pool.pick()?;
                self.events().emit(&GatewayEvent::BackendPicked {
                    request_id: info.request_id.clone(),
                    service: pool.service().to_string(),
                    backend: guard.instance().address(),
                    policy: pool.policy().as_str(),
                });
                guard
            }
            Destination::Static(instance) => instance.acquire(),
        };

        self.proxy().forward(req, guard.instance(), info).await
    }
}
