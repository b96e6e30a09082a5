use hyper::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::http::request::Parts;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use super::auth::Principal;
use crate::error::GatewayResult;

const BASE_DELAY: Duration = Duration::from_millis(50);
const MAX_DELAY: Duration = Duration::from_secs(1);
const MULTIPLIER: f64 = 2.0;

/// Bounded re-dispatch of idempotent, bodiless requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: u32,
    statuses: Vec<StatusCode>,
}

impl RetryPolicy {
    pub fn new(retries: u32, statuses: &[u16]) -> Self {
        Self {
            retries,
            statuses: statuses
                .iter()
                .filter_map(|s| StatusCode::from_u16(*s).ok())
                .collect(),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Only idempotent methods without a request body are replayed
    pub fn applies_to(&self, req: &Request<Body>) -> bool {
        let idempotent = matches!(
            *req.method(),
            Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
        );
        let bodiless = !req.headers().contains_key(TRANSFER_ENCODING)
            && req
                .headers()
                .get(CONTENT_LENGTH)
                .map_or(true, |len| len == "0");
        self.retries > 0 && idempotent && bodiless
    }

    fn should_retry(&self, result: &GatewayResult<Response<Body>>) -> bool {
        match result {
            Ok(resp) => self.statuses.contains(&resp.status()),
            Err(err) => err.is_retryable(),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = BASE_DELAY.as_millis() as f64 * MULTIPLIER.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis(millis.min(MAX_DELAY.as_millis() as f64) as u64)
    }

    /// Run `attempt` until it succeeds, fails for good or retries run out
    pub async fn execute<F, Fut>(
        &self,
        req: Request<Body>,
        mut attempt: F,
    ) -> GatewayResult<Response<Body>>
    where
        F: FnMut(Request<Body>) -> Fut,
        Fut: Future<Output = GatewayResult<Response<Body>>>,
    {
        if !self.applies_to(&req) {
            return attempt(req).await;
        }

        let (parts, _) = req.into_parts();
        let mut retried = 0;
        loop {
            let result = attempt(replay(&parts)).await;
            if retried >= self.retries || !self.should_retry(&result) {
                return result;
            }
            retried += 1;

            let delay = self.delay_for(retried);
            debug!(
                attempt = retried,
                delay_ms = delay.as_millis() as u64,
                outcome = %describe(&result),
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn replay(parts: &Parts) -> Request<Body> {
    let mut req = Request::new(Body::empty());
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    if let Some(principal) = parts.extensions.get::<Principal>() {
        req.extensions_mut().insert(principal.clone());
    }
    req
}

fn describe(result: &GatewayResult<Response<Body>>) -> String {
    match result {
        Ok(resp) => resp.status().to_string(),
        Err(err) => err.error_code().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn get() -> Request<Body> {
        Request::builder()
            .uri("/api/v1/grades")
            .header("x-trace", "1")
            .body(Body::empty())
            .unwrap() // OK in tests - valid request
    }

    fn status(code: u16) -> GatewayResult<Response<Body>> {
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::from_u16(code).unwrap();
        Ok(resp)
    }

    #[test]
    fn test_delay_backoff() {
        let policy = RetryPolicy::new(5, &[]);
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn test_applies_to() {
        let policy = RetryPolicy::new(2, &[503]);
        assert!(policy.applies_to(&get()));

        let post = Request::builder()
            .method(Method::POST)
            .body(Body::empty())
            .unwrap();
        assert!(!policy.applies_to(&post));

        let put_with_body = Request::builder()
            .method(Method::PUT)
            .header(CONTENT_LENGTH, "12")
            .body(Body::from("{\"grade\":1}"))
            .unwrap();
        assert!(!policy.applies_to(&put_with_body));

        assert!(!RetryPolicy::new(0, &[503]).applies_to(&get()));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let policy = RetryPolicy::new(3, &[503]);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = policy
            .execute(get(), move |req| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(req.headers()["x-trace"], "1");
                async move {
                    match n {
                        0 => Err(GatewayError::upstream_unavailable("a:1", "refused")),
                        1 => status(503),
                        _ => status(200),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap().status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let policy = RetryPolicy::new(2, &[]);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = policy
            .execute(get(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::upstream_timeout("a:1", Duration::from_millis(5))) }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::UpstreamTimeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let policy = RetryPolicy::new(3, &[503]);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = policy
            .execute(get(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::no_backend_available("grades")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
