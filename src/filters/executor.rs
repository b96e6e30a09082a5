use hyper::{Body, Request, Response};
use std::future::Future;
use tracing::debug;

use super::{ExchangeInfo, Filter, FilterResult};
use crate::error::GatewayResult;
use crate::monitoring::{EventSink, FilterDecision, GatewayEvent};

/// 过滤链执行器，负责执行请求阶段、转发和响应阶段
pub struct FilterChainExecutor;

impl FilterChainExecutor {
    /// Run the request phase, `dispatch` unless a filter stopped the request,
    /// then the response phase over whatever response resulted
    pub async fn execute<F, Fut>(
        filters: &[Filter],
        mut req: Request<Body>,
        info: &ExchangeInfo,
        events: &dyn EventSink,
        dispatch: F,
    ) -> Response<Body>
    where
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = GatewayResult<Response<Body>>>,
    {
        let mut terminal: Option<GatewayResult<Response<Body>>> = None;

        for filter in filters {
            let (decision, outcome) = match filter.on_request(&mut req, info).await {
                FilterResult::Continue => (FilterDecision::Continue, None),
                FilterResult::ShortCircuit(resp) => (FilterDecision::ShortCircuit, Some(Ok(resp))),
                FilterResult::Reject(err) => (FilterDecision::Rejected, Some(Err(err))),
            };

            events.emit(&GatewayEvent::FilterOutcome {
                request_id: info.request_id.clone(),
                route_id: info.route_id.clone(),
                filter: filter.name(),
                decision,
            });

            if outcome.is_some() {
                debug!(
                    request_id = %info.request_id,
                    filter = filter.name(),
                    decision = decision.as_str(),
                    "Filter chain stopped"
                );
                terminal = outcome;
                break;
            }
        }

        let result = match terminal {
            Some(result) => result,
            None => dispatch(req).await,
        };

        let mut response = match result {
            Ok(resp) => resp,
            Err(err) => err.into_response(),
        };

        for filter in filters {
            filter.on_response(&mut response, info);
        }

        response
    }
}
