//! Built-in interceptors.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{ControlRequest, ControlResponse, Interceptor};
use crate::error::{IngestError, Result};
use crate::metrics::{MetricsCollector, RequestMetric};
use crate::ratelimit::RateLimiter;

/// Sets a fixed header on every request, e.g. `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthHeaderInterceptor {
    name: String,
    value: String,
}

impl AuthHeaderInterceptor {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    pub fn bearer(token: &str) -> Self {
        Self::new("Authorization", &format!("Bearer {token}"))
    }
}

impl Interceptor for AuthHeaderInterceptor {
    fn on_request(&self, request: &mut ControlRequest) -> Result<()> {
        request.set_header(&self.name, &self.value);
        Ok(())
    }
}

/// Logs each request and its outcome through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn on_request(&self, request: &mut ControlRequest) -> Result<()> {
        tracing::debug!(method = %request.method, url = %request.url, "control request");
        Ok(())
    }

    fn on_response(&self, request: &ControlRequest, response: ControlResponse) -> ControlResponse {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            elapsed_ms = request.elapsed().as_millis() as u64,
            "control response"
        );
        response
    }

    fn on_error(&self, request: &ControlRequest, error: &IngestError) {
        tracing::warn!(method = %request.method, url = %request.url, %error, "control request failed");
    }
}

/// Records a [`RequestMetric`] for every completed or failed request.
#[derive(Debug, Clone)]
pub struct MetricsInterceptor {
    collector: Arc<Mutex<MetricsCollector>>,
}

impl MetricsInterceptor {
    pub fn new(collector: Arc<Mutex<MetricsCollector>>) -> Self {
        Self { collector }
    }

    fn record(&self, request: &ControlRequest, status: Option<u16>, response_bytes: usize, success: bool) {
        self.collector.lock().record(RequestMetric {
            url: request.url.clone(),
            method: request.method.clone(),
            status_code: status,
            duration: request.elapsed(),
            request_bytes: request.body.len() as u64,
            response_bytes: response_bytes as u64,
            recorded_at: SystemTime::now(),
            success,
        });
    }
}

impl Interceptor for MetricsInterceptor {
    fn on_response(&self, request: &ControlRequest, response: ControlResponse) -> ControlResponse {
        self.record(
            request,
            Some(response.status),
            response.body.len(),
            response.is_success(),
        );
        response
    }

    fn on_error(&self, request: &ControlRequest, _error: &IngestError) {
        self.record(request, None, 0, false);
    }
}

/// Rejects requests the limiter refuses with [`IngestError::RateLimited`].
#[derive(Clone)]
pub struct RateLimitInterceptor {
    limiter: Arc<Mutex<dyn RateLimiter>>,
}

impl RateLimitInterceptor {
    pub fn new(limiter: impl RateLimiter + 'static) -> Self {
        Self {
            limiter: Arc::new(Mutex::new(limiter)),
        }
    }

    /// Share one limiter between several chains.
    pub fn shared(limiter: Arc<Mutex<dyn RateLimiter>>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for RateLimitInterceptor {
    fn on_request(&self, request: &mut ControlRequest) -> Result<()> {
        let mut limiter = self.limiter.lock();
        if limiter.acquire() {
            return Ok(());
        }
        let wait = limiter.wait_time();
        tracing::debug!(url = %request.url, wait_ms = wait.as_millis() as u64, "rate limited");
        Err(IngestError::RateLimited { wait })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::control::{ControlClient, InterceptorChain};
    use crate::ratelimit::{FixedInterval, ManualClock, TokenBucket};

    fn echo(request: &ControlRequest) -> Result<ControlResponse> {
        let mut response = ControlResponse::new(200);
        response.body = request.get_header("Authorization").unwrap_or("").as_bytes().to_vec();
        Ok(response)
    }

    #[test]
    fn auth_header_is_applied() {
        let client = ControlClient::new(
            InterceptorChain::new().with(AuthHeaderInterceptor::bearer("t0k")),
            echo,
        );
        let response = client.execute(ControlRequest::new("GET", "https://nvr/cams")).unwrap();
        assert_eq!(response.body, b"Bearer t0k");
    }

    #[test]
    fn rate_limit_rejects_and_metrics_record_failure() {
        let collector = Arc::new(Mutex::new(MetricsCollector::new()));
        let clock = ManualClock::new();
        let limiter = FixedInterval::with_clock(Duration::from_secs(1), 2, Arc::new(clock.clone()));

        let client = ControlClient::new(
            InterceptorChain::new()
                .with(LoggingInterceptor)
                .with(RateLimitInterceptor::new(limiter))
                .with(MetricsInterceptor::new(collector.clone())),
            echo,
        );

        assert!(client.execute(ControlRequest::new("GET", "https://nvr/a")).is_ok());
        assert!(client.execute(ControlRequest::new("GET", "https://nvr/b")).is_ok());
        match client.execute(ControlRequest::new("GET", "https://nvr/c")) {
            Err(IngestError::RateLimited { wait }) => assert!(wait <= Duration::from_secs(1)),
            other => panic!("expected RateLimited, got {other:?}"),
        }

        let agg = collector.lock().aggregated();
        assert_eq!(agg.total_requests, 3);
        assert_eq!(agg.successful_requests, 2);
        assert_eq!(agg.failed_requests, 1);
        assert_eq!(agg.requests_by_status_code.get(&200), Some(&2));

        clock.advance(Duration::from_secs(1));
        assert!(client.execute(ControlRequest::new("GET", "https://nvr/d")).is_err());
        clock.advance(Duration::from_millis(1));
        assert!(client.execute(ControlRequest::new("GET", "https://nvr/e")).is_ok());
    }

    #[test]
    fn shared_limiter_spans_chains() {
        let limiter: Arc<Mutex<dyn RateLimiter>> = Arc::new(Mutex::new(TokenBucket::with_clock(
            1,
            Duration::from_secs(1),
            1,
            Arc::new(ManualClock::new()),
        )));
        let a = InterceptorChain::new().with(RateLimitInterceptor::shared(limiter.clone()));
        let b = InterceptorChain::new().with(RateLimitInterceptor::shared(limiter));

        assert!(a.execute(ControlRequest::new("GET", "x"), &echo).is_ok());
        assert!(b.execute(ControlRequest::new("GET", "x"), &echo).is_err());
    }

    #[test]
    fn non_success_status_counts_as_failure() {
        let collector = Arc::new(Mutex::new(MetricsCollector::new()));
        let chain = InterceptorChain::new().with(MetricsInterceptor::new(collector.clone()));
        let not_found = |_: &ControlRequest| -> Result<ControlResponse> { Ok(ControlResponse::new(404)) };
        chain
            .execute(ControlRequest::new("GET", "https://nvr/x").with_body(vec![0; 12]), &not_found)
            .unwrap();

        let agg = collector.lock().aggregated();
        assert_eq!(agg.failed_requests, 1);
        assert_eq!(agg.total_bytes_sent, 12);
    }
}
