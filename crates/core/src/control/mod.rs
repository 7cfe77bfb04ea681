//! Control-plane request interception.
//!
//! Every outbound control request (RTSP signalling, or calls an embedding
//! application makes to its NVR/REST backend through [`ControlClient`])
//! passes through an [`InterceptorChain`]:
//!
//! ```text
//! on_request  (in order, may modify or reject)
//!     │
//!     ▼
//! Dispatch::dispatch
//!     │
//!     ├── Ok  → on_response (in order, threads the response)
//!     └── Err → on_error    (in order)
//! ```
//!
//! If an interceptor rejects the request in `on_request`, the interceptors
//! after it see the error through `on_error` and the request is never
//! dispatched.

pub mod interceptors;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{IngestError, Result};
use crate::protocol::{RtspRequest, RtspResponse};

pub use interceptors::{
    AuthHeaderInterceptor, LoggingInterceptor, MetricsInterceptor, RateLimitInterceptor,
};

/// A protocol-neutral outbound request.
#[derive(Debug, Clone)]
pub struct ControlRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    started_at: Instant,
}

impl ControlRequest {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            started_at: Instant::now(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Replace a header if present (case-insensitive), otherwise append it.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Time since the request was created.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl From<&RtspRequest> for ControlRequest {
    fn from(request: &RtspRequest) -> Self {
        let mut control = ControlRequest::new(request.method.as_str(), &request.uri);
        control.headers = request.headers.clone();
        control.body = request.body.clone().map(String::into_bytes).unwrap_or_default();
        control
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ControlResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<RtspResponse> for ControlResponse {
    fn from(response: RtspResponse) -> Self {
        Self {
            status: response.status_code,
            reason: response.reason,
            headers: response.headers,
            body: response.body.into_bytes(),
        }
    }
}

impl From<ControlResponse> for RtspResponse {
    fn from(response: ControlResponse) -> Self {
        RtspResponse {
            version: "RTSP/1.0".to_string(),
            status_code: response.status,
            reason: response.reason,
            headers: response.headers,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }
    }
}

/// Hooks around one request. All hooks have no-op defaults.
pub trait Interceptor: Send + Sync {
    /// Inspect or modify the request. An error rejects it.
    fn on_request(&self, _request: &mut ControlRequest) -> Result<()> {
        Ok(())
    }

    fn on_response(&self, _request: &ControlRequest, response: ControlResponse) -> ControlResponse {
        response
    }

    fn on_error(&self, _request: &ControlRequest, _error: &IngestError) {}
}

/// Sends a request and returns the raw response.
pub trait Dispatch {
    fn dispatch(&self, request: &ControlRequest) -> Result<ControlResponse>;
}

impl<F> Dispatch for F
where
    F: Fn(&ControlRequest) -> Result<ControlResponse>,
{
    fn dispatch(&self, request: &ControlRequest) -> Result<ControlResponse> {
        self(request)
    }
}

/// Ordered interceptors. Immutable once built.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn with_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `on_request` in order. When interceptor `i` fails, interceptors
    /// `i+1..` get `on_error` and the error is returned.
    pub fn on_request(&self, request: &mut ControlRequest) -> Result<()> {
        for (i, interceptor) in self.interceptors.iter().enumerate() {
            if let Err(error) = interceptor.on_request(request) {
                for later in &self.interceptors[i + 1..] {
                    later.on_error(request, &error);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    pub fn on_response(&self, request: &ControlRequest, response: ControlResponse) -> ControlResponse {
        self.interceptors
            .iter()
            .fold(response, |response, interceptor| {
                interceptor.on_response(request, response)
            })
    }

    pub fn on_error(&self, request: &ControlRequest, error: &IngestError) {
        for interceptor in &self.interceptors {
            interceptor.on_error(request, error);
        }
    }

    /// Run a request through the chain around `dispatch`.
    pub fn execute<D: Dispatch + ?Sized>(
        &self,
        mut request: ControlRequest,
        dispatch: &D,
    ) -> Result<ControlResponse> {
        self.on_request(&mut request)?;
        match dispatch.dispatch(&request) {
            Ok(response) => Ok(self.on_response(&request, response)),
            Err(error) => {
                self.on_error(&request, &error);
                Err(error)
            }
        }
    }
}

/// A dispatcher wrapped with an interceptor chain.
pub struct ControlClient {
    chain: InterceptorChain,
    dispatch: Box<dyn Dispatch + Send + Sync>,
}

impl ControlClient {
    pub fn new(chain: InterceptorChain, dispatch: impl Dispatch + Send + Sync + 'static) -> Self {
        Self {
            chain,
            dispatch: Box::new(dispatch),
        }
    }

    pub fn execute(&self, request: ControlRequest) -> Result<ControlResponse> {
        self.chain.execute(request, self.dispatch.as_ref())
    }

    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    /// Records every hook call as `"<name>:<hook>"`.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        reject: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log: log.clone(),
                reject: false,
            }
        }
    }

    impl Interceptor for Recorder {
        fn on_request(&self, request: &mut ControlRequest) -> Result<()> {
            self.log.lock().push(format!("{}:request", self.name));
            if self.reject {
                return Err(IngestError::Rejected(self.name.to_string()));
            }
            request.set_header("X-Seen-By", self.name);
            Ok(())
        }

        fn on_response(&self, _request: &ControlRequest, mut response: ControlResponse) -> ControlResponse {
            self.log.lock().push(format!("{}:response", self.name));
            response.reason.push_str(self.name);
            response
        }

        fn on_error(&self, _request: &ControlRequest, _error: &IngestError) {
            self.log.lock().push(format!("{}:error", self.name));
        }
    }

    fn ok_dispatch(request: &ControlRequest) -> Result<ControlResponse> {
        let mut response = ControlResponse::new(200);
        if let Some(seen) = request.get_header("X-Seen-By") {
            response.headers.push(("X-Echo".into(), seen.into()));
        }
        Ok(response)
    }

    #[test]
    fn hooks_run_in_order_and_thread_response() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new()
            .with(Recorder::new("a", &log))
            .with(Recorder::new("b", &log));

        let response = chain
            .execute(ControlRequest::new("GET", "https://nvr/api"), &ok_dispatch)
            .unwrap();

        assert_eq!(response.reason, "ab");
        assert_eq!(response.headers[0].1, "b", "dispatch saw the last modification");
        assert_eq!(
            *log.lock(),
            vec!["a:request", "b:request", "a:response", "b:response"]
        );
    }

    #[test]
    fn rejection_notifies_later_interceptors_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut rejecting = Recorder::new("b", &log);
        rejecting.reject = true;
        let chain = InterceptorChain::new()
            .with(Recorder::new("a", &log))
            .with(rejecting)
            .with(Recorder::new("c", &log));

        let dispatched = Arc::new(Mutex::new(false));
        let flag = dispatched.clone();
        let dispatch = move |_: &ControlRequest| -> Result<ControlResponse> {
            *flag.lock() = true;
            Ok(ControlResponse::new(200))
        };

        let result = chain.execute(ControlRequest::new("GET", "https://nvr/api"), &dispatch);
        assert!(matches!(result, Err(IngestError::Rejected(_))));
        assert!(!*dispatched.lock());
        assert_eq!(*log.lock(), vec!["a:request", "b:request", "c:error"]);
    }

    #[test]
    fn dispatch_error_reaches_every_interceptor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = ControlClient::new(
            InterceptorChain::new()
                .with(Recorder::new("a", &log))
                .with(Recorder::new("b", &log)),
            |_: &ControlRequest| -> Result<ControlResponse> {
                Err(IngestError::Connection(crate::error::ConnectionErrorKind::Refused))
            },
        );

        assert!(client.execute(ControlRequest::new("POST", "https://nvr/api")).is_err());
        assert_eq!(
            *log.lock(),
            vec!["a:request", "b:request", "a:error", "b:error"]
        );
    }

    #[test]
    fn rtsp_conversions() {
        let rtsp = RtspRequest::new(crate::protocol::Method::Describe, "rtsp://cam/live")
            .add_header("CSeq", "2");
        let control = ControlRequest::from(&rtsp);
        assert_eq!(control.method, "DESCRIBE");
        assert_eq!(control.get_header("cseq"), Some("2"));

        let response = RtspResponse::parse("RTSP/1.0 200 OK\r\nCSeq: 2\r\n\r\n")
            .unwrap()
            .with_body("v=0\r\n".into());
        let back = RtspResponse::from(ControlResponse::from(response));
        assert_eq!(back.cseq(), Some(2));
        assert_eq!(back.body, "v=0\r\n");
    }
}
