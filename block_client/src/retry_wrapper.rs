use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use drive_config::ClientConfig;
use reqwest::Response;
use reqwest_retry::{Retryable, default_on_request_success};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{info, warn};

use crate::error::{BlockClientError, Result};

/// Outcome classification for a single attempt: fatal errors surface
/// immediately, retryable ones re-run the whole request until the attempt
/// budget is spent.
#[derive(Debug)]
pub enum RetryableRequestError {
    Fatal(BlockClientError),
    Retryable(BlockClientError),
}

/// Runs a transport request with a fixed timeout (set on the HTTP client)
/// and a bounded number of automatic retries with exponential backoff and
/// jitter. Only connectivity-class failures and retryable statuses are
/// retried here; expired block references (422) and name conflicts (409)
/// are fatal at this layer because the transfer engine recovers from them
/// differently.
pub struct RetryWrapper {
    max_attempts: usize,
    base_delay: Duration,
    api_tag: &'static str,
}

impl RetryWrapper {
    pub fn new(api_tag: &'static str, config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts,
            base_delay: config.retry_base_delay,
            api_tag,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn classify_send_error(&self, try_idx: usize, err: reqwest_middleware::Error) -> RetryableRequestError {
        let api = self.api_tag;

        let transient = match &err {
            reqwest_middleware::Error::Reqwest(e) => e.is_timeout() || e.is_connect(),
            reqwest_middleware::Error::Middleware(_) => false,
        };

        if transient {
            info!(api, try_idx, error = %err, "Retryable transport error");
            RetryableRequestError::Retryable(err.into())
        } else {
            warn!(api, try_idx, error = %err, "Fatal transport error");
            RetryableRequestError::Fatal(err.into())
        }
    }

    fn classify_response(&self, try_idx: usize, resp: Response) -> std::result::Result<Response, RetryableRequestError> {
        let api = self.api_tag;
        let retriability = default_on_request_success(&resp);

        match (resp.error_for_status(), retriability) {
            (Ok(resp), _) => Ok(resp),
            (Err(e), Some(Retryable::Transient)) => {
                info!(api, try_idx, error = %e, "Retryable status");
                Err(RetryableRequestError::Retryable(e.into()))
            },
            (Err(e), _) => {
                warn!(api, try_idx, error = %e, "Fatal status");
                Err(RetryableRequestError::Fatal(e.into()))
            },
        }
    }

    /// Run a request, retrying on transient failures, and hand each
    /// successful response to `process_fn`. The processing function decides
    /// whether its own failures (e.g. a body read that dies mid-stream)
    /// warrant re-running the request from scratch.
    pub async fn run_and_process<T, ReqFn, ReqFut, ProcFn, ProcFut>(
        self,
        make_request: ReqFn,
        process_fn: ProcFn,
    ) -> Result<T>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = std::result::Result<Response, reqwest_middleware::Error>> + 'static,
        ProcFn: Fn(Response) -> ProcFut + Send + Sync + 'static,
        ProcFut: Future<Output = std::result::Result<T, RetryableRequestError>> + 'static,
    {
        let strategy = ExponentialBackoff::from_millis(self.base_delay.as_millis().min(u64::MAX as u128) as u64)
            .map(jitter)
            .take(self.max_attempts);

        let self_ = Arc::new(self);

        // Each attempt's future must own what it touches, so the shared
        // pieces ride in one Arc cloned per attempt.
        let retry_info = Arc::new((make_request, process_fn, AtomicUsize::new(0), self_.clone()));

        let result = RetryIf::spawn(
            strategy,
            move || {
                let retry_info = retry_info.clone();
                async move {
                    let (make_request, process_fn, try_count, self_) = retry_info.as_ref();
                    let try_idx = try_count.fetch_add(1, Ordering::Relaxed);

                    match make_request().await {
                        Err(e) => Err(self_.classify_send_error(try_idx, e)),
                        Ok(resp) => {
                            let resp = self_.classify_response(try_idx, resp)?;
                            process_fn(resp).await
                        },
                    }
                }
            },
            |err: &RetryableRequestError| matches!(err, RetryableRequestError::Retryable(_)),
        )
        .await;

        match result {
            Ok(v) => Ok(v),
            Err(RetryableRequestError::Fatal(e)) => Err(e),
            Err(RetryableRequestError::Retryable(e)) => {
                warn!(api = self_.api_tag, "Retry budget exhausted; aborting: {e}");
                Err(e)
            },
        }
    }

    /// Run a request and return the (not yet consumed) response.
    pub async fn run<ReqFn, ReqFut>(self, make_request: ReqFn) -> Result<Response>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = std::result::Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, |resp| async move { Ok(resp) }).await
    }

    /// Run a request and collect the full body, retrying when the body read
    /// dies partway (a dropped connection masquerading as success).
    pub async fn run_and_extract_bytes<ReqFn, ReqFut>(self, make_request: ReqFn) -> Result<Bytes>
    where
        ReqFn: Fn() -> ReqFut + Send + Sync + 'static,
        ReqFut: Future<Output = std::result::Result<Response, reqwest_middleware::Error>> + 'static,
    {
        self.run_and_process(make_request, |resp: Response| async move {
            match resp.bytes().await {
                Ok(b) => Ok(b),
                Err(e) => {
                    if e.is_connect() || e.is_body() || e.is_decode() || e.is_timeout() {
                        Err(RetryableRequestError::Retryable(e.into()))
                    } else {
                        Err(RetryableRequestError::Fatal(e.into()))
                    }
                },
            }
        })
        .await
    }
}
