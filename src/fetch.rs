// src/fetch.rs
//
// Outbound HTTP with bounded retry/backoff. The transport is a trait so tests
// can script responses; production uses the reqwest-backed transport below.
// Callers are responsible for counting calls toward per-source quotas.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::de::DeserializeOwned;

use crate::error::{FetchError, RetryReason};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Raw transport-level response, before retry classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Connection-level failure (refused, reset, DNS, timeout).
#[derive(Debug, Clone)]
pub struct TransportError(pub String);

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError>;
}

/// Production transport. One client per process; 60s total timeout matches the
/// patience the slowest upstream (Comtrade bulk queries) needs.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("textile-trade-watch/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<RawResponse, TransportError> {
        let mut req = self.client.get(url).query(params);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(RawResponse { status, body })
    }
}

/// Successful response handed to agents.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Retry policy, evaluated per attempt:
/// 429 → sleep 10·2^attempt s; 5xx or network error → sleep 5·2^attempt s
/// while attempts remain; any other non-2xx fails immediately.
pub struct RetryingFetcher<T: HttpTransport = ReqwestTransport> {
    transport: T,
    max_retries: u32,
}

impl RetryingFetcher<ReqwestTransport> {
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport::new(), DEFAULT_MAX_RETRIES)
    }
}

impl Default for RetryingFetcher<ReqwestTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: HttpTransport> RetryingFetcher<T> {
    pub fn with_transport(transport: T, max_retries: u32) -> Self {
        Self {
            transport,
            max_retries,
        }
    }

    pub async fn fetch(
        &self,
        url: &str,
        params: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<FetchResponse, FetchError> {
        let mut last_reason = RetryReason::Network;

        for attempt in 0..self.max_retries {
            match self.transport.get(url, params, headers).await {
                Ok(resp) if (200..300).contains(&resp.status) => {
                    return Ok(FetchResponse {
                        status: resp.status,
                        body: resp.body,
                    });
                }
                Ok(resp) if resp.status == 429 => {
                    let wait = 10 * 2u64.pow(attempt);
                    tracing::warn!(url, attempt = attempt + 1, wait_secs = wait, "rate limited");
                    counter!("fetch_retries_total").increment(1);
                    last_reason = RetryReason::RateLimited;
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                Ok(resp) if resp.status >= 500 => {
                    let wait = 5 * 2u64.pow(attempt);
                    tracing::warn!(
                        url,
                        status = resp.status,
                        wait_secs = wait,
                        "server error, retrying"
                    );
                    counter!("fetch_retries_total").increment(1);
                    last_reason = RetryReason::ServerError(resp.status);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                Ok(resp) => {
                    return Err(FetchError::Client {
                        status: resp.status,
                        url: url.to_string(),
                    });
                }
                Err(e) => {
                    if attempt + 1 < self.max_retries {
                        let wait = 5 * 2u64.pow(attempt);
                        tracing::warn!(url, error = %e.0, wait_secs = wait, "request error, retrying");
                        counter!("fetch_retries_total").increment(1);
                        last_reason = RetryReason::Network;
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                    } else {
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            message: e.0,
                        });
                    }
                }
            }
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_string(),
            attempts: self.max_retries,
            last: last_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: pops one canned result per attempt.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(
            &self,
            _url: &str,
            _params: &[(String, String)],
            _headers: &[(String, String)],
        ) -> Result<RawResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError("script exhausted".into())))
        }
    }

    fn ok(body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    fn status(code: u16) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: code,
            body: String::new(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_backoff_doubles_and_exhausts() {
        let transport = ScriptedTransport::new(vec![status(429), status(429), status(429)]);
        let fetcher = RetryingFetcher::with_transport(transport, 3);

        let t0 = tokio::time::Instant::now();
        let err = fetcher.fetch("http://u", &[], &[]).await.unwrap_err();
        let elapsed = t0.elapsed();

        // 10s after attempt 1, 20s after attempt 2, 40s after attempt 3.
        assert!(elapsed >= Duration::from_secs(70), "elapsed {elapsed:?}");
        match err {
            FetchError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, RetryReason::RateLimited);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fetcher.transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_retries_then_succeeds() {
        let transport = ScriptedTransport::new(vec![status(503), ok("{\"ok\":true}")]);
        let fetcher = RetryingFetcher::with_transport(transport, 3);

        let t0 = tokio::time::Instant::now();
        let resp = fetcher.fetch("http://u", &[], &[]).await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(5));
        assert_eq!(resp.status, 200);
        let v: serde_json::Value = resp.json().unwrap();
        assert_eq!(v["ok"], true);
    }

    #[tokio::test]
    async fn client_error_fails_immediately() {
        let transport = ScriptedTransport::new(vec![status(404)]);
        let fetcher = RetryingFetcher::with_transport(transport, 3);
        let err = fetcher.fetch("http://u", &[], &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Client { status: 404, .. }));
        assert_eq!(fetcher.transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_propagates_on_last_attempt() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError("refused".into())),
            Err(TransportError("refused".into())),
            Err(TransportError("refused".into())),
        ]);
        let fetcher = RetryingFetcher::with_transport(transport, 3);
        let err = fetcher.fetch("http://u", &[], &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { .. }));
        assert_eq!(fetcher.transport.calls(), 3);
    }
}
