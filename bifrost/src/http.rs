//! A bounded-retry HTTP fetch with exponential backoff.
//!
//! Both the block scanner and the THORChain client talk to endpoints that may be slow, restarting or simply gone.
//! Each fetch is retried according to a [RetryPolicy] until it succeeds, the policy is exhausted, or the caller's
//! [CancellationToken] fires. Cancellation is only observed between attempts: an in-flight request is bounded by the
//! per-request timeout instead.

use std::time::Duration;

use anyhow::Result;
use backoff::{ExponentialBackoff, backoff::Backoff};
use reqwest::{RequestBuilder, StatusCode};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{HttpError, RetryError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_interval: Duration,
    pub max_elapsed_time: Option<Duration>,
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            randomization_factor: self.randomization_factor,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: self.max_elapsed_time,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

#[derive(Debug, Clone)]
pub struct HttpRetryClient {
    client: reqwest::Client,
    policy: RetryPolicy,
    /// Attached to every log event, so failures from different owners of a client can be told apart.
    component: &'static str,
}

impl HttpRetryClient {
    pub fn new(component: &'static str, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .build()?;
        Ok(HttpRetryClient {
            client,
            policy,
            component,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn get(&self, url: &str, cancel: &CancellationToken) -> Result<Vec<u8>, RetryError> {
        self.fetch_with_retry(url, || self.client.get(url), cancel)
            .await
    }

    pub async fn post(
        &self,
        url: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RetryError> {
        self.fetch_with_retry(
            url,
            || {
                self.client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.to_vec())
            },
            cancel,
        )
        .await
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        request: impl Fn() -> RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, RetryError> {
        let mut backoff = self.policy.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let last = match self.fetch_once(url, request()).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };
            warn!(component = self.component, %url, attempts, error = %last, "http request failed");

            if attempts >= self.policy.max_attempts {
                return Err(RetryError::Exhausted {
                    url: url.to_owned(),
                    attempts,
                    last,
                });
            }
            let Some(wait) = backoff.next_backoff() else {
                return Err(RetryError::Exhausted {
                    url: url.to_owned(),
                    attempts,
                    last,
                });
            };

            select! {
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { url: url.to_owned(), attempts, last });
                }
                _ = sleep(wait) => {}
            }
        }
    }

    async fn fetch_once(&self, url: &str, request: RequestBuilder) -> Result<Vec<u8>, HttpError> {
        debug!(component = self.component, %url, "http");
        let response = request.send().await.map_err(|source| HttpError::Transport {
            url: url.to_owned(),
            source,
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(HttpError::Status {
                url: url.to_owned(),
                status,
            });
        }

        let body = response.bytes().await.map_err(|source| HttpError::Body {
            url: url.to_owned(),
            source,
        })?;
        Ok(body.to_vec())
    }
}
