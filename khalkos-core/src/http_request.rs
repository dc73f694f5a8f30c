//! HTTP plumbing shared by the node, paymaster, indexer and price feed clients.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::WalletError;

const TIMEOUT: Duration = Duration::from_secs(10);

/// How many times a transient failure (connect error, timeout, 429, 5xx) is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    retries: usize,
    min_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Four attempts with 200ms..2s exponential backoff.
    pub(crate) const STANDARD: Self = Self {
        retries: 3,
        min_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(2),
    };

    /// Single attempt, for callers that already poll on their own schedule.
    pub(crate) const NONE: Self = Self {
        retries: 0,
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    fn backoff(self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.retries)
    }
}

/// `reqwest` client with a timeout, a `khalkos-core` user agent, an HTTPS-only rule
/// outside tests and a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpClient {
    pub(crate) fn new(retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry,
        }
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, WalletError> {
        if !cfg!(test) && !url.starts_with("https://") {
            return Err(WalletError::invalid_input(
                "url",
                format!("refusing non-https endpoint {url}"),
            ));
        }
        Ok(self
            .client
            .request(method, url)
            .timeout(TIMEOUT)
            .header(
                reqwest::header::USER_AGENT,
                concat!("khalkos-core/", env!("CARGO_PKG_VERSION")),
            ))
    }

    pub(crate) fn get(&self, url: &str) -> Result<RequestBuilder, WalletError> {
        self.request(Method::GET, url)
    }

    pub(crate) fn post(&self, url: &str) -> Result<RequestBuilder, WalletError> {
        self.request(Method::POST, url)
    }

    /// Sends `builder`, retrying transient failures. Any status the server answers
    /// with is returned once retries are exhausted or the failure is not transient.
    pub(crate) async fn send(&self, builder: RequestBuilder) -> Result<Response, WalletError> {
        // streaming bodies cannot be replayed
        if self.retry.retries == 0 || builder.try_clone().is_none() {
            return attempt(builder).await.map_err(Failure::into_error);
        }

        (|| async {
            let builder = builder.try_clone().ok_or_else(|| {
                Failure::Fatal(WalletError::NetworkError {
                    url: "<unknown>".to_string(),
                    status: None,
                    error: "request body cannot be replayed".to_string(),
                })
            })?;
            attempt(builder).await
        })
        .retry(self.retry.backoff())
        .when(Failure::is_transient)
        .notify(|failure: &Failure, delay: Duration| {
            log::debug!("retrying in {delay:?}: {}", failure.error());
        })
        .await
        .map_err(Failure::into_error)
    }

    /// Sends `builder` and decodes a 2xx JSON body. Other statuses become `NetworkError`,
    /// undecodable bodies `SerializationError`.
    pub(crate) async fn fetch_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, WalletError> {
        let response = self.send(builder).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WalletError::NetworkError {
                url: response.url().to_string(),
                status: Some(status.as_u16()),
                error: format!("server answered {status}"),
            });
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

enum Failure {
    Transient(WalletError),
    Fatal(WalletError),
}

impl Failure {
    const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    const fn error(&self) -> &WalletError {
        match self {
            Self::Transient(error) | Self::Fatal(error) => error,
        }
    }

    fn into_error(self) -> WalletError {
        match self {
            Self::Transient(error) | Self::Fatal(error) => error,
        }
    }
}

async fn attempt(builder: RequestBuilder) -> Result<Response, Failure> {
    let (client, request) = builder.build_split();
    let request = request.map_err(|err| Failure::Fatal(err.into()))?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(response) => {
            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                return Err(Failure::Transient(WalletError::NetworkError {
                    url,
                    status: Some(status.as_u16()),
                    error: format!("server answered {status}"),
                }));
            }
            Ok(response)
        }
        Err(err) if err.is_timeout() || err.is_connect() => {
            Err(Failure::Transient(WalletError::NetworkError {
                url,
                status: None,
                error: format!("unreachable: {err}"),
            }))
        }
        Err(err) => Err(Failure::Fatal(WalletError::NetworkError {
            url,
            status: None,
            error: err.to_string(),
        })),
    }
}
