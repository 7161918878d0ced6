//! HTTP probe implementation.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use super::{ProbeError, ProbeOutcome, Prober};

/// Probes services with a plain `GET`, treating any 2xx as online.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    jitter: bool,
}

impl HttpProber {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("labdash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        Ok(Self { client, jitter: true })
    }

    /// Skip the start-up jitter. Mostly useful in tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        if self.jitter {
            // Spread a cycle's requests so they don't all leave at once
            let jitter = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        run_http_probe(&self.client, url, timeout).await.into()
    }
}

/// Run an HTTP probe against the given URL.
///
/// Returns latency in milliseconds, measured until the body has been read.
pub async fn run_http_probe(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<i64, ProbeError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ProbeError::InvalidUrl(url.to_string()));
    }

    let start = Instant::now();

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;

    let status = response.status();

    // Read the full body to measure complete transfer time
    let _body = response.bytes().await.map_err(|e| classify(e, timeout))?;

    if !status.is_success() {
        return Err(ProbeError::Status(status.as_u16()));
    }

    Ok(start.elapsed().as_millis() as i64)
}

fn classify(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}
