//! HTTP probe implementation.

use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use reqwest::redirect::Policy;
use std::error::Error as StdError;
use std::time::{Duration, Instant};

use super::{classify_failure, classify_response, failure_kind, Probe, ProbeError, ProbeOutcome};
use crate::config::ProbeSettings;

/// HTTP prober sharing one connection pool across all checks.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    get_timeout: Duration,
    head_timeout: Duration,
    slow_threshold_ms: u64,
}

impl HttpProber {
    pub fn new(settings: &ProbeSettings) -> Result<Self, ProbeError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .redirect(Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            get_timeout: settings.get_timeout,
            head_timeout: settings.head_timeout,
            slow_threshold_ms: settings.slow_threshold_ms,
        })
    }

    /// Run a GET, retrying once with HEAD if the GET never got a response.
    pub async fn check(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();

        let get_err = match self.client.get(url).timeout(self.get_timeout).send().await {
            Ok(response) => {
                let latency = elapsed_ms(start);
                let code = response.status().as_u16();
                return classify_response(code, latency, self.slow_threshold_ms);
            }
            Err(e) => e,
        };

        tracing::debug!("GET {} failed ({}), retrying with HEAD", url, error_chain(&get_err));

        let head_start = Instant::now();
        match self.client.head(url).timeout(self.head_timeout).send().await {
            Ok(response) => {
                let latency = elapsed_ms(head_start);
                classify_response(response.status().as_u16(), latency, self.slow_threshold_ms)
            }
            Err(e) => {
                let detail = error_chain(&e);
                let kind = failure_kind(e.is_timeout(), &detail);
                tracing::debug!("HEAD {} failed: {}", url, detail);
                classify_failure(&kind, elapsed_ms(start))
            }
        }
    }
}

impl Probe for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        self.check(url).await
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis().min(u64::MAX as u128) as u64
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
