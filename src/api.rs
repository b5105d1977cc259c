// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::decode::{decode_records, DecodeError};
use crate::models::PriceRecord;

pub const DEFAULT_API_URL: &str =
    "https://magyp.gob.ar/sitio/areas/ss_mercados_agropecuarios/ws/ssma/precios_fob.php";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to connect to the API: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("API responded with status {0}")]
    Status(u16),
    #[error("API returned an empty response")]
    EmptyBody,
    #[error("API returned HTML instead of JSON: {excerpt}")]
    Html { excerpt: String },
    #[error("API returned an error message: {body}")]
    ErrorText { body: String },
    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl FetchError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Connect(_)
                | FetchError::Status(_)
                | FetchError::EmptyBody
                | FetchError::Html { .. }
                | FetchError::ErrorText { .. }
        )
    }
}

/// Linear backoff: the wait after failed attempt `i` is `step * (i + 1)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub step: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.step * (attempt + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(2),
        }
    }
}

#[async_trait]
pub trait PriceSource {
    /// Fetches every price published for `date`, making up to
    /// `max_retries + 1` attempts.
    async fn fetch_prices(
        &self,
        date: NaiveDate,
        max_retries: u32,
    ) -> Result<Vec<PriceRecord>, FetchError>;
}

pub struct FobClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl FobClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            retry,
        })
    }

    async fn attempt(&self, url: &str) -> Result<Vec<PriceRecord>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::Connect)?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await.map_err(FetchError::Body)?;

        debug!(
            len = body.len(),
            content_type = %content_type,
            "API response: {}",
            excerpt(&body, 500)
        );

        inspect_body(&body)
    }
}

#[async_trait]
impl PriceSource for FobClient {
    async fn fetch_prices(
        &self,
        date: NaiveDate,
        max_retries: u32,
    ) -> Result<Vec<PriceRecord>, FetchError> {
        let url = day_url(&self.base_url, date);
        debug!("Requesting {url}");

        let url = url.as_str();
        with_retries(max_retries, &self.retry, |_| self.attempt(url)).await
    }
}

pub fn day_url(base_url: &str, date: NaiveDate) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}Fecha={}", date.format("%d/%m/%Y"))
}

/// Classifies a 200 response body and decodes it when it looks like JSON.
///
/// The upstream answers some failures with an HTML page or a bare
/// `Error ...` line, both with status 200.
pub fn inspect_body(body: &[u8]) -> Result<Vec<PriceRecord>, FetchError> {
    match body.first() {
        None => Err(FetchError::EmptyBody),
        Some(b'<') => Err(FetchError::Html {
            excerpt: excerpt(body, 200),
        }),
        Some(b'E') => Err(FetchError::ErrorText {
            body: String::from_utf8_lossy(body).into_owned(),
        }),
        Some(_) => {
            let decoded = decode_records(body)?;
            debug!(
                shape = ?decoded.shape,
                records = decoded.records.len(),
                "Decoded API response"
            );
            Ok(decoded.records)
        }
    }
}

/// Runs `attempt` with indices `0..=max_retries`, sleeping between
/// transient failures. Terminal errors and the last transient error are
/// returned as is.
pub async fn with_retries<T, F, Fut>(
    max_retries: u32,
    policy: &RetryPolicy,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut i = 0;
    loop {
        match attempt(i).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && i < max_retries => {
                let delay = policy.delay(i);
                warn!(
                    "Retry {}/{}: {e}, waiting {} seconds...",
                    i + 1,
                    max_retries + 1,
                    delay.as_secs()
                );
                sleep(delay).await;
                i += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn excerpt(body: &[u8], max: usize) -> String {
    String::from_utf8_lossy(&body[..body.len().min(max)]).into_owned()
}
