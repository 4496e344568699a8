use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use super::Translator;
use crate::core::config::TranslatorConfig;
use crate::core::errors::{TranslationError, TranslationResult};
use crate::core::types::TranslationRequest;
use crate::utils::Metrics;

/// HTTP translation client. Posts `{from, to, text}` as JSON and expects
/// `{"text": "..."}` back.
pub struct HttpTranslator {
    endpoint: String,
    http_client: reqwest::Client,
    metrics: Option<Metrics>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    text: String,
}

impl HttpTranslator {
    pub fn new(config: &TranslatorConfig, metrics: Option<Metrics>) -> TranslationResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            http_client,
            metrics,
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    #[instrument(skip(self, request), fields(from = %request.from, to = %request.to))]
    async fn translate(&self, request: TranslationRequest) -> TranslationResult<String> {
        let start = Instant::now();
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "translation endpoint rejected request");
            if let Some(metrics) = &self.metrics {
                metrics.record_translation_error();
            }
            return Err(TranslationError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslationError::InvalidResponse(e.to_string()))?;

        if let Some(metrics) = &self.metrics {
            metrics.record_translation(start.elapsed());
        }
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "translated");
        Ok(body.text)
    }
}
