
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::embeddings::EmbeddingProvider;
use crate::{Result, RetrievalError};

const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    base_url: Url,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingObject>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingObject {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.embedding.api_base)
            .map_err(|e| RetrievalError::Config(format!("Invalid embedding API base: {}", e)))?;

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.embedding.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            api_key: config.api_key(),
            model: config.embedding.model.clone(),
            dimension: config.embedding.dimension,
            agent,
            retry_attempts: config.embedding.retry_attempts.max(1),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Override the API key taken from the environment.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn embeddings_url(&self) -> Result<Url> {
        // Url::join treats a base without a trailing slash as a file; keep
        // the configured path prefix intact.
        let mut base = self.base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)
            .and_then(|u| u.join("embeddings"))
            .map_err(|e| RetrievalError::Config(format!("Failed to build embeddings URL: {}", e)))
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.embeddings_url()?;
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RetrievalError::Provider(format!("Failed to serialize request: {}", e)))?;

        let response_text = self.make_request_with_retry(|| {
            let mut builder = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(key) = &self.api_key {
                builder = builder.header("Authorization", &format!("Bearer {}", key));
            }
            builder
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let response: EmbeddingResponse = serde_json::from_str(&response_text)
            .map_err(|e| RetrievalError::Provider(format!("Failed to parse response: {}", e)))?;

        if response.data.len() != texts.len() {
            return Err(RetrievalError::Provider(format!(
                "Provider returned {} embeddings for {} inputs",
                response.data.len(),
                texts.len()
            )));
        }

        // The provider is allowed to reorder entries; `index` is authoritative.
        let mut data = response.data;
        data.sort_by_key(|obj| obj.index);

        let mut embeddings = Vec::with_capacity(data.len());
        for obj in data {
            if obj.embedding.len() != self.dimension {
                return Err(RetrievalError::Provider(format!(
                    "Provider returned dimension {}, configured dimension is {}",
                    obj.embedding.len(),
                    self.dimension
                )));
            }
            embeddings.push(obj.embedding);
        }

        debug!("Received {} embeddings from provider", embeddings.len());
        Ok(embeddings)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> std::result::Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Provider server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                return Err(RetrievalError::Provider(format!(
                                    "Provider rejected request: HTTP {}",
                                    status
                                )));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => {
                            return Err(RetrievalError::Provider(format!(
                                "Non-retryable provider error: {}",
                                error
                            )));
                        }
                    };

                    if should_retry {
                        last_error = Some(RetrievalError::Provider(format!(
                            "Provider request failed: {}",
                            error
                        )));

                        if attempt < self.retry_attempts {
                            let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                            debug!("Waiting {}ms before retry", delay_ms);
                            std::thread::sleep(Duration::from_millis(delay_ms));
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RetrievalError::Provider("Provider request failed after retries".to_string())
        }))
    }
}

impl EmbeddingProvider for OpenAiClient {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        let mut embeddings = self.request_embeddings(&input)?;
        Ok(embeddings.remove(0))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts)
    }
}
