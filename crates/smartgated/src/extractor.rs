//! HTTP client for a DeepFace-compatible `/represent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smartgate_core::{Embedding, EmbeddingExtractor, ExtractionError, ImagePayload};

#[derive(Serialize)]
struct RepresentRequest<'a> {
    img: &'a str,
    model_name: &'a str,
}

#[derive(Deserialize)]
struct RepresentResponse {
    #[serde(default)]
    results: Vec<Representation>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct Representation {
    embedding: Vec<f32>,
}

pub struct DeepFaceClient {
    http: reqwest::Client,
    base_url: String,
}

impl DeepFaceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ExtractionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Service(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn represent_url(&self) -> String {
        format!("{}/represent", self.base_url)
    }
}

#[async_trait]
impl EmbeddingExtractor for DeepFaceClient {
    async fn extract(
        &self,
        image: &ImagePayload,
        model: &str,
    ) -> Result<Embedding, ExtractionError> {
        if image.is_empty() {
            return Err(ExtractionError::InvalidImage("empty image payload".into()));
        }

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(self.represent_url())
            .json(&RepresentRequest {
                img: image.as_str(),
                model_name: model,
            })
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport)?;
        tracing::debug!(
            status = status.as_u16(),
            model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "represent call finished"
        );

        parse_represent(status.as_u16(), &body)
    }
}

fn map_transport(err: reqwest::Error) -> ExtractionError {
    if err.is_timeout() {
        ExtractionError::Timeout
    } else {
        ExtractionError::Service(err.to_string())
    }
}

/// Turn a `/represent` reply into the first face's embedding.
fn parse_represent(status: u16, body: &str) -> Result<Embedding, ExtractionError> {
    let parsed: Option<RepresentResponse> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let detail = parsed
            .and_then(|p| p.error)
            .unwrap_or_else(|| body.chars().take(200).collect());
        return Err(match status {
            400 | 422 => ExtractionError::InvalidImage(detail),
            503 => ExtractionError::ModelUnavailable(detail),
            504 => ExtractionError::Timeout,
            _ => ExtractionError::Service(format!("status {status}: {detail}")),
        });
    }

    let parsed = parsed
        .ok_or_else(|| ExtractionError::Service("response is not valid JSON".into()))?;
    let first = parsed
        .results
        .into_iter()
        .next()
        .ok_or(ExtractionError::NoFace)?;
    Embedding::new(first.embedding).map_err(|e| ExtractionError::Service(e.to_string()))
}
