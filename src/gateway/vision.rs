use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

use super::{Credentials, LabelDetector};
use crate::{
    config::Config,
    error::GatewayError,
    models::{AnnotationResult, Label},
};

/// Google Cloud Vision `images:annotate` client asking for `LABEL_DETECTION`.
pub struct VisionClient {
    http: reqwest::Client,
    endpoint: String,
    credentials: Credentials,
    max_labels: u32,
}

impl VisionClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        credentials: Credentials,
        max_labels: u32,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            credentials,
            max_labels,
        }
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self, GatewayError> {
        let credentials = Credentials::load(&config.credentials, http.clone())?;
        Ok(Self::new(
            http,
            config.vision_endpoint.clone(),
            credentials,
            config.max_labels,
        ))
    }
}

#[async_trait]
impl LabelDetector for VisionClient {
    async fn detect_labels(&self, image: &[u8]) -> Result<AnnotationResult, GatewayError> {
        let url = format!("{}/v1/images:annotate", self.endpoint);
        let payload = serde_json::json!({
            "requests": [{
                "image": {
                    "content": general_purpose::STANDARD.encode(image)
                },
                "features": [{
                    "type": "LABEL_DETECTION",
                    "maxResults": self.max_labels
                }]
            }]
        });

        tracing::debug!(bytes = image.len(), "sending label detection request");
        let request = self
            .credentials
            .authorize(self.http.post(&url).json(&payload))
            .await?;
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::debug!(%status, body = %truncate(&body), "label service error");
            return Err(GatewayError::from_status(status.as_u16(), error_message(&body)));
        }

        parse_annotate_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    label_annotations: Vec<EntityAnnotation>,
    error: Option<RpcStatus>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct RpcStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: RpcStatus,
}

fn parse_annotate_response(body: &str) -> Result<AnnotationResult, GatewayError> {
    let response: AnnotateResponse = serde_json::from_str(body)
        .map_err(|err| GatewayError::InvalidResponse(err.to_string()))?;

    let image = response
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::InvalidResponse("empty responses array".to_string()))?;

    if let Some(error) = image
        .error
        .filter(|error| error.code != 0 || !error.message.is_empty())
    {
        return Err(GatewayError::InvalidImage(error.message));
    }

    Ok(image
        .label_annotations
        .into_iter()
        .map(|label| Label::new(label.description, label.score))
        .collect())
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|body| body.error.message)
        .unwrap_or_else(|_| truncate(body))
}

fn truncate(body: &str) -> String {
    body.chars().take(500).collect()
}
