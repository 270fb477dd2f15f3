use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const EXTRACT_PATH: &str = "api/extract-drawing-info";

/// Optional fields read off a drawing photo. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingHints {
    #[serde(default, alias = "drawing_number")]
    pub drawing_number: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "quantity", alias = "item_quantity")]
    pub item_quantity: Option<u32>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl DrawingHints {
    fn normalized(self) -> Self {
        let trimmed = |value: Option<String>| {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            drawing_number: trimmed(self.drawing_number),
            description: trimmed(self.description),
            item_quantity: self.item_quantity.filter(|quantity| *quantity > 0),
            confidence: self.confidence,
        }
    }
}

#[async_trait]
pub trait DrawingRecognizer: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<DrawingHints, InfraError>;
    async fn test_connection(&self) -> Result<bool, InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestDrawingRecognizer {
    client: Client,
    api_url: String,
}

#[derive(Debug, Serialize)]
struct ExtractRequest {
    image: String,
}

impl ReqwestDrawingRecognizer {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> Result<url::Url, InfraError> {
        let base = format!("{}/", self.api_url.trim_end_matches('/'));
        url::Url::parse(&base)
            .and_then(|url| url.join(path))
            .map_err(|error| InfraError::InvalidConfig(format!("invalid recognition api url: {error}")))
    }
}

#[async_trait]
impl DrawingRecognizer for ReqwestDrawingRecognizer {
    async fn extract(&self, image: &[u8]) -> Result<DrawingHints, InfraError> {
        if image.is_empty() {
            return Err(InfraError::Recognition("image must not be empty".to_string()));
        }

        let response = self
            .client
            .post(self.endpoint(EXTRACT_PATH)?)
            .json(&ExtractRequest {
                image: STANDARD.encode(image),
            })
            .send()
            .await
            .map_err(|error| InfraError::Recognition(format!("request failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Recognition(format!("failed reading response: {error}")))?;
        if !status.is_success() {
            return Err(InfraError::Recognition(format!(
                "http {}; body={body}",
                status.as_u16()
            )));
        }

        let hints: DrawingHints = serde_json::from_str(&body)
            .map_err(|error| InfraError::Recognition(format!("invalid payload: {error}; body={body}")))?;
        Ok(hints.normalized())
    }

    async fn test_connection(&self) -> Result<bool, InfraError> {
        match self.client.get(self.endpoint("")?).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(error) => {
                tracing::warn!(api_url = %self.api_url, %error, "recognition api unreachable");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_accept_partial_payloads() {
        let hints: DrawingHints =
            serde_json::from_str(r#"{"drawingNumber":" ABC-123 ","confidence":0.82}"#).expect("parse");
        let hints = hints.normalized();
        assert_eq!(hints.drawing_number.as_deref(), Some("ABC-123"));
        assert_eq!(hints.description, None);
        assert_eq!(hints.item_quantity, None);
    }

    #[test]
    fn zero_quantity_and_blank_text_are_dropped() {
        let hints: DrawingHints =
            serde_json::from_str(r#"{"description":"  ","quantity":0}"#).expect("parse");
        assert_eq!(hints.normalized(), DrawingHints::default());
    }

    #[test]
    fn endpoint_joins_under_api_url() {
        let recognizer = ReqwestDrawingRecognizer::new("http://localhost:3000/");
        assert_eq!(
            recognizer.endpoint(EXTRACT_PATH).expect("endpoint").as_str(),
            "http://localhost:3000/api/extract-drawing-info"
        );
    }

    #[tokio::test]
    async fn empty_image_is_rejected() {
        let recognizer = ReqwestDrawingRecognizer::new("http://localhost:3000");
        assert!(matches!(
            recognizer.extract(&[]).await,
            Err(InfraError::Recognition(_))
        ));
    }
}
