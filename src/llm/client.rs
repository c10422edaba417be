//! Thin typed client for the provider's Responses and Files endpoints.
//!
//! Errors are classified into the three categories the retry policy cares
//! about: rate limits (parseable wait hint), transient server trouble
//! (retry with backoff), and fatal request errors (give up for the turn).

use reqwest::multipart;
use std::path::Path;
use thiserror::Error;

use crate::llm::types::{CreateResponseRequest, OutputItem, ProviderResponse, UploadedFile};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {message}")]
    RateLimit { message: String },

    #[error("transient provider error: {message}")]
    Transient { message: String },

    #[error("provider error (status {status:?}): {message}")]
    Fatal { status: Option<u16>, message: String },
}

impl ProviderError {
    fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            ProviderError::Transient {
                message: error.to_string(),
            }
        } else {
            ProviderError::Fatal {
                status: error.status().map(|s| s.as_u16()),
                message: error.to_string(),
            }
        }
    }
}

/// Client for the LLM provider. Cheap to clone; holds a pooled HTTP client.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ProviderClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Reads `OPENAI_API_KEY` from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            anyhow::anyhow!(
                "OPENAI_API_KEY is not set. Please set it in the environment before running."
            )
        })?;
        Ok(Self::new(api_key))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Creates a model response.
    pub async fn create_response(
        &self,
        request: &CreateResponseRequest,
    ) -> Result<ProviderResponse, ProviderError> {
        let response = self
            .http
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(ProviderError::from_transport)?;

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        let id = body["id"]
            .as_str()
            .ok_or_else(|| ProviderError::Fatal {
                status: None,
                message: "response body is missing an id".to_string(),
            })?
            .to_string();
        let output: Vec<OutputItem> = serde_json::from_value(body["output"].clone())
            .map_err(|e| ProviderError::Fatal {
                status: None,
                message: format!("could not parse response output: {e}"),
            })?;

        Ok(ProviderResponse {
            id,
            output,
            raw: body,
        })
    }

    /// Uploads a local file for the model to see; returns the provider file.
    pub async fn upload_file(
        &self,
        path: &Path,
        purpose: &str,
    ) -> Result<UploadedFile, ProviderError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| ProviderError::Fatal {
            status: None,
            message: format!("could not read '{}': {e}", path.display()),
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());

        let form = multipart::Form::new()
            .text("purpose", purpose.to_string())
            .part("file", multipart::Part::bytes(bytes).file_name(filename));

        let response = self
            .http
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(ProviderError::from_transport)?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        serde_json::from_value(body).map_err(|e| ProviderError::Fatal {
            status: None,
            message: format!("could not parse file upload response: {e}"),
        })
    }

    /// Deletes a previously uploaded file.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .delete(format!("{}/files/{file_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }
        Ok(())
    }
}

/// Maps an HTTP status + error body onto the retry taxonomy.
fn classify_status(status: u16, body: &serde_json::Value) -> ProviderError {
    let message = body["error"]["message"]
        .as_str()
        .unwrap_or("no error message provided")
        .to_string();

    if status == 429 {
        ProviderError::RateLimit { message }
    } else if status >= 500 {
        ProviderError::Transient { message }
    } else {
        ProviderError::Fatal {
            status: Some(status),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        let body = json!({"error": {"message": "Please try again in 2s."}});
        assert!(matches!(
            classify_status(429, &body),
            ProviderError::RateLimit { .. }
        ));
        assert!(matches!(
            classify_status(500, &body),
            ProviderError::Transient { .. }
        ));
        assert!(matches!(
            classify_status(503, &body),
            ProviderError::Transient { .. }
        ));
        match classify_status(400, &body) {
            ProviderError::Fatal { status, message } => {
                assert_eq!(status, Some(400));
                assert!(message.contains("try again"));
            }
            other => panic!("expected fatal, got {other:?}"),
        }
    }
}
