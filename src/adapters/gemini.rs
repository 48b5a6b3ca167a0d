use crate::domain::ports::JsonCompletion;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// `generateContent` 用戶端，要求模型以 JSON 回答
pub struct GeminiClient {
    client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, DEFAULT_MODEL, DEFAULT_API_BASE)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        model: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, self.model)
    }
}

fn response_text(body: &Value) -> Option<&str> {
    body.get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .get(0)?
        .get("text")?
        .as_str()
}

#[async_trait]
impl JsonCompletion for GeminiClient {
    async fn complete_json(&self, prompt: &str) -> Result<Value> {
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"responseMimeType": "application/json"}
        });

        tracing::debug!("Requesting {} ({} prompt chars)", self.model, prompt.chars().count());
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EtlError::MatchingError {
                message: format!("request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EtlError::MatchingError {
                message: format!("service returned {}: {}", status, text),
            });
        }

        let envelope: Value = response.json().await.map_err(|e| EtlError::MatchingError {
            message: format!("response is not JSON: {}", e),
        })?;
        let text = response_text(&envelope).ok_or_else(|| EtlError::MatchingError {
            message: "response has no candidate text".to_string(),
        })?;

        serde_json::from_str(text.trim()).map_err(|e| EtlError::MatchingError {
            message: format!("candidate text is not JSON: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn candidate(text: &str) -> Value {
        json!({
            "candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]
        })
    }

    #[tokio::test]
    async fn test_complete_json_parses_candidate_text() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-2.5-flash:generateContent")
                .query_param("key", "k-123")
                .body_contains("\"responseMimeType\":\"application/json\"");
            then.status(200)
                .json_body(candidate("{\"施設名称\": \"保育施設名\"}"));
        });

        let client = GeminiClient::with_endpoint("k-123", DEFAULT_MODEL, server.base_url());
        let value = client.complete_json("map these").await.unwrap();

        mock.assert();
        assert_eq!(value["施設名称"], "保育施設名");
    }

    #[tokio::test]
    async fn test_non_json_candidate_is_matching_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(candidate("Sure! Here is the mapping"));
        });

        let client = GeminiClient::with_endpoint("k", DEFAULT_MODEL, server.base_url());
        let result = client.complete_json("p").await;
        assert!(matches!(result, Err(EtlError::MatchingError { .. })));
    }

    #[tokio::test]
    async fn test_missing_candidates_and_http_errors_are_matching_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1beta/models/empty:generateContent");
            then.status(200).json_body(json!({"promptFeedback": {}}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/v1beta/models/limited:generateContent");
            then.status(429).body("quota");
        });

        let empty = GeminiClient::with_endpoint("k", "empty", server.base_url());
        assert!(matches!(
            empty.complete_json("p").await,
            Err(EtlError::MatchingError { .. })
        ));

        let limited = GeminiClient::with_endpoint("k", "limited", server.base_url());
        let err = limited.complete_json("p").await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
