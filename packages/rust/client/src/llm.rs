//! Client for the enrichment (LLM gateway) service.
//!
//! Small HTTP surface: a health probe checked once before a run starts,
//! and a generate call used by every enrichment stage.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use wikiharvest_shared::{HarvestError, Result};

use crate::transport::RetryTransport;

/// Request body for the generate endpoint.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    context: &'a str,
    model: &'a str,
}

/// Response body from the generate endpoint.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    result: String,
}

/// Response body from the health endpoint.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

/// Client for the enrichment service.
#[derive(Debug, Clone)]
pub struct EnrichClient {
    transport: RetryTransport,
    endpoint: Url,
    model: String,
}

impl EnrichClient {
    pub fn new(transport: RetryTransport, mut endpoint: Url, model: impl Into<String>) -> Self {
        // Joins drop the last path segment unless the base ends with '/'.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Self {
            transport,
            endpoint,
            model: model.into(),
        }
    }

    /// Model identifier sent with every generate call.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Probe the service's health endpoint.
    ///
    /// Single attempt, no retry: an unhealthy enrichment service fails the
    /// run before any item work starts.
    #[instrument(skip_all)]
    pub async fn health(&self) -> Result<()> {
        let url = self
            .endpoint
            .join("health")
            .map_err(|e| HarvestError::Enrichment(format!("bad endpoint: {e}")))?;

        let response = self
            .transport
            .client()
            .get(url)
            .send()
            .await
            .map_err(|e| HarvestError::Enrichment(format!("health check failed: {e}")))?;

        if !response.status().is_success() {
            return Err(HarvestError::Enrichment(format!(
                "health check returned HTTP {}",
                response.status()
            )));
        }

        let health: HealthResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Enrichment(format!("invalid health response: {e}")))?;

        if health.status != "ok" {
            return Err(HarvestError::Enrichment(format!(
                "service reported status {:?}",
                health.status
            )));
        }

        debug!("enrichment service healthy");
        Ok(())
    }

    /// Run one generate call with retry. `key` identifies the item/stage in
    /// the error log.
    pub async fn generate(&self, key: &str, prompt: &str, context: &str) -> Result<String> {
        let url = self
            .endpoint
            .join("generate")
            .map_err(|e| HarvestError::Enrichment(format!("bad endpoint: {e}")))?;

        let body = GenerateRequest {
            prompt,
            context,
            model: &self.model,
        };

        let response = self
            .transport
            .execute(key, |client| client.post(url.clone()).json(&body))
            .await?;

        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Enrichment(format!("invalid generate response: {e}")))?;

        Ok(payload.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use wikiharvest_shared::ErrorLog;
    use wiremock::matchers::{body_json_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::transport::RetryPolicy;

    fn test_client(server: &MockServer) -> (PathBuf, EnrichClient) {
        let log_path = std::env::temp_dir().join(format!("wh-llm-{}.log", uuid::Uuid::now_v7()));
        let policy = RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
            exponential_backoff: false,
        };
        let transport = RetryTransport::new(policy, ErrorLog::new(&log_path)).unwrap();
        let endpoint = Url::parse(&server.uri()).unwrap();
        (log_path, EnrichClient::new(transport, endpoint, "llama3.3"))
    }

    #[tokio::test]
    async fn health_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})),
            )
            .mount(&server)
            .await;

        let (log_path, client) = test_client(&server);
        client.health().await.unwrap();

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn health_rejects_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "degraded"})),
            )
            .mount(&server)
            .await;

        let (log_path, client) = test_client(&server);
        let err = client.health().await.unwrap_err();
        assert!(matches!(err, HarvestError::Enrichment(_)));

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn health_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let (log_path, client) = test_client(&server);
        assert!(client.health().await.is_err());

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn generate_sends_model_and_returns_result() {
        let server = MockServer::start().await;
        let expected = serde_json::json!({
            "prompt": "Summarize the following",
            "context": "some content",
            "model": "llama3.3"
        });
        Mock::given(method("POST"))
            .and(path("/generate"))
            .and(body_json_string(expected.to_string()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": "a summary"})),
            )
            .mount(&server)
            .await;

        let (log_path, client) = test_client(&server);
        let result = client
            .generate("42/summarize", "Summarize the following", "some content")
            .await
            .unwrap();
        assert_eq!(result, "a summary");

        let _ = std::fs::remove_file(&log_path);
    }

    #[tokio::test]
    async fn generate_retries_on_overload_then_exhausts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let (log_path, client) = test_client(&server);
        let err = client
            .generate("42/summarize", "Summarize", "ctx")
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Exhausted { attempts: 3 }));

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.lines().count(), 3);
        assert!(log.contains("[42/summarize]"));

        let _ = std::fs::remove_file(&log_path);
    }
}
