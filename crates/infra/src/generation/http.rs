use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{GenerationError, GenerationService};

/// Remote inference server: `POST {endpoint}` with `{prompt, max_new_tokens}`,
/// answered with WAV bytes.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    prompt: &'a str,
    max_new_tokens: u32,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| GenerationError::ModelUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationService for HttpGenerator {
    async fn generate(&self, prompt: &str, token_budget: u32) -> Result<Vec<u8>, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&InferenceRequest {
                prompt,
                max_new_tokens: token_budget,
            })
            .send()
            .await
            .map_err(|e| GenerationError::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Inference(format!("{status}: {body}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Inference(e.to_string()))?;
        if bytes.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/generate")
    }

    #[tokio::test]
    async fn forwards_prompt_and_budget() {
        let app = Router::new().route(
            "/generate",
            post(|Json(body): Json<Value>| async move {
                format!("{}|{}", body["prompt"].as_str().unwrap(), body["max_new_tokens"])
            }),
        );
        let generator = HttpGenerator::new(spawn(app).await).unwrap();
        let bytes = generator.generate("calm piano", 100).await.unwrap();
        assert_eq!(bytes, b"calm piano|100");
    }

    #[tokio::test]
    async fn server_error_is_inference_failure() {
        let app = Router::new().route(
            "/generate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "CUDA out of memory") }),
        );
        let generator = HttpGenerator::new(spawn(app).await).unwrap();
        let err = generator.generate("x", 1).await.unwrap_err();
        match err {
            GenerationError::Inference(msg) => assert!(msg.contains("CUDA out of memory")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_body_is_empty_output() {
        let app = Router::new().route("/generate", post(|| async { "" }));
        let generator = HttpGenerator::new(spawn(app).await).unwrap();
        assert!(matches!(
            generator.generate("x", 1).await.unwrap_err(),
            GenerationError::EmptyOutput
        ));
    }
}
