//! Client for an OpenAI-compatible completion/embedding server
//! (Ollama, LM Studio, llama.cpp server, hosted APIs).

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::LlmConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("unexpected response from {endpoint}: {detail}")]
    Malformed {
        endpoint: &'static str,
        detail: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    id: String,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|source| LlmError::Transport {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self {
            base_url,
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_json(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
        url: String,
    ) -> Result<Value, LlmError> {
        let res = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| LlmError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                endpoint,
                status,
                body,
            });
        }

        res.json::<Value>()
            .await
            .map_err(|source| LlmError::Transport { url, source })
    }

    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = self.url("models");
        let payload = self
            .send_json("models", self.client.get(&url), url)
            .await?;
        let parsed: ModelsResponse =
            serde_json::from_value(payload).map_err(|e| LlmError::Malformed {
                endpoint: "models",
                detail: e.to_string(),
            })?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f64>,
        max_tokens: Option<u32>,
    ) -> Result<String, LlmError> {
        let url = self.url("chat/completions");
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
            if let Some(m) = max_tokens {
                obj.insert("max_tokens".to_string(), json!(m));
            }
        }

        let payload = self
            .send_json("chat/completions", self.client.post(&url).json(&body), url)
            .await?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmError::Malformed {
                endpoint: "chat/completions",
                detail: "missing choices[0].message.content".to_string(),
            })
    }

    /// One embedding per input, in input order.
    pub async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url("embeddings");
        let body = json!({ "model": model, "input": inputs });
        let payload = self
            .send_json("embeddings", self.client.post(&url).json(&body), url)
            .await?;

        parse_embeddings(&payload, inputs.len())
    }
}

fn parse_embeddings(payload: &Value, expected: usize) -> Result<Vec<Vec<f32>>, LlmError> {
    let malformed = |detail: String| LlmError::Malformed {
        endpoint: "embeddings",
        detail,
    };

    let data = payload["data"]
        .as_array()
        .ok_or_else(|| malformed("missing data array".to_string()))?;

    let mut rows: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item["index"]
            .as_u64()
            .map(|i| i as usize)
            .unwrap_or(position);
        let values = item["embedding"]
            .as_array()
            .ok_or_else(|| malformed(format!("item {} has no embedding", position)))?;
        let vector = values
            .iter()
            .map(|v| {
                v.as_f64().map(|f| f as f32).ok_or_else(|| {
                    malformed(format!("item {} has a non-numeric component", position))
                })
            })
            .collect::<Result<Vec<f32>, _>>()?;
        rows.push((index, vector));
    }

    if rows.len() != expected {
        return Err(malformed(format!(
            "expected {} embeddings, got {}",
            expected,
            rows.len()
        )));
    }

    rows.sort_by_key(|(index, _)| *index);
    Ok(rows.into_iter().map(|(_, vector)| vector).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embeddings_are_reordered_by_index() {
        let payload = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });

        let vectors = parse_embeddings(&payload, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn embedding_count_mismatch_is_malformed() {
        let payload = json!({"data": [{"embedding": [1.0]}]});
        let err = parse_embeddings(&payload, 2).unwrap_err();
        assert!(matches!(err, LlmError::Malformed { endpoint: "embeddings", .. }));
    }

    #[test]
    fn non_numeric_embedding_component_is_malformed() {
        let payload = json!({"data": [{"index": 0, "embedding": [0.5, "nan", 1.0]}]});
        let err = parse_embeddings(&payload, 1).unwrap_err();
        match err {
            LlmError::Malformed { endpoint, detail } => {
                assert_eq!(endpoint, "embeddings");
                assert!(detail.contains("non-numeric"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let config = LlmConfig {
            base_url: "http://localhost:1234/".to_string(),
            api_key: Some("  ".to_string()),
            ..LlmConfig::default()
        };
        let client = OpenAiCompatClient::new(&config).unwrap();
        assert!(client.api_key.is_none());
        assert_eq!(client.url("models"), "http://localhost:1234/v1/models");
    }
}
