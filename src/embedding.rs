//! Embedding client abstraction and HTTP implementations.
//!
//! [`EmbeddingClient`] is the seam the indexer and search depend on. The
//! HTTP implementation speaks two wire formats:
//! - **openai**: `POST {url}/v1/embeddings`, bearer auth from `OPENAI_API_KEY`
//!   (any OpenAI-compatible server works by pointing `url` at it).
//! - **ollama**: `POST {url}/api/embed`.
//!
//! Vectors are returned exactly as the backend reports them. When
//! `embedding.dims` is configured, a response of a different length is a
//! [`ServiceError::Malformed`] rather than being padded or truncated.
//!
//! Also provides the storage encoding for vectors:
//! - [`vec_to_blob`]: little-endian `f32` bytes
//! - [`blob_to_vec`]: the reverse, rejecting truncated blobs

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result, ServiceError};
use crate::http::{self, RetryPolicy};

const SERVICE: &str = "embedding";

/// Produces fixed-length vectors for text.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier recorded next to every stored vector.
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ServiceError>;

    /// Embed several texts, preserving order. The default calls
    /// [`embed`](EmbeddingClient::embed) once per text.
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    OpenAi,
    Ollama,
}

/// Embedding client for OpenAI-compatible and Ollama servers.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    format: WireFormat,
    model: String,
    endpoint: String,
    api_key: Option<String>,
    dims: Option<usize>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (format, endpoint, api_key) = match config.provider.as_str() {
            "openai" => {
                let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                    RagError::InvalidInput("OPENAI_API_KEY environment variable not set".into())
                })?;
                let base = config.url.as_deref().unwrap_or("https://api.openai.com");
                (
                    WireFormat::OpenAi,
                    format!("{}/v1/embeddings", base.trim_end_matches('/')),
                    Some(api_key),
                )
            }
            "ollama" => {
                let base = config.url.as_deref().unwrap_or("http://localhost:11434");
                (
                    WireFormat::Ollama,
                    format!("{}/api/embed", base.trim_end_matches('/')),
                    None,
                )
            }
            "disabled" => return Err(RagError::Disabled("embedding")),
            other => {
                return Err(RagError::InvalidInput(format!(
                    "unknown embedding provider: {}",
                    other
                )))
            }
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| RagError::InvalidInput("embedding.model is required".into()))?;

        Ok(Self {
            client: http::build_client(config.timeout_secs)?,
            format,
            model,
            endpoint,
            api_key,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            retry: config.retry_policy(),
        })
    }

    async fn request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = http::post_json(
            &self.client,
            SERVICE,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            &self.retry,
        )
        .await?;

        let vectors = match self.format {
            WireFormat::OpenAi => parse_openai_response(&json)?,
            WireFormat::Ollama => parse_ollama_response(&json)?,
        };

        if vectors.len() != texts.len() {
            return Err(ServiceError::malformed(
                SERVICE,
                format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            ));
        }
        for v in &vectors {
            check_dimension(v, self.dims)?;
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ServiceError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ServiceError::malformed(SERVICE, "empty embedding response"))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.request(batch).await?);
        }
        Ok(out)
    }
}

/// Build the configured client. Fails with [`RagError::Disabled`] when the
/// provider is `"disabled"`.
pub fn create_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    Ok(Arc::new(HttpEmbeddingClient::new(config)?))
}

fn check_dimension(
    vector: &[f32],
    expected: Option<usize>,
) -> std::result::Result<(), ServiceError> {
    if vector.is_empty() {
        return Err(ServiceError::malformed(SERVICE, "empty vector"));
    }
    if let Some(dims) = expected {
        if vector.len() != dims {
            return Err(ServiceError::malformed(
                SERVICE,
                format!("expected {} dimensions, got {}", dims, vector.len()),
            ));
        }
    }
    Ok(())
}

fn json_to_vector(value: &Value) -> std::result::Result<Vec<f32>, ServiceError> {
    let array = value
        .as_array()
        .ok_or_else(|| ServiceError::malformed(SERVICE, "embedding is not an array"))?;
    array
        .iter()
        .map(|v| {
            let f = v
                .as_f64()
                .ok_or_else(|| ServiceError::malformed(SERVICE, "non-numeric embedding value"))?
                as f32;
            if f.is_finite() {
                Ok(f)
            } else {
                Err(ServiceError::malformed(
                    SERVICE,
                    format!("embedding value {} is outside the f32 range", v),
                ))
            }
        })
        .collect()
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &Value) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| ServiceError::malformed(SERVICE, "missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);
        indexed.push((index, json_to_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &Value) -> std::result::Result<Vec<Vec<f32>>, ServiceError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing embeddings array"))?
        .iter()
        .map(json_to_vector)
        .collect()
}

/// Encode a vector as a BLOB of little-endian `f32` bytes.
///
/// ```rust
/// use context_rag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob).unwrap(), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(RagError::Integrity(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceErrorKind;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)).unwrap(), vec);
    }

    #[test]
    fn test_blob_is_little_endian() {
        assert_eq!(vec_to_blob(&[1.0]), vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(matches!(
            blob_to_vec(&[0, 0, 128]),
            Err(RagError::Integrity(_))
        ));
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_missing_data_is_malformed() {
        let err = parse_openai_response(&serde_json::json!({"error": "x"})).unwrap_err();
        assert_eq!(err.kind(), ServiceErrorKind::Malformed);
    }

    #[test]
    fn test_parse_ollama() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25, 0.125]]});
        assert_eq!(
            parse_ollama_response(&json).unwrap(),
            vec![vec![0.5, 0.25, 0.125]]
        );
    }

    #[test]
    fn test_non_numeric_value_is_malformed() {
        let json = serde_json::json!({"embeddings": [[0.5, "x"]]});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_dimension_is_checked_not_adjusted() {
        assert!(check_dimension(&[0.1, 0.2, 0.3], Some(3)).is_ok());
        assert!(check_dimension(&[0.1, 0.2, 0.3], None).is_ok());
        let err = check_dimension(&[0.1, 0.2], Some(3)).unwrap_err();
        assert!(err.to_string().contains("expected 3 dimensions"));
        assert!(check_dimension(&[], None).is_err());
    }

    #[test]
    fn test_disabled_provider() {
        let err = create_client(&EmbeddingConfig::default()).err().unwrap();
        assert!(matches!(err, RagError::Disabled("embedding")));
    }

    #[test]
    fn test_enabled_provider_without_model_is_invalid() {
        let cfg = EmbeddingConfig {
            provider: "ollama".to_string(),
            ..EmbeddingConfig::default()
        };
        let err = create_client(&cfg).err().unwrap();
        assert!(matches!(err, RagError::InvalidInput(_)));
    }

    #[test]
    fn test_out_of_range_value_is_malformed() {
        let json: Value = serde_json::from_str(r#"{"embeddings": [[0.5, 1e39]]}"#).unwrap();
        let err = parse_ollama_response(&json).unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
        assert!(err.to_string().contains("outside the f32 range"));
    }

    struct Fixed;

    #[async_trait]
    impl EmbeddingClient for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ServiceError> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn test_default_batch_preserves_order() {
        let texts = vec!["a".to_string(), "bbb".to_string(), "cc".to_string()];
        let out = Fixed.embed_batch(&texts).await.unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![3.0, 1.0], vec![2.0, 1.0]]);
    }
}
