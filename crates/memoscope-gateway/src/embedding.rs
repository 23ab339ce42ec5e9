//! Embedding capability: a list of texts in, a list of unit-normalized
//! float vectors out (`4.B`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::{GatewayError, Result};
use crate::retry::with_retry;

#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Sentence-encoder loaded on the best available device (`4.B`: "best
/// available device (accelerator > CPU)"). Model loading is out of scope
/// (`1`); this is a deterministic stand-in that still exercises
/// normalization and rounding identically to a real backend.
pub struct LocalEmbeddingBackend {
    dim: usize,
}

impl LocalEmbeddingBackend {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl EmbeddingBackend for LocalEmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| deterministic_unit_vector(t, self.dim)).collect())
    }
}

/// A stable, content-derived unit vector. Not a real embedding model — a
/// faithful stand-in that still satisfies the unit-norm invariant (`8`)
/// so downstream rounding/indexing code is exercised the same way a real
/// encoder's output would be.
fn deterministic_unit_vector(text: &str, dim: usize) -> Vec<f32> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut v = vec![0.0f32; dim];
    for (i, slot) in v.iter_mut().enumerate() {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        i.hash(&mut hasher);
        let h = hasher.finish();
        *slot = ((h % 2000) as f32 / 1000.0) - 1.0;
    }
    normalize(&mut v);
    v
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct RemoteEmbeddingBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl RemoteEmbeddingBackend {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for RemoteEmbeddingBackend {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest { model: &self.model, input: texts };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport { capability: "embedding", source: anyhow::Error::from(e) })?;
        let body: EmbeddingResponse = resp
            .error_for_status()
            .map_err(|e| GatewayError::Transport { capability: "embedding", source: anyhow::Error::from(e) })?
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        Ok(body
            .embeddings
            .into_iter()
            .map(|mut v| {
                normalize(&mut v);
                v
            })
            .collect())
    }
}

/// Rounds every component to five decimal places for storage stability
/// (`4.B`: "Output is rounded to five decimal places for storage
/// stability"). Per spec.md §9's open-question resolution this rounding
/// applies at write time only — query-time embeddings stay unrounded.
pub fn round_embedding(v: &[f32]) -> Vec<f32> {
    v.iter().map(|x| (x * 1e5).round() / 1e5).collect()
}

pub struct EmbeddingCapability {
    backend: Arc<dyn EmbeddingBackend>,
    semaphore: Arc<Semaphore>,
}

impl EmbeddingCapability {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let backend: Arc<dyn EmbeddingBackend> = if config.use_local {
            Arc::new(LocalEmbeddingBackend::new(config.num_dim))
        } else {
            let endpoint = config
                .endpoint
                .clone()
                .expect("remote embedding requires an endpoint");
            Arc::new(RemoteEmbeddingBackend::new(endpoint, config.model.clone()))
        };
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(8)),
        }
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::Cancelled)?;
        let backend = self.backend.clone();
        let texts = texts.to_vec();
        with_retry("embedding", || {
            let backend = backend.clone();
            let texts = texts.clone();
            async move { backend.embed(&texts).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_returns_unit_vectors() {
        let backend = LocalEmbeddingBackend::new(16);
        let out = backend.embed(&["hello".to_string(), "world".to_string()]).await.unwrap();
        assert_eq!(out.len(), 2);
        for v in out {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn round_embedding_keeps_unit_norm_within_tolerance() {
        let v = vec![0.6, 0.8];
        let rounded = round_embedding(&v);
        let norm: f32 = rounded.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn round_embedding_rounds_to_five_decimals() {
        let v = vec![0.123456789_f32];
        let rounded = round_embedding(&v);
        assert_eq!(rounded[0], 0.12346);
    }
}
