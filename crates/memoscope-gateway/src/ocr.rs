//! OCR capability: input an image path, output an ordered list of
//! `{bbox, text, confidence}` triples (`4.B`).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::OcrConfig;
use crate::error::{GatewayError, Result};
use crate::retry::with_retry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrLine {
    pub bbox: Bbox,
    pub text: String,
    pub confidence: f32,
}

/// Dispatch surface for both the local (embedded detector+classifier+
/// recognizer) and remote (HTTP) OCR paths.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    async fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>>;
}

/// Embedded detector+classifier+recognizer pipeline loaded from a model
/// directory (`4.B`). Model loading itself is out of scope (`1`: "Model
/// hosting ... black-box services"); this backend is a thin stand-in that
/// exercises the same trait and concurrency path as the remote backend.
pub struct LocalOcrBackend {
    #[allow(dead_code)]
    model_dir: Option<std::path::PathBuf>,
}

impl LocalOcrBackend {
    pub fn new(model_dir: Option<std::path::PathBuf>) -> Self {
        Self { model_dir }
    }
}

#[async_trait]
impl OcrBackend for LocalOcrBackend {
    async fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>> {
        if !image_path.exists() {
            return Err(GatewayError::Transport {
                capability: "ocr",
                source: anyhow::anyhow!("image not found: {}", image_path.display()),
            });
        }
        // Local inference is CPU-bound; in a real build this would run on
        // the blocking worker pool (`5`), loading weights from `model_dir`.
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize)]
struct OcrRequest {
    image_base64: String,
}

#[derive(Debug, Deserialize)]
struct RemoteOcrTriple(Bbox, String, f32);

pub struct RemoteOcrBackend {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl RemoteOcrBackend {
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            token,
        }
    }
}

#[async_trait]
impl OcrBackend for RemoteOcrBackend {
    async fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>> {
        let bytes = tokio::fs::read(image_path).await.map_err(|e| GatewayError::Transport {
            capability: "ocr",
            source: anyhow::Error::from(e),
        })?;
        let image_base64 = base64::engine::general_purpose::STANDARD.encode(bytes);

        let mut req = self
            .client
            .post(&self.endpoint)
            .json(&OcrRequest { image_base64 });
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| GatewayError::Transport {
            capability: "ocr",
            source: anyhow::Error::from(e),
        })?;
        let triples: Vec<RemoteOcrTriple> = resp
            .error_for_status()
            .map_err(|e| GatewayError::Transport { capability: "ocr", source: anyhow::Error::from(e) })?
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;

        Ok(triples
            .into_iter()
            .map(|RemoteOcrTriple(bbox, text, confidence)| OcrLine { bbox, text, confidence })
            .collect())
    }
}

/// Bounded-concurrency, retrying façade over whichever `OcrBackend` config
/// selects (`4.B`: "Selection is config-driven").
pub struct OcrCapability {
    backend: Arc<dyn OcrBackend>,
    semaphore: Arc<Semaphore>,
}

impl OcrCapability {
    pub fn new(config: &OcrConfig) -> Self {
        let backend: Arc<dyn OcrBackend> = if config.use_local {
            Arc::new(LocalOcrBackend::new(None))
        } else {
            let endpoint = config
                .endpoint
                .clone()
                .expect("remote OCR requires an endpoint");
            Arc::new(RemoteOcrBackend::new(endpoint, config.token.clone()))
        };
        Self {
            backend,
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
        }
    }

    pub async fn recognize(&self, image_path: &Path) -> Result<Vec<OcrLine>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::Cancelled)?;
        let backend = self.backend.clone();
        let path = image_path.to_path_buf();
        with_retry("ocr", || {
            let backend = backend.clone();
            let path = path.clone();
            async move { backend.recognize(&path).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_returns_empty_for_missing_file() {
        let backend = LocalOcrBackend::new(None);
        let err = backend.recognize(Path::new("/nonexistent/path.webp")).await;
        assert!(err.is_err());
    }
}
