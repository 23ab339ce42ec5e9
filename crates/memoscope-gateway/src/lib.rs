//! Uniform async interface to OCR, caption, and embedding back-ends
//! (Component B, `4.B`). Each capability gets its own bounded-concurrency
//! window and the same retry/back-off policy; local-vs-remote selection is
//! config-driven. Process-scoped: constructed once at startup and injected
//! into the Ingestion Pipeline and Capture Loop rather than reached via an
//! implicit global (`9`: "Module-level singletons ... process-scoped
//! services constructed at startup and injected").

pub mod caption;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ocr;
pub mod retry;

pub use config::{EmbeddingConfig, OcrConfig, VlmConfig};
pub use error::{GatewayError, Result};

use std::path::Path;

/// The process-wide handle injected wherever a component needs OCR,
/// caption, or embedding services.
pub struct ModelGateway {
    pub ocr: ocr::OcrCapability,
    pub caption: caption::CaptionCapability,
    pub embedding: embedding::EmbeddingCapability,
}

impl ModelGateway {
    pub fn new(ocr_config: OcrConfig, vlm_config: VlmConfig, embedding_config: EmbeddingConfig) -> Self {
        Self {
            ocr: ocr::OcrCapability::new(&ocr_config),
            caption: caption::CaptionCapability::new(vlm_config),
            embedding: embedding::EmbeddingCapability::new(&embedding_config),
        }
    }

    pub async fn recognize_text(&self, image_path: &Path) -> Result<Vec<ocr::OcrLine>> {
        self.ocr.recognize(image_path).await
    }

    pub async fn caption_image(&self, image_path: &Path, prompt: Option<&str>) -> Result<String> {
        self.caption.caption(image_path, prompt).await
    }

    /// Embeds `texts`, rounding each output vector to five decimals for
    /// storage (`4.B`, spec.md §9).
    pub async fn embed_for_storage(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let raw = self.embedding.embed(texts).await?;
        Ok(raw.iter().map(|v| embedding::round_embedding(v)).collect())
    }

    /// Embeds a single query text unrounded, per spec.md §9's
    /// rounded-at-write/raw-at-query resolution.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embedding.embed(std::slice::from_ref(&text.to_string())).await?;
        Ok(out.pop().unwrap_or_default())
    }
}
