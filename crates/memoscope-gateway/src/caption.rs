//! Caption capability: always remote, a chat-completions-shaped request
//! carrying an inline data-URL image (`4.B`).

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::VlmConfig;
use crate::error::{GatewayError, Result};
use crate::retry::with_retry;

const TEMPERATURE: f64 = 0.1;
const TOP_P: f64 = 0.8;
const REPETITION_PENALTY: f64 = 1.1;
const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    top_p: f64,
    repetition_penalty: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Content {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Bounded-concurrency, retrying caption client.
pub struct CaptionCapability {
    client: reqwest::Client,
    config: VlmConfig,
    semaphore: Arc<Semaphore>,
}

impl CaptionCapability {
    pub fn new(config: VlmConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            client: reqwest::Client::new(),
            config,
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Captions `image_path` using `prompt` (falling back to the
    /// configured default). If `force_jpeg` is set, the image is re-encoded
    /// to JPEG before upload regardless of source format (`4.B`).
    pub async fn caption(&self, image_path: &Path, prompt: Option<&str>) -> Result<String> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GatewayError::Cancelled)?;

        let prompt = prompt.unwrap_or(&self.config.prompt).to_string();
        let data_url = self.encode_image(image_path).await?;

        with_retry("caption", || {
            let data_url = data_url.clone();
            let prompt = prompt.clone();
            async move { self.send(&prompt, &data_url).await }
        })
        .await
    }

    async fn encode_image(&self, image_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image_path).await.map_err(|e| GatewayError::Transport {
            capability: "caption",
            source: anyhow::Error::from(e),
        })?;

        let (bytes, mime) = if self.config.force_jpeg {
            let reencoded = reencode_as_jpeg(&bytes)?;
            (reencoded, "image/jpeg")
        } else {
            (bytes, "image/webp")
        };

        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(format!("data:{mime};base64,{b64}"))
    }

    async fn send(&self, prompt: &str, data_url: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.config.modelname.clone(),
            messages: vec![Message {
                role: "user",
                content: vec![
                    Content::ImageUrl {
                        image_url: ImageUrl { url: data_url.to_string() },
                    },
                    Content::Text { text: prompt.to_string() },
                ],
            }],
            temperature: TEMPERATURE,
            top_p: TOP_P,
            repetition_penalty: REPETITION_PENALTY,
            max_tokens: MAX_TOKENS,
        };

        let mut req = self.client.post(&self.config.endpoint).json(&request);
        if let Some(token) = &self.config.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.map_err(|e| GatewayError::Transport {
            capability: "caption",
            source: anyhow::Error::from(e),
        })?;
        let body: ChatResponse = resp
            .error_for_status()
            .map_err(|e| GatewayError::Transport { capability: "caption", source: anyhow::Error::from(e) })?
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::BadResponse("empty choices array".to_string()))
    }
}

/// Re-encodes arbitrary image bytes as JPEG, used when `force_jpeg` is set
/// regardless of the source container format.
fn reencode_as_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| GatewayError::BadResponse(format!("failed to decode image: {e}")))?;
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Jpeg)
        .map_err(|e| GatewayError::BadResponse(format!("failed to encode jpeg: {e}")))?;
    Ok(out)
}
