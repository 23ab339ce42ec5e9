use serde::Deserialize;

/// VLM (caption) config (`6`: "vlm: {modelname, endpoint, token,
/// concurrency=8, force_jpeg=true, prompt}").
#[derive(Debug, Clone, Deserialize)]
pub struct VlmConfig {
    pub modelname: String,
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub force_jpeg: bool,
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            modelname: "qwen2-vl".to_string(),
            endpoint: "http://127.0.0.1:8088/v1/chat/completions".to_string(),
            token: None,
            concurrency: default_concurrency(),
            force_jpeg: true,
            prompt: default_prompt(),
        }
    }
}

fn default_prompt() -> String {
    "Describe this screenshot in detail, including any visible text, application, and context."
        .to_string()
}

/// OCR config (`6`: "ocr: {endpoint, token, concurrency=8, use_local=true,
/// force_jpeg=false}").
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_true")]
    pub use_local: bool,
    #[serde(default)]
    pub force_jpeg: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            concurrency: default_concurrency(),
            use_local: true,
            force_jpeg: false,
        }
    }
}

/// Embedding config (`6`: "embedding: {num_dim=768, endpoint, model,
/// use_modelscope=false, use_local=true}").
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_num_dim")]
    pub num_dim: usize,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub use_modelscope: bool,
    #[serde(default = "default_true")]
    pub use_local: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            num_dim: default_num_dim(),
            endpoint: None,
            model: default_embedding_model(),
            use_modelscope: false,
            use_local: true,
        }
    }
}

fn default_num_dim() -> usize {
    768
}

fn default_embedding_model() -> String {
    "jinaai/jina-embeddings-v2-base-en".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_true() -> bool {
    true
}
