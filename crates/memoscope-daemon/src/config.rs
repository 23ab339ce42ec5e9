//! Configuration loading (`6`): YAML file plus a `MEMOSCOPE_`-prefixed
//! environment overlay, `Option<T>`-field structs with a `Config::default()`
//! fallback, and `default_config_path` resolved via `directories`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub screenshots_dir: Option<PathBuf>,
    #[serde(default = "default_library")]
    pub default_library: String,

    #[serde(default = "default_host")]
    pub server_host: String,
    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default)]
    pub vlm: VlmSection,
    #[serde(default)]
    pub ocr: OcrSection,
    #[serde(default)]
    pub embedding: EmbeddingSection,

    #[serde(default = "default_record_interval")]
    pub record_interval: u64,
    #[serde(default = "default_plugins")]
    pub default_plugins: Vec<String>,
    #[serde(default = "default_batchsize")]
    pub batchsize: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            database_path: None,
            screenshots_dir: None,
            default_library: default_library(),
            server_host: default_host(),
            server_port: default_port(),
            vlm: VlmSection::default(),
            ocr: OcrSection::default(),
            embedding: EmbeddingSection::default(),
            record_interval: default_record_interval(),
            default_plugins: default_plugins(),
            batchsize: default_batchsize(),
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct VlmSection {
    pub modelname: Option<String>,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub concurrency: Option<usize>,
    pub force_jpeg: Option<bool>,
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct OcrSection {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub concurrency: Option<usize>,
    pub use_local: Option<bool>,
    pub force_jpeg: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct EmbeddingSection {
    pub num_dim: Option<usize>,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub use_modelscope: Option<bool>,
    pub use_local: Option<bool>,
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| self.base_dir.join("database.db"))
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.screenshots_dir.clone().unwrap_or_else(|| self.base_dir.join("screenshots"))
    }

    pub fn to_gateway_configs(&self) -> (memoscope_gateway::OcrConfig, memoscope_gateway::VlmConfig, memoscope_gateway::EmbeddingConfig) {
        let mut ocr = memoscope_gateway::OcrConfig::default();
        if let Some(v) = &self.ocr.endpoint { ocr.endpoint = Some(v.clone()); }
        if let Some(v) = &self.ocr.token { ocr.token = Some(v.clone()); }
        if let Some(v) = self.ocr.concurrency { ocr.concurrency = v; }
        if let Some(v) = self.ocr.use_local { ocr.use_local = v; }
        if let Some(v) = self.ocr.force_jpeg { ocr.force_jpeg = v; }

        let mut vlm = memoscope_gateway::VlmConfig::default();
        if let Some(v) = &self.vlm.modelname { vlm.modelname = v.clone(); }
        if let Some(v) = &self.vlm.endpoint { vlm.endpoint = v.clone(); }
        if let Some(v) = &self.vlm.token { vlm.token = Some(v.clone()); }
        if let Some(v) = self.vlm.concurrency { vlm.concurrency = v; }
        if let Some(v) = self.vlm.force_jpeg { vlm.force_jpeg = v; }
        if let Some(v) = &self.vlm.prompt { vlm.prompt = v.clone(); }

        let mut embedding = memoscope_gateway::EmbeddingConfig::default();
        if let Some(v) = self.embedding.num_dim { embedding.num_dim = v; }
        if let Some(v) = &self.embedding.endpoint { embedding.endpoint = Some(v.clone()); }
        if let Some(v) = &self.embedding.model { embedding.model = v.clone(); }
        if let Some(v) = self.embedding.use_modelscope { embedding.use_modelscope = v; }
        if let Some(v) = self.embedding.use_local { embedding.use_local = v; }

        (ocr, vlm, embedding)
    }
}

fn default_base_dir() -> PathBuf {
    ProjectDirs::from("", "", "memoscope")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_library() -> String {
    "default".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8642
}

fn default_record_interval() -> u64 {
    memoscope_capture::DEFAULT_RECORD_INTERVAL_SECS
}

fn default_plugins() -> Vec<String> {
    vec!["builtin_ocr".to_string()]
}

fn default_batchsize() -> usize {
    200
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "memoscope")
        .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
    Ok(dirs.config_dir().join("config.yaml"))
}

/// Loads `path` if present (falling back to `Config::default()` otherwise),
/// then overlays any `MEMOSCOPE_*` environment variables present (`6`:
/// "all with defaults" — env vars are a deploy-time override layer on top
/// of the file).
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)?
    } else {
        Config::default()
    };
    apply_env_overlay(&mut config);
    Ok(config)
}

fn apply_env_overlay(config: &mut Config) {
    if let Ok(v) = std::env::var("MEMOSCOPE_BASE_DIR") {
        config.base_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("MEMOSCOPE_SERVER_HOST") {
        config.server_host = v;
    }
    if let Ok(v) = std::env::var("MEMOSCOPE_SERVER_PORT") {
        if let Ok(port) = v.parse() {
            config.server_port = port;
        }
    }
    if let Ok(v) = std::env::var("MEMOSCOPE_DEFAULT_LIBRARY") {
        config.default_library = v;
    }
    if let Ok(v) = std::env::var("MEMOSCOPE_VLM_ENDPOINT") {
        config.vlm.endpoint = Some(v);
    }
    if let Ok(v) = std::env::var("MEMOSCOPE_OCR_ENDPOINT") {
        config.ocr.endpoint = Some(v);
    }
    if let Ok(v) = std::env::var("MEMOSCOPE_EMBEDDING_ENDPOINT") {
        config.embedding.endpoint = Some(v);
    }
    if let Ok(v) = std::env::var("MEMOSCOPE_RECORD_INTERVAL") {
        if let Ok(secs) = v.parse() {
            config.record_interval = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server_port, 8642);
        assert_eq!(config.record_interval, 4);
        assert_eq!(config.default_plugins, vec!["builtin_ocr".to_string()]);
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let config = load_config(Path::new("/nonexistent/config.yaml")).unwrap();
        assert_eq!(config.default_library, "default");
    }

    #[test]
    fn env_overlay_overrides_file_value() {
        std::env::set_var("MEMOSCOPE_SERVER_PORT", "9999");
        let config = load_config(Path::new("/nonexistent/config.yaml")).unwrap();
        assert_eq!(config.server_port, 9999);
        std::env::remove_var("MEMOSCOPE_SERVER_PORT");
    }
}
