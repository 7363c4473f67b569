use directories::BaseDirs;
use llama_core::chat::Persona;
use serde::Deserialize;
use std::{env, fs, path::PathBuf, time::Duration};

pub const DEFAULT_TEMPLATE: &str =
    "{{system}}\n\n{{description}}\n\n{{first_message}}\n\n{{input}}";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LlamaFileConfig {
    pub server_url: Option<String>,
    pub auth_token: Option<String>,
    pub template: Option<String>,
    pub charname: Option<String>,
    pub username: Option<String>,
    pub temperature: Option<f32>,
    pub eps: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f32>,
    pub repeat_last_n: Option<u32>,
    pub max_tokens: Option<u32>,
    pub request_timeout_ms: Option<u64>,
}

/// Sampling parameters, persona names and backend location for the llama.cpp
/// adapter. Owned by the caller; the adapter only reads it.
#[derive(Clone, Debug)]
pub struct LlamaConfig {
    pub base_url: String,
    /// Forwarded verbatim as the `Authorization` header when set.
    pub auth_token: Option<String>,
    pub template: String,
    pub charname: String,
    pub username: String,
    pub temperature: f32,
    pub eps: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub repeat_penalty: f32,
    pub repeat_last_n: u32,
    pub max_tokens: u32,
    /// Bound on waiting for response headers; disarmed once they arrive.
    pub request_timeout: Duration,
}

impl Default for LlamaConfig {
    fn default() -> Self {
        LlamaConfig {
            base_url: "http://127.0.0.1:8888".to_string(),
            auth_token: None,
            template: DEFAULT_TEMPLATE.to_string(),
            charname: "Bot".to_string(),
            username: "User".to_string(),
            temperature: 0.5,
            eps: 1e-6,
            top_p: 0.8,
            top_k: 40,
            repeat_penalty: 1.1,
            repeat_last_n: 256,
            max_tokens: 300,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl LlamaConfig {
    pub fn persona(&self) -> Persona {
        Persona {
            charname: self.charname.clone(),
            username: self.username.clone(),
        }
    }

    pub fn from_env_and_file() -> Self {
        let mut cfg = LlamaConfig::default();
        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(text) = fs::read_to_string(&path) {
                    if let Ok(file_cfg) = toml::from_str::<LlamaFileConfig>(&text) {
                        cfg.apply(file_cfg);
                    }
                }
            }
        }
        if let Ok(url) = env::var("LLAMA_CPP_SERVER_URL") {
            cfg.base_url = url;
        }
        cfg.base_url = normalize_base_url(&cfg.base_url);
        cfg
    }

    fn apply(&mut self, file: LlamaFileConfig) {
        if let Some(v) = file.server_url {
            self.base_url = v;
        }
        if let Some(v) = file.auth_token {
            self.auth_token = Some(v);
        }
        if let Some(v) = file.template {
            self.template = v;
        }
        if let Some(v) = file.charname {
            self.charname = v;
        }
        if let Some(v) = file.username {
            self.username = v;
        }
        if let Some(v) = file.temperature {
            self.temperature = v;
        }
        if let Some(v) = file.eps {
            self.eps = v;
        }
        if let Some(v) = file.top_p {
            self.top_p = v;
        }
        if let Some(v) = file.top_k {
            self.top_k = v;
        }
        if let Some(v) = file.repeat_penalty {
            self.repeat_penalty = v;
        }
        if let Some(v) = file.repeat_last_n {
            self.repeat_last_n = v;
        }
        if let Some(v) = file.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(v);
        }
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".llamachat").join("config.toml")
        } else {
            base.config_dir().join("llamachat").join("config.toml")
        };
        Some(p)
    }
}

/// Same normalization the original proxy applied: default to https when no
/// scheme is given, strip one trailing slash.
pub fn normalize_base_url(url: &str) -> String {
    let mut base = url.trim().to_string();
    if !base.starts_with("http") {
        base = format!("https://{base}");
    }
    if base.ends_with('/') {
        base.pop();
    }
    base
}
