//! chat page configuration: endpoint, credentials, model and sampling.
//!
//! resolution order: built-in defaults, then environment (a `.env` file is
//! loaded first if present), then an optional json overlay named by
//! `CHAT_CONFIG`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::client::{CompletionClient, LlmClient};
use crate::error::ChatError;
use crate::{LLMBackend, LLMBuilder, LLMProvider};

pub const DEFAULT_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";
pub const DEFAULT_MODEL: &str = "meta/llama3-70b-instruct";

pub const ENV_API_KEY: &str = "NVIDIA_API_KEY";
pub const ENV_BASE_URL: &str = "LLM_BASE_URL";
pub const ENV_MODEL: &str = "LLM_MODEL";
pub const ENV_TEMPERATURE: &str = "LLM_TEMPERATURE";
pub const ENV_TOP_P: &str = "LLM_TOP_P";
pub const ENV_MAX_TOKENS: &str = "LLM_MAX_TOKENS";
pub const ENV_CONFIG_FILE: &str = "CHAT_CONFIG";

#[derive(Resource, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// window / page title.
    pub title: String,
    /// label shown in front of assistant responses.
    pub bot_user: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.5,
            top_p: 1.0,
            max_tokens: 1024,
            title: "Demo Chat".to_string(),
            bot_user: "Chat Bot".to_string(),
        }
    }
}

// keep the key out of logs
impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("base_url", &self.base_url)
            .field("key_present", &!self.api_key.is_empty())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("title", &self.title)
            .field("bot_user", &self.bot_user)
            .finish()
    }
}

/// partial config read from a json file; unset fields keep their value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigOverlay {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    title: Option<String>,
    bot_user: Option<String>,
}

impl ChatConfig {
    /// full resolution: `.env`, process environment, `CHAT_CONFIG` overlay.
    pub fn load() -> Result<Self, ChatError> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var(ENV_CONFIG_FILE) {
            config.apply_json_file(path)?;
        }
        config.validate()?;
        info!(target: "bevy_llm_chat", "config loaded: {:?}", config);
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ChatError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(target: "bevy_llm_chat", "loaded env file {}", path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => warn!(target: "bevy_llm_chat", "ignoring unreadable .env: {err}"),
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// builds a config from any key -> value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup(ENV_API_KEY)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                error!(target: "bevy_llm_chat", "{ENV_API_KEY} environment variable not found.");
                ChatError::MissingApiKey
            })?;

        let mut config = Self { api_key, ..Self::default() };
        if let Some(url) = lookup(ENV_BASE_URL) {
            config.base_url = url;
        }
        if let Some(model) = lookup(ENV_MODEL) {
            config.model = model;
        }
        if let Some(v) = parse_setting(&lookup, ENV_TEMPERATURE)? {
            config.temperature = v;
        }
        if let Some(v) = parse_setting(&lookup, ENV_TOP_P)? {
            config.top_p = v;
        }
        if let Some(v) = parse_setting(&lookup, ENV_MAX_TOKENS)? {
            config.max_tokens = v;
        }
        Ok(config)
    }

    /// a complete config from json; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ChatError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn apply_json_file(&mut self, path: impl AsRef<Path>) -> Result<(), ChatError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        self.apply_json_str(&text)?;
        debug!(target: "bevy_llm_chat", "applied config overlay {}", path.as_ref().display());
        Ok(())
    }

    pub fn apply_json_str(&mut self, json: &str) -> Result<(), ChatError> {
        let overlay: ConfigOverlay = serde_json::from_str(json)?;
        let ConfigOverlay { base_url, api_key, model, temperature, top_p, max_tokens, title, bot_user } = overlay;

        if let Some(v) = base_url { self.base_url = v; }
        if let Some(v) = api_key { self.api_key = v; }
        if let Some(v) = model { self.model = v; }
        if let Some(v) = temperature { self.temperature = v; }
        if let Some(v) = top_p { self.top_p = v; }
        if let Some(v) = max_tokens { self.max_tokens = v; }
        if let Some(v) = title { self.title = v; }
        if let Some(v) = bot_user { self.bot_user = v; }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.api_key.trim().is_empty() {
            return Err(ChatError::MissingApiKey);
        }
        if self.model.trim().is_empty() {
            return Err(ChatError::InvalidConfig("model must not be empty".into()));
        }
        if self.base_url.trim().is_empty() {
            return Err(ChatError::InvalidConfig("base_url must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChatError::InvalidConfig(format!(
                "temperature {} outside [0, 2]",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ChatError::InvalidConfig(format!("top_p {} outside (0, 1]", self.top_p)));
        }
        if self.max_tokens == 0 {
            return Err(ChatError::InvalidConfig("max_tokens must be > 0".into()));
        }
        Ok(())
    }

    /// openai-compatible provider for this endpoint.
    pub fn build_provider(&self) -> Result<Arc<dyn LLMProvider>, ChatError> {
        let base_url = normalize_base_url(&self.base_url);
        info!(
            target: "bevy_llm_chat",
            "build_provider: base_url='{}', model='{}', key_present={}",
            base_url, self.model, !self.api_key.is_empty()
        );
        let provider = LLMBuilder::new()
            .backend(LLMBackend::OpenAI)
            .base_url(base_url)
            .api_key(self.api_key.clone())
            .model(self.model.clone())
            .temperature(self.temperature)
            .top_p(self.top_p)
            .max_tokens(self.max_tokens)
            .build()
            .map_err(|err| ChatError::InvalidConfig(format!("provider build failed: {err}")))?;
        Ok(provider.into())
    }

    pub fn client(&self) -> Result<Arc<dyn CompletionClient>, ChatError> {
        Ok(Arc::new(LlmClient::new(self.build_provider()?)))
    }
}

fn parse_setting<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ChatError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ChatError::InvalidSetting { key, value: raw }),
    }
}

/// `https://host`, `https://host/v1` and `https://host/v1/` all become
/// `https://host/v1/`; the provider joins `chat/completions` onto it.
pub fn normalize_base_url(base: &str) -> String {
    let b = base.trim().trim_end_matches('/');
    if b.ends_with("/v1") {
        format!("{b}/")
    } else {
        format!("{b}/v1/")
    }
}
