use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const CONFIG_FILE: &str = ".dumbydraw_config.json";

pub const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1/";
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3";

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a Python plotting code generator. Reply with code only, wrapped in a single \
```python fenced block, and nothing outside it.
Do not use `if __name__ == \"__main__\"`. Do not call plt.close() at the end; finish with \
a single plt.show() so every figure is displayed, even when images are also saved.
Use English for titles, labels and legends unless the user asks for another language or font.
Write code comments in the language of the user's request.
Mention in a comment any package that may need to be installed.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "baseurl")]
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    /// Runtime that executes generated scripts.
    pub interpreter: PathBuf,
    pub script_suffix: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: Option<u64>,
    pub execution_timeout_secs: Option<u64>,
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            api_key: String::new(),
            interpreter: default_interpreter(),
            script_suffix: ".py".into(),
            poll_interval_ms: 100,
            request_timeout_secs: None,
            execution_timeout_secs: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}

fn default_interpreter() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("python")
    } else {
        PathBuf::from("python3")
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf, AppError> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE))
            .ok_or_else(|| AppError::Config("cannot locate home directory".into()))
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        // Older files hold empty strings for unset fields.
        let mut config: Config = serde_json::from_str(&raw)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
        if config.base_url.is_empty() {
            config.base_url = DEFAULT_BASE_URL.into();
        }
        if config.model.is_empty() {
            config.model = DEFAULT_MODEL.into();
        }
        Ok(config)
    }

    /// Load `path`, writing a default file first if there is none.
    pub fn load_or_init(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default config");
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DUMBYDRAW_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = lookup("DUMBYDRAW_MODEL") {
            self.model = model;
        }
        if let Some(key) = lookup("DUMBYDRAW_API_KEY") {
            self.api_key = key;
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.api_key.is_empty() {
            let tail: String = config
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            config.api_key = format!("****{tail}");
        }
        config
    }
}
