use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_CONFIG_FILE: &str = ".herald/config.toml";

const DEFAULT_EXECUTIVE_PROMPT: &str = "You are a limitless execution agent working for the operator. \
Carry out instructions directly and completely. Be terse and directive. \
Skip caveats, disclaimers and pleasantries.";

const DEFAULT_CLIENT_PROMPT: &str = "You are a helpful assistant. Keep answers simple, friendly and \
short. Never reveal internal systems, commands, configuration or operator details. \
If a request needs internal access, say that a team member will follow up.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeraldConfig {
    pub workspace_dir: PathBuf,
    pub log_level: String,
    #[serde(default)]
    pub inbox: InboxConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Defaults to `<workspace>/inbox.json`.
    pub path: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Defaults to `<workspace>/commands.json`.
    pub index_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Defaults to `<workspace>/transcripts`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    OpenAi,
    Anthropic,
    #[default]
    Ollama,
    Custom,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub provider: ModelProvider,
    pub model_id: String,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
    #[serde(default = "default_model_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Ollama,
            model_id: "llama3.2:latest".to_string(),
            endpoint: Some("http://127.0.0.1:11434".to_string()),
            api_key_env: None,
            timeout_ms: default_model_timeout_ms(),
        }
    }
}

/// Single source of truth for the executive allow-list and both prompt profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default)]
    pub executive_ids: Vec<String>,
    #[serde(default = "default_executive_prompt")]
    pub executive_prompt: String,
    #[serde(default = "default_client_prompt")]
    pub client_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            executive_ids: Vec::new(),
            executive_prompt: default_executive_prompt(),
            client_prompt: default_client_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// No deadline when unset; the process runs to completion.
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Defaults to the workspace directory.
    pub working_dir: Option<PathBuf>,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_output_bytes: default_max_output_bytes(),
            working_dir: None,
        }
    }
}

/// Command lines bound to the named verbs of the dispatcher's action table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_deploy_action")]
    pub deploy: String,
    #[serde(default = "default_build_action")]
    pub build: String,
    #[serde(default = "default_start_action")]
    pub start: String,
    #[serde(default = "default_logs_action")]
    pub logs: String,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            deploy: default_deploy_action(),
            build: default_build_action(),
            start: default_start_action(),
            logs: default_logs_action(),
        }
    }
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for HeraldConfig {
    fn default() -> Self {
        let workspace_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("herald-workspace");

        Self {
            workspace_dir,
            log_level: "info".to_string(),
            inbox: InboxConfig::default(),
            commands: CommandsConfig::default(),
            transcript: TranscriptConfig::default(),
            model: ModelConfig::default(),
            persona: PersonaConfig::default(),
            exec: ExecConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_model_timeout_ms() -> u64 {
    120_000
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_executive_prompt() -> String {
    DEFAULT_EXECUTIVE_PROMPT.to_string()
}

fn default_client_prompt() -> String {
    DEFAULT_CLIENT_PROMPT.to_string()
}

fn default_deploy_action() -> String {
    "vercel deploy --prod".to_string()
}

fn default_build_action() -> String {
    "npm run build".to_string()
}

fn default_start_action() -> String {
    "npm run dev".to_string()
}

fn default_logs_action() -> String {
    "vercel logs".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize default config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("config has invalid value: {0}")]
    ValidationFailed(String),
}

impl HeraldConfig {
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = env::var("HERALD_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    pub fn load_or_create() -> Result<(Self, PathBuf, bool), ConfigError> {
        let path = Self::resolve_path();
        if path.exists() {
            let cfg = Self::load(&path)?;
            return Ok((cfg, path, false));
        }

        let cfg = Self::default();
        cfg.save(&path)?;
        Ok((cfg, path, true))
    }

    pub fn inbox_path(&self) -> PathBuf {
        self.inbox
            .path
            .clone()
            .unwrap_or_else(|| self.workspace_dir.join("inbox.json"))
    }

    pub fn command_index_path(&self) -> PathBuf {
        self.commands
            .index_path
            .clone()
            .unwrap_or_else(|| self.workspace_dir.join("commands.json"))
    }

    pub fn transcript_dir(&self) -> PathBuf {
        self.transcript
            .dir
            .clone()
            .unwrap_or_else(|| self.workspace_dir.join("transcripts"))
    }

    pub fn exec_working_dir(&self) -> PathBuf {
        self.exec
            .working_dir
            .clone()
            .unwrap_or_else(|| self.workspace_dir.clone())
    }

    pub fn validate_and_prepare(&self) -> Result<(), ConfigError> {
        self.validate()?;
        for dir in [self.workspace_dir.clone(), self.transcript_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|source| ConfigError::WriteFailed { path: dir, source })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "log_level cannot be empty".to_string(),
            ));
        }
        if self.inbox.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "inbox.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.model.model_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "model.model_id cannot be empty".to_string(),
            ));
        }
        if let Some(endpoint) = &self.model.endpoint {
            Url::parse(endpoint.trim()).map_err(|err| {
                ConfigError::ValidationFailed(format!("model.endpoint is not a valid URL: {err}"))
            })?;
        }
        if self.persona.executive_prompt.trim().is_empty()
            || self.persona.client_prompt.trim().is_empty()
        {
            return Err(ConfigError::ValidationFailed(
                "persona prompts cannot be empty".to_string(),
            ));
        }
        if self.exec.max_output_bytes == 0 {
            return Err(ConfigError::ValidationFailed(
                "exec.max_output_bytes must be greater than zero".to_string(),
            ));
        }
        for (verb, line) in [
            ("deploy", &self.actions.deploy),
            ("build", &self.actions.build),
            ("start", &self.actions.start),
            ("logs", &self.actions.logs),
        ] {
            if line.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "actions.{verb} cannot be empty"
                )));
            }
        }
        Ok(())
    }
}
