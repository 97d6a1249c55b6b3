pub mod config;
pub mod logging;

pub const APP_NAME: &str = "HERALD";

pub use config::{
    ActionsConfig, CommandsConfig, ConfigError, ExecConfig, HeraldConfig, InboxConfig,
    ModelConfig, ModelProvider, PersonaConfig, TranscriptConfig,
};
