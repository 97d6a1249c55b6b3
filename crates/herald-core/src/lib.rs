pub mod command_index;
pub mod persona;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use command_index::{CommandIndex, CommandIndexError, Resolution};
pub use persona::{PersonaProfile, PersonaResolver, Tier};

/// Command key that turns an inbox payload into an agent query when a prompt is attached.
pub const ASK_COMMAND: &str = "ask";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Actor {
    pub fn guest() -> Self {
        Self::default()
    }

    pub fn new(id: Option<String>, role: Option<String>) -> Self {
        Self {
            id: non_empty(id),
            role: non_empty(role),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = non_empty(Some(id.into()));
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = non_empty(Some(role.into()));
        self
    }

    pub fn effective_role(&self) -> &str {
        self.role.as_deref().unwrap_or("guest")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Fixed set of high-level verbs routed to the dispatcher's action table instead of
/// being run as arbitrary command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionVerb {
    Deploy,
    Build,
    Start,
    Logs,
}

impl ActionVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Build => "build",
            Self::Start => "start",
            Self::Logs => "logs",
        }
    }

    pub fn all() -> &'static [ActionVerb] {
        &[Self::Deploy, Self::Build, Self::Start, Self::Logs]
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "deploy" => Some(Self::Deploy),
            "build" => Some(Self::Build),
            "start" => Some(Self::Start),
            "logs" => Some(Self::Logs),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("inbox payload is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("inbox payload has an empty command")]
    EmptyCommand,
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    command: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    actor: Option<Actor>,
}

/// Latest contents of the command inbox. `raw` is the deduplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxPayload {
    pub raw: String,
    pub command_key: String,
    pub actor: Actor,
    pub prompt: Option<String>,
}

impl InboxPayload {
    pub fn parse(raw: impl Into<String>) -> Result<Self, PayloadError> {
        let raw = raw.into();
        let wire: WirePayload = serde_json::from_str(&raw)?;
        let command_key = wire.command.trim().to_string();
        if command_key.is_empty() {
            return Err(PayloadError::EmptyCommand);
        }
        let actor = wire
            .actor
            .map(|a| Actor::new(a.id, a.role))
            .unwrap_or_default();
        Ok(Self {
            raw,
            command_key,
            actor,
            prompt: non_empty(wire.prompt),
        })
    }

    /// Serializes a payload the way the inbox expects it on disk.
    pub fn render(command: &str, prompt: Option<&str>, actor: &Actor) -> String {
        let mut body = serde_json::json!({ "command": command });
        if let Some(prompt) = prompt {
            body["prompt"] = serde_json::Value::String(prompt.to_string());
        }
        if actor.id.is_some() || actor.role.is_some() {
            body["actor"] = serde_json::json!(actor);
        }
        body.to_string()
    }

    /// Returns the question text when this payload is an agent query.
    pub fn query_text(&self) -> Option<&str> {
        if self.command_key.eq_ignore_ascii_case(ASK_COMMAND) {
            self.prompt.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Command,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Success,
    Failure,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// One immutable transcript entry. `resolved` is the executed command line for commands
/// and the system prompt for queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: DispatchKind,
    pub input: String,
    #[serde(default)]
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    pub resolved: String,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub output: String,
}

impl DispatchRecord {
    pub fn new(
        kind: DispatchKind,
        input: impl Into<String>,
        resolved: impl Into<String>,
        status: DispatchStatus,
        output: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            input: input.into(),
            actor: Actor::default(),
            tier: None,
            resolved: resolved.into(),
            status,
            exit_code: None,
            output: output.into(),
        }
    }

    pub fn with_actor(mut self, actor: Actor, tier: Tier) -> Self {
        self.actor = actor;
        self.tier = Some(tier);
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.status == DispatchStatus::Success
    }
}
