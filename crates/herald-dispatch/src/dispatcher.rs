use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use herald_common::HeraldConfig;
use herald_completion::{CompletionRequest, CompletionService, HttpCompletionService};
use herald_core::{
    ActionVerb, Actor, CommandIndex, DispatchKind, DispatchRecord, DispatchStatus, InboxPayload,
    PersonaResolver, Resolution,
};
use herald_tools::{ActionTable, ExecContext, ExecResult, run_command_line};
use herald_transcript::TranscriptLog;
use tracing::{info, warn};

/// What a command key turns into before anything runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Named { verb: ActionVerb, command: String },
    Expanded(String),
    PassThrough(String),
}

impl PlannedAction {
    pub fn command(&self) -> &str {
        match self {
            Self::Named { command, .. } | Self::Expanded(command) | Self::PassThrough(command) => {
                command
            }
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::PassThrough(_))
    }
}

/// Resolves and executes inbox payloads, one at a time, and records every outcome.
///
/// This is the only component that launches processes or calls the completion service.
pub struct Dispatcher {
    index: CommandIndex,
    personas: PersonaResolver,
    actions: ActionTable,
    exec: ExecContext,
    completion: Arc<dyn CompletionService>,
    transcript: TranscriptLog,
    in_flight: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        index: CommandIndex,
        personas: PersonaResolver,
        actions: ActionTable,
        exec: ExecContext,
        completion: Arc<dyn CompletionService>,
        transcript: TranscriptLog,
    ) -> Self {
        Self {
            index,
            personas,
            actions,
            exec,
            completion,
            transcript,
            in_flight: Mutex::new(()),
        }
    }

    /// Loads the command index and builds every collaborator from config. Any failure here is
    /// a startup configuration error.
    pub fn from_config(config: &HeraldConfig) -> Result<Self> {
        let index_path = config.command_index_path();
        let index = CommandIndex::load(&index_path)?;
        let completion = HttpCompletionService::from_config(&config.model)
            .with_context(|| "failed to configure completion service")?;
        info!(
            commands = index.len(),
            index = %index_path.display(),
            "dispatcher ready"
        );
        Ok(Self::new(
            index,
            PersonaResolver::from_config(&config.persona),
            ActionTable::from_config(&config.actions),
            ExecContext::from_config(config),
            Arc::new(completion),
            TranscriptLog::new(config.transcript_dir()),
        ))
    }

    pub fn command_index(&self) -> &CommandIndex {
        &self.index
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn plan(&self, command_key: &str) -> PlannedAction {
        let resolution = self.index.resolve(command_key);
        if let Some(verb) = ActionVerb::parse(resolution.command()) {
            return PlannedAction::Named {
                verb,
                command: self.actions.command_for(verb).to_string(),
            };
        }
        match resolution {
            Resolution::Mapped(command) => PlannedAction::Expanded(command),
            Resolution::PassThrough(command) => PlannedAction::PassThrough(command),
        }
    }

    /// Handles one inbox payload: an agent query when it is `ask` with a prompt, otherwise a
    /// command. Failures are captured in the returned record.
    pub fn dispatch(&self, payload: &InboxPayload) -> DispatchRecord {
        match payload.query_text() {
            Some(text) => self.ask(&payload.actor, text),
            None => self.run_command(&payload.command_key, &payload.actor),
        }
    }

    pub fn run_command(&self, command_key: &str, actor: &Actor) -> DispatchRecord {
        let _exclusive = self.exclusive();
        let tier = self.personas.tier(actor);
        let plan = self.plan(command_key);
        info!(
            key = command_key,
            command = plan.command(),
            tier = tier.as_str(),
            "dispatching command"
        );

        let outcome = match &plan {
            PlannedAction::Named { verb, .. } => self.actions.run(*verb, &self.exec),
            PlannedAction::Expanded(command) | PlannedAction::PassThrough(command) => {
                run_command_line(command, &self.exec)
            }
        };

        let record = match outcome {
            Ok(result) => command_record(command_key, &plan, &result),
            Err(err) => {
                warn!(key = command_key, error = %format!("{err:#}"), "command failed to start");
                DispatchRecord::new(
                    DispatchKind::Command,
                    command_key,
                    plan.command(),
                    DispatchStatus::Failure,
                    format!("{err:#}"),
                )
            }
        };
        self.record(record.with_actor(actor.clone(), tier))
    }

    pub fn ask(&self, actor: &Actor, text: &str) -> DispatchRecord {
        let _exclusive = self.exclusive();
        let persona = self.personas.resolve(actor);
        info!(
            role = actor.effective_role(),
            tier = persona.tier.as_str(),
            "dispatching query"
        );

        let request = CompletionRequest::new(persona.prompt_text.clone(), text);
        let record = match self.completion.complete(&request) {
            Ok(response) => DispatchRecord::new(
                DispatchKind::Query,
                text,
                persona.prompt_text,
                DispatchStatus::Success,
                response.text,
            ),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "completion service call failed");
                DispatchRecord::new(
                    DispatchKind::Query,
                    text,
                    persona.prompt_text,
                    DispatchStatus::Failure,
                    format!("{err:#}"),
                )
            }
        };
        self.record(record.with_actor(actor.clone(), persona.tier))
    }

    fn exclusive(&self) -> std::sync::MutexGuard<'_, ()> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, record: DispatchRecord) -> DispatchRecord {
        if let Err(err) = self.transcript.append(&record) {
            warn!(
                dir = %self.transcript.dir().display(),
                error = %format!("{err:#}"),
                "transcript append failed; dispatch result not persisted"
            );
        }
        record
    }
}

fn command_record(command_key: &str, plan: &PlannedAction, result: &ExecResult) -> DispatchRecord {
    let status = if result.success() {
        DispatchStatus::Success
    } else {
        DispatchStatus::Failure
    };
    if !result.success() {
        warn!(
            key = command_key,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            "command finished unsuccessfully"
        );
    }
    DispatchRecord::new(
        DispatchKind::Command,
        command_key,
        plan.command(),
        status,
        result.merged_output(),
    )
    .with_exit_code(result.exit_code)
}
