use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use herald_common::{APP_NAME, HeraldConfig, logging};
use herald_core::{ASK_COMMAND, ActionVerb, Actor, DispatchRecord, InboxPayload, PersonaResolver};
use herald_dispatch::{Dispatcher, InboxWatcher, WatchOptions, run_watch_loop};
use herald_transcript::TranscriptLog;
use std::fs;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "herald", about = "Persona-gated command dispatcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate local setup and generate default config and command index if missing.
    Doctor,
    /// Watch the inbox and dispatch each new command once.
    Watch {
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Treat the payload already in the inbox as handled.
        #[arg(long)]
        skip_existing: bool,
        #[arg(long)]
        max_ticks: Option<u64>,
    },
    /// Ask the completion service a question as the given actor.
    Ask {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Run an indexed command or named action immediately.
    Exec {
        key: String,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Print the transcript for today (UTC) or the given day.
    #[command(name = "logs:view")]
    LogsView {
        /// Day to show, YYYY-MM-DD.
        #[arg(long)]
        date: Option<String>,
    },
    /// Show which tier and prompt profile an actor resolves to.
    Persona {
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    /// Inbox operations.
    Inbox {
        #[command(subcommand)]
        command: InboxCommand,
    },
}

#[derive(Debug, Subcommand)]
enum InboxCommand {
    /// Write a command payload for the watcher to pick up.
    Push {
        command: String,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Doctor) => doctor(),
        Some(Command::Watch {
            interval_ms,
            skip_existing,
            max_ticks,
        }) => watch(interval_ms, skip_existing, max_ticks),
        Some(Command::Ask { text, id, role }) => ask(&text.join(" "), Actor::new(id, role)),
        Some(Command::Exec { key, id, role }) => exec(&key, Actor::new(id, role)),
        Some(Command::LogsView { date }) => logs_view(date.as_deref()),
        Some(Command::Persona { id, role }) => persona(Actor::new(id, role)),
        Some(Command::Inbox { command }) => inbox(command),
        None => {
            println!("{APP_NAME} CLI ready.");
            println!("Run `herald doctor` to generate and validate local config.");
            Ok(())
        }
    }
}

fn load_initialized_config() -> Result<HeraldConfig> {
    let (config, _, _) = HeraldConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init(&config.log_level);
    Ok(config)
}

fn load_dispatcher(config: &HeraldConfig) -> Result<Dispatcher> {
    Dispatcher::from_config(config)
        .with_context(|| "dispatcher setup failed; run `herald doctor` to create defaults")
}

fn doctor() -> Result<()> {
    let (config, path, created) = HeraldConfig::load_or_create()?;
    config.validate_and_prepare()?;
    logging::init(&config.log_level);

    let index_path = config.command_index_path();
    let created_index = !index_path.exists();
    if created_index {
        if let Some(parent) = index_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&index_path, "{}\n")
            .with_context(|| format!("failed to write {}", index_path.display()))?;
    }
    let dispatcher = load_dispatcher(&config)?;

    println!("{APP_NAME} doctor: OK");
    println!("config: {}", path.display());
    println!("created_config: {created}");
    println!("workspace: {}", config.workspace_dir.display());
    println!("inbox: {}", config.inbox_path().display());
    println!("command_index: {}", index_path.display());
    println!("created_command_index: {created_index}");
    println!("indexed_commands: {}", dispatcher.command_index().len());
    println!("transcripts: {}", config.transcript_dir().display());
    println!("model_provider: {}", config.model.provider.as_str());
    println!("model_id: {}", config.model.model_id);
    println!("executive_ids: {}", config.persona.executive_ids.len());
    Ok(())
}

fn watch(interval_ms: Option<u64>, skip_existing: bool, max_ticks: Option<u64>) -> Result<()> {
    let config = load_initialized_config()?;
    let dispatcher = load_dispatcher(&config)?;

    let interval_ms = interval_ms.unwrap_or(config.inbox.poll_interval_ms);
    if interval_ms == 0 {
        bail!("--interval-ms must be greater than zero");
    }
    let mut watcher = InboxWatcher::new(config.inbox_path());
    if skip_existing {
        watcher.prime();
    }
    let options = WatchOptions {
        poll_interval: Duration::from_millis(interval_ms),
        max_ticks,
    };

    println!("watch_status: started");
    println!("inbox: {}", watcher.path().display());
    println!("interval_ms: {interval_ms}");
    let shutdown = AtomicBool::new(false);
    let dispatched = run_watch_loop(&mut watcher, &dispatcher, &options, &shutdown, |record| {
        print_record(record);
    });
    println!("watch_status: stopped");
    println!("dispatched: {dispatched}");
    Ok(())
}

fn ask(text: &str, actor: Actor) -> Result<()> {
    if text.trim().is_empty() {
        bail!("question text is required");
    }
    let config = load_initialized_config()?;
    let dispatcher = load_dispatcher(&config)?;

    let record = dispatcher.ask(&actor, text.trim());
    if !record.succeeded() {
        print_record(&record);
        bail!("completion failed");
    }
    println!("{}", record.output);
    Ok(())
}

fn exec(key: &str, actor: Actor) -> Result<()> {
    let config = load_initialized_config()?;
    let dispatcher = load_dispatcher(&config)?;

    let plan = dispatcher.plan(key);
    if !plan.is_known() {
        println!("unknown command: {key}");
        println!("available_commands:");
        for (name, expansion) in dispatcher.command_index().iter() {
            println!("- {name} => {expansion}");
        }
        println!("named_actions:");
        for verb in ActionVerb::all() {
            println!("- {}", verb.as_str());
        }
        bail!("unknown command: {key}");
    }

    let record = dispatcher.run_command(key, &actor);
    print_record(&record);
    if !record.succeeded() {
        bail!("command '{key}' failed");
    }
    Ok(())
}

fn logs_view(date: Option<&str>) -> Result<()> {
    let config = load_initialized_config()?;
    let log = TranscriptLog::new(config.transcript_dir());

    let day = match date {
        Some(raw) => parse_day(raw)?,
        None => TranscriptLog::today(),
    };
    let records = log.read_day(day)?;
    if records.is_empty() {
        println!("no logs found for {}", day.format("%Y-%m-%d"));
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn persona(actor: Actor) -> Result<()> {
    let config = load_initialized_config()?;
    let resolver = PersonaResolver::from_config(&config.persona);

    let profile = resolver.resolve(&actor);
    println!("actor_id: {}", actor.id.as_deref().unwrap_or("<none>"));
    println!("role: {}", actor.effective_role());
    println!("tier: {}", profile.tier.as_str());
    println!("prompt: {}", profile.prompt_text);
    Ok(())
}

fn inbox(command: InboxCommand) -> Result<()> {
    let config = load_initialized_config()?;

    match command {
        InboxCommand::Push {
            command,
            prompt,
            id,
            role,
        } => {
            if command.trim().is_empty() {
                bail!("command is required");
            }
            if prompt.is_some() && !command.trim().eq_ignore_ascii_case(ASK_COMMAND) {
                bail!("--prompt is only used with the `{ASK_COMMAND}` command");
            }
            let path = config.inbox_path();
            let raw = InboxPayload::render(command.trim(), prompt.as_deref(), &Actor::new(id, role));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(&path, &raw).with_context(|| format!("failed to write {}", path.display()))?;
            println!("inbox: {}", path.display());
            println!("payload: {raw}");
        }
    }
    Ok(())
}

fn print_record(record: &DispatchRecord) {
    println!("dispatch_id: {}", record.id);
    println!("status: {}", record.status.as_str());
    println!("input: {}", record.input);
    if let Some(tier) = record.tier {
        println!("tier: {}", tier.as_str());
    }
    println!("resolved: {}", record.resolved);
    if let Some(code) = record.exit_code {
        println!("exit_code: {code}");
    }
    println!("output: {}", record.output);
}

fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}', expected YYYY-MM-DD"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_logs_view_with_colon_name() {
        let cli = Cli::try_parse_from(["herald", "logs:view", "--date", "2026-03-04"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Some(Command::LogsView { date: Some(ref d) }) if d == "2026-03-04"
        ));
    }

    #[test]
    fn ask_joins_words() {
        let cli = Cli::try_parse_from(["herald", "ask", "what", "shipped?", "--id", "ryan"])
            .expect("parse");
        let Some(Command::Ask { text, id, .. }) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(text.join(" "), "what shipped?");
        assert_eq!(id.as_deref(), Some("ryan"));
    }

    #[test]
    fn rejects_bad_day() {
        assert!(parse_day("2026-13-01").is_err());
        assert_eq!(
            parse_day(" 2026-03-04 ").expect("day"),
            NaiveDate::from_ymd_opt(2026, 3, 4).expect("date")
        );
    }
}
