#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use herald_common::ActionsConfig;
use herald_completion::{CompletionRequest, CompletionResponse, CompletionService};
use herald_core::{
    Actor, CommandIndex, DispatchKind, DispatchStatus, InboxPayload, PersonaResolver, Tier,
};
use herald_dispatch::{Dispatcher, InboxWatcher, WatchOptions, run_watch_loop};
use herald_tools::{ActionTable, ExecContext};
use herald_transcript::TranscriptLog;
use tempfile::tempdir;

const EXEC_PROMPT: &str = "limitless execution agent";
const CLIENT_PROMPT: &str = "helpful assistant";

#[derive(Default)]
struct RecordingCompletion {
    calls: Mutex<Vec<CompletionRequest>>,
    fail: bool,
}

impl CompletionService for RecordingCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.clone());
        if self.fail {
            bail!("backend unavailable");
        }
        Ok(CompletionResponse {
            text: format!("answer to: {}", request.user_prompt),
        })
    }
}

fn build_dispatcher(root: &Path, completion: Arc<RecordingCompletion>) -> Dispatcher {
    let index = CommandIndex::from_entries([("greet", "echo hello from index")]).expect("index");
    let actions = ActionTable::from_config(&ActionsConfig {
        deploy: "echo deploy-complete".to_string(),
        build: "echo build-complete".to_string(),
        start: "echo start-complete".to_string(),
        logs: "echo logs-complete".to_string(),
    });
    Dispatcher::new(
        index,
        PersonaResolver::new(["ryan"], EXEC_PROMPT, CLIENT_PROMPT),
        actions,
        ExecContext::for_dir(root.to_path_buf()),
        completion,
        TranscriptLog::new(root.join("transcripts")),
    )
}

fn ticks(max: u64) -> WatchOptions {
    WatchOptions {
        poll_interval: Duration::from_millis(10),
        max_ticks: Some(max),
    }
}

#[test]
fn deploy_payload_runs_named_action_and_logs_success() {
    let tmp = tempdir().expect("tempdir");
    let dispatcher = build_dispatcher(tmp.path(), Arc::default());
    let inbox = tmp.path().join("inbox.json");
    fs::write(&inbox, r#"{"command":"deploy"}"#).expect("write inbox");

    let mut watcher = InboxWatcher::new(&inbox);
    let mut seen = Vec::new();
    let dispatched = run_watch_loop(
        &mut watcher,
        &dispatcher,
        &ticks(3),
        &AtomicBool::new(false),
        |record| seen.push(record.clone()),
    );

    assert_eq!(dispatched, 1);
    let record = &seen[0];
    assert_eq!(record.kind, DispatchKind::Command);
    assert_eq!(record.input, "deploy");
    assert_eq!(record.resolved, "echo deploy-complete");
    assert_eq!(record.status, DispatchStatus::Success);
    assert_eq!(record.output.trim(), "deploy-complete");

    let logged = dispatcher.transcript().read_today().expect("read log");
    assert_eq!(logged, seen);
}

#[test]
fn unknown_key_passes_through_and_failure_is_logged() {
    let tmp = tempdir().expect("tempdir");
    let dispatcher = build_dispatcher(tmp.path(), Arc::default());
    let payload = InboxPayload::parse(r#"{"command":"launch-the-thing"}"#).expect("payload");

    let record = dispatcher.dispatch(&payload);

    assert_eq!(record.status, DispatchStatus::Failure);
    assert_eq!(record.resolved, "launch-the-thing");
    assert!(record.output.contains("failed to spawn"));
    assert_eq!(record.exit_code, None);

    // The dispatcher keeps working after a failed dispatch.
    let next = dispatcher.dispatch(&InboxPayload::parse(r#"{"command":"greet"}"#).expect("p"));
    assert!(next.succeeded());
    assert_eq!(next.output.trim(), "hello from index");
    assert_eq!(dispatcher.transcript().read_today().expect("read").len(), 2);
}

#[test]
fn allow_listed_actor_query_uses_executive_prompt() {
    let tmp = tempdir().expect("tempdir");
    let completion = Arc::new(RecordingCompletion::default());
    let dispatcher = build_dispatcher(tmp.path(), completion.clone());

    let record = dispatcher.ask(&Actor::guest().with_id("ryan"), "what shipped?");

    assert_eq!(record.kind, DispatchKind::Query);
    assert_eq!(record.tier, Some(Tier::Executive));
    assert_eq!(record.output, "answer to: what shipped?");
    let calls = completion.calls.lock().expect("calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].system_prompt, EXEC_PROMPT);
    assert_eq!(calls[0].user_prompt, "what shipped?");
}

#[test]
fn anonymous_query_from_inbox_uses_client_prompt() {
    let tmp = tempdir().expect("tempdir");
    let completion = Arc::new(RecordingCompletion::default());
    let dispatcher = build_dispatcher(tmp.path(), completion.clone());
    let payload =
        InboxPayload::parse(r#"{"command":"ask","prompt":"how do I sign up?"}"#).expect("payload");

    let record = dispatcher.dispatch(&payload);

    assert_eq!(record.tier, Some(Tier::Client));
    assert_eq!(record.resolved, CLIENT_PROMPT);
    let calls = completion.calls.lock().expect("calls");
    assert_eq!(calls[0].system_prompt, CLIENT_PROMPT);
}

#[test]
fn admin_role_query_uses_executive_prompt() {
    let tmp = tempdir().expect("tempdir");
    let completion = Arc::new(RecordingCompletion::default());
    let dispatcher = build_dispatcher(tmp.path(), completion.clone());

    let record = dispatcher.ask(&Actor::guest().with_role("admin"), "status");
    assert_eq!(record.tier, Some(Tier::Executive));
}

#[test]
fn completion_error_is_captured_once_without_retry() {
    let tmp = tempdir().expect("tempdir");
    let completion = Arc::new(RecordingCompletion {
        fail: true,
        ..RecordingCompletion::default()
    });
    let dispatcher = build_dispatcher(tmp.path(), completion.clone());

    let record = dispatcher.ask(&Actor::guest(), "hello?");

    assert_eq!(record.status, DispatchStatus::Failure);
    assert!(record.output.contains("backend unavailable"));
    assert_eq!(completion.calls.lock().expect("calls").len(), 1);
}

#[test]
fn identical_writes_within_one_interval_dispatch_once() {
    let tmp = tempdir().expect("tempdir");
    let dispatcher = build_dispatcher(tmp.path(), Arc::default());
    let inbox = tmp.path().join("inbox.json");
    let mut watcher = InboxWatcher::new(&inbox);

    fs::write(&inbox, r#"{"command":"build"}"#).expect("first write");
    fs::write(&inbox, r#"{"command":"build"}"#).expect("second write");
    let first = run_watch_loop(
        &mut watcher,
        &dispatcher,
        &ticks(2),
        &AtomicBool::new(false),
        |_| {},
    );
    fs::write(&inbox, r#"{"command":"build"}"#).expect("third write");
    let second = run_watch_loop(
        &mut watcher,
        &dispatcher,
        &ticks(2),
        &AtomicBool::new(false),
        |_| {},
    );

    assert_eq!(first + second, 1);
    assert_eq!(dispatcher.transcript().read_today().expect("read").len(), 1);
}

#[test]
fn raised_shutdown_flag_stops_before_polling() {
    let tmp = tempdir().expect("tempdir");
    let dispatcher = build_dispatcher(tmp.path(), Arc::default());
    let inbox = tmp.path().join("inbox.json");
    fs::write(&inbox, r#"{"command":"build"}"#).expect("write");

    let mut watcher = InboxWatcher::new(&inbox);
    let dispatched = run_watch_loop(
        &mut watcher,
        &dispatcher,
        &WatchOptions::new(Duration::from_millis(10)),
        &AtomicBool::new(true),
        |_| {},
    );
    assert_eq!(dispatched, 0);
}

#[test]
fn concurrent_dispatches_never_lose_transcript_entries() {
    let tmp = tempdir().expect("tempdir");
    let dispatcher = Arc::new(build_dispatcher(tmp.path(), Arc::default()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            std::thread::spawn(move || dispatcher.run_command("greet", &Actor::guest()))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().expect("join").succeeded());
    }

    assert_eq!(dispatcher.transcript().read_today().expect("read").len(), 4);
}
