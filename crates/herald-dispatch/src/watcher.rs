use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use herald_core::{DispatchRecord, InboxPayload};
use tracing::{debug, info, warn};

use crate::Dispatcher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatcherState {
    #[default]
    Idle,
    Firing,
}

/// Polls a single inbox file and emits each distinct payload once.
///
/// `last_seen` only moves when a valid payload fires, so a malformed write never hides the
/// next valid one, and rewriting the same bytes never fires twice in a row.
#[derive(Debug)]
pub struct InboxWatcher {
    path: PathBuf,
    state: WatcherState,
    last_seen: Option<String>,
    last_rejected: Option<Vec<u8>>,
    rejected: u64,
}

impl InboxWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: WatcherState::Idle,
            last_seen: None,
            last_rejected: None,
            rejected: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn last_seen(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }

    /// Number of distinct malformed contents seen so far; each one is warned about once.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Marks whatever valid payload is in the inbox right now as already handled.
    pub fn prime(&mut self) {
        let Some(raw) = self.read_inbox().and_then(|bytes| String::from_utf8(bytes).ok()) else {
            return;
        };
        if InboxPayload::parse(raw.as_str()).is_ok() {
            debug!(path = %self.path.display(), "inbox primed with existing payload");
            self.last_seen = Some(raw);
        }
    }

    /// Reads the inbox once. Returns the payload and enters `Firing` when its raw contents
    /// differ from the last payload that fired; stays `Idle` otherwise.
    pub fn poll(&mut self) -> Option<InboxPayload> {
        let bytes = self.read_inbox()?;
        if self.last_seen.as_deref().map(str::as_bytes) == Some(bytes.as_slice())
            || self.last_rejected.as_deref() == Some(bytes.as_slice())
        {
            return None;
        }
        let raw = match String::from_utf8(bytes) {
            Ok(raw) => raw,
            Err(err) => {
                let reason = err.utf8_error();
                self.reject(err.into_bytes(), &reason);
                return None;
            }
        };
        match InboxPayload::parse(raw.as_str()) {
            Ok(payload) => {
                self.last_seen = Some(raw);
                self.last_rejected = None;
                self.state = WatcherState::Firing;
                Some(payload)
            }
            Err(err) => {
                self.reject(raw.into_bytes(), &err);
                None
            }
        }
    }

    fn reject(&mut self, bytes: Vec<u8>, reason: &dyn std::fmt::Display) {
        warn!(path = %self.path.display(), error = %reason, "ignoring malformed inbox payload");
        self.last_rejected = Some(bytes);
        self.rejected += 1;
    }

    /// Completes the hand-off of a fired payload.
    pub fn acknowledge(&mut self) {
        self.state = WatcherState::Idle;
    }

    /// One poll cycle with a synchronous hand-off: `handler` runs to completion before the
    /// watcher returns to `Idle`.
    pub fn tick<R>(&mut self, handler: impl FnOnce(&InboxPayload) -> R) -> Option<R> {
        let payload = self.poll()?;
        let result = handler(&payload);
        self.acknowledge();
        Some(result)
    }

    fn read_inbox(&self) -> Option<Vec<u8>> {
        match fs::read(&self.path) {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => None,
            Ok(raw) => Some(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "inbox read failed; retrying next poll");
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    /// Stop after this many polls; `None` runs until shutdown.
    pub max_ticks: Option<u64>,
}

impl WatchOptions {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            max_ticks: None,
        }
    }
}

/// Polls the inbox and dispatches each new payload inline until `shutdown` is raised or
/// `max_ticks` polls have run. No poll starts while a dispatch is in flight. Returns the number
/// of dispatches performed.
pub fn run_watch_loop(
    watcher: &mut InboxWatcher,
    dispatcher: &Dispatcher,
    options: &WatchOptions,
    shutdown: &AtomicBool,
    mut on_record: impl FnMut(&DispatchRecord),
) -> u64 {
    info!(
        path = %watcher.path().display(),
        interval_ms = options.poll_interval.as_millis() as u64,
        "watching inbox"
    );
    let mut ticks = 0_u64;
    let mut dispatched = 0_u64;
    while !shutdown.load(Ordering::SeqCst) {
        if let Some(record) = watcher.tick(|payload| dispatcher.dispatch(payload)) {
            dispatched += 1;
            on_record(&record);
        }
        ticks += 1;
        if options.max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }
        thread::sleep(options.poll_interval);
    }
    info!(
        ticks,
        dispatched,
        rejected = watcher.rejected_count(),
        "inbox watch stopped"
    );
    dispatched
}
