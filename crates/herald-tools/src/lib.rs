use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use herald_common::{ActionsConfig, HeraldConfig};
use herald_core::ActionVerb;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct ExecContext {
    pub working_dir: PathBuf,
    pub timeout_ms: Option<u64>,
    pub max_output_bytes: usize,
}

impl ExecContext {
    pub fn for_dir(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            timeout_ms: None,
            max_output_bytes: 64 * 1024,
        }
    }

    pub fn from_config(config: &HeraldConfig) -> Self {
        Self {
            working_dir: config.exec_working_dir(),
            timeout_ms: config.exec.timeout_ms,
            max_output_bytes: config.exec.max_output_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// `None` when the process was killed by a signal or by the deadline.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    pub fn merged_output(&self) -> String {
        let mut merged = self.stdout.clone();
        if !self.stderr.is_empty() {
            merged.push_str("\n--- stderr ---\n");
            merged.push_str(&self.stderr);
        }
        if self.timed_out {
            merged.push_str("\n--- timed out ---");
        }
        merged
    }
}

/// Runs one command line to completion, without a shell.
///
/// The line is split with POSIX shell-word rules; pipes, redirects and `&&` are passed to the
/// program as plain arguments. An `Err` means the process never started (bad quoting, missing
/// program, missing working directory). A started process always yields an `ExecResult`,
/// whatever its exit status.
pub fn run_command_line(line: &str, ctx: &ExecContext) -> Result<ExecResult> {
    if line.trim().is_empty() {
        bail!("command line is empty");
    }
    let args = shlex::split(line).ok_or_else(|| anyhow!("invalid command quoting: {line}"))?;
    let Some((program, rest)) = args.split_first() else {
        bail!("command line is empty");
    };

    debug!(program = %program, args = rest.len(), dir = %ctx.working_dir.display(), "spawning");
    let mut command = Command::new(program);
    command
        .args(rest)
        .current_dir(&ctx.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // A deadline has to reach everything the command starts, so give it its own group.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if ctx.timeout_ms.is_some() {
            command.process_group(0);
        }
    }
    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn command '{program}'"))?;

    // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
    let stdout = drain(child.stdout.take(), ctx.max_output_bytes);
    let stderr = drain(child.stderr.take(), ctx.max_output_bytes);

    let (exit_code, timed_out) = wait_for(&mut child, ctx.timeout_ms)?;
    if timed_out {
        warn!(program = %program, timeout_ms = ?ctx.timeout_ms, "command timed out and was killed");
    }

    Ok(ExecResult {
        exit_code,
        stdout: collect(stdout),
        stderr: collect(stderr),
        timed_out,
    })
}

fn wait_for(child: &mut Child, timeout_ms: Option<u64>) -> Result<(Option<i32>, bool)> {
    let Some(timeout_ms) = timeout_ms else {
        let status = child.wait().context("failed to wait for command")?;
        return Ok((status.code(), false));
    };
    match child
        .wait_timeout(Duration::from_millis(timeout_ms))
        .context("failed to wait for command")?
    {
        Some(status) => Ok((status.code(), false)),
        None => {
            kill_process_group(child);
            let _ = child.wait();
            Ok((None, true))
        }
    }
}

/// Kills the child and every process left in its group, so nothing keeps the output pipes open.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id()) {
            if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!(pid, error = %err, "process group kill failed");
            }
        }
    }
    let _ = child.kill();
}

fn drain<R>(pipe: Option<R>, limit: usize) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    let mut pipe = pipe?;
    Some(thread::spawn(move || {
        let mut kept = Vec::new();
        let mut truncated = false;
        let mut chunk = [0_u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let room = limit.saturating_sub(kept.len());
                    truncated |= n > room;
                    kept.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
        if truncated {
            trim_partial_char(&mut kept);
        }
        kept
    }))
}

/// Drops a UTF-8 sequence left incomplete by the output cap.
fn trim_partial_char(bytes: &mut Vec<u8>) {
    let tail_start = bytes.len().saturating_sub(3);
    for start in (tail_start..bytes.len()).rev() {
        let width = match bytes[start] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        if bytes.len() - start < width {
            bytes.truncate(start);
        }
        return;
    }
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Binds each named verb to the command line it runs. Payloads naming a verb can only ever
/// trigger the operation configured here.
#[derive(Debug, Clone)]
pub struct ActionTable {
    actions: BTreeMap<&'static str, String>,
}

impl ActionTable {
    pub fn from_config(config: &ActionsConfig) -> Self {
        let actions = ActionVerb::all()
            .iter()
            .map(|verb| {
                let line = match verb {
                    ActionVerb::Deploy => &config.deploy,
                    ActionVerb::Build => &config.build,
                    ActionVerb::Start => &config.start,
                    ActionVerb::Logs => &config.logs,
                };
                (verb.as_str(), line.clone())
            })
            .collect();
        Self { actions }
    }

    pub fn command_for(&self, verb: ActionVerb) -> &str {
        self.actions
            .get(verb.as_str())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn run(&self, verb: ActionVerb, ctx: &ExecContext) -> Result<ExecResult> {
        let line = self.command_for(verb);
        run_command_line(line, ctx)
            .with_context(|| format!("action '{}' failed to start", verb.as_str()))
    }
}
