use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use herald_core::DispatchRecord;
use tempfile::NamedTempFile;
use tracing::debug;

/// Append-only dispatch transcript, one JSON array file per UTC calendar day.
///
/// Every append rewrites the whole day file: the current array is read, the record pushed, and
/// the result written to a temp file in the same directory that is then renamed into place.
/// Appends hold an exclusive lock on `.transcript.lock` in the directory, so writers in other
/// processes (a CLI `exec` next to a running `watch`) never lose each other's records.
#[derive(Debug)]
pub struct TranscriptLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TranscriptLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    /// Appends to the file for the record's own UTC day and returns that file's path.
    pub fn append(&self, record: &DispatchRecord) -> Result<PathBuf> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let date = record.timestamp.date_naive();
        let path = self.path_for(date);
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create transcript dir {}", self.dir.display()))?;
        let _dir_lock = lock_dir(&self.dir)?;

        let mut records = read_records(&path)?;
        records.push(record.clone());
        let body = serde_json::to_string_pretty(&records)
            .with_context(|| "failed to serialize transcript")?;

        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("failed to stage transcript in {}", self.dir.display()))?;
        tmp.write_all(body.as_bytes())
            .with_context(|| "failed to write staged transcript")?;
        tmp.persist(&path)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to replace transcript {}", path.display()))?;

        debug!(path = %path.display(), entries = records.len(), "transcript appended");
        Ok(path)
    }

    /// Records for `date` in append order. A day with no file is empty.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<DispatchRecord>> {
        read_records(&self.path_for(date))
    }

    pub fn read_today(&self) -> Result<Vec<DispatchRecord>> {
        self.read_day(Self::today())
    }
}

const LOCK_FILE: &str = ".transcript.lock";

#[cfg(unix)]
fn lock_dir(dir: &Path) -> Result<nix::fcntl::Flock<fs::File>> {
    use nix::fcntl::{Flock, FlockArg};

    let path = dir.join(LOCK_FILE);
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open transcript lock {}", path.display()))?;
    Flock::lock(file, FlockArg::LockExclusive)
        .map_err(|(_, errno)| errno)
        .with_context(|| format!("failed to lock {}", path.display()))
}

#[cfg(not(unix))]
fn lock_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<DispatchRecord>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read transcript {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse transcript {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use herald_core::{Actor, DispatchKind, DispatchStatus, Tier};
    use tempfile::tempdir;

    fn record(input: &str, day: u32) -> DispatchRecord {
        DispatchRecord::new(
            DispatchKind::Command,
            input,
            format!("echo {input}"),
            DispatchStatus::Success,
            input,
        )
        .with_timestamp(
            Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0)
                .single()
                .expect("valid timestamp"),
        )
    }

    #[test]
    fn first_append_creates_day_file_and_later_appends_keep_order() {
        let tmp = tempdir().expect("tempdir");
        let log = TranscriptLog::new(tmp.path().join("transcripts"));

        let path = log.append(&record("one", 4)).expect("append one");
        log.append(&record("two", 4)).expect("append two");
        assert!(path.ends_with("2026-03-04.json"));

        let date = NaiveDate::from_ymd_opt(2026, 3, 4).expect("date");
        let records = log.read_day(date).expect("read");
        let inputs: Vec<&str> = records.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["one", "two"]);
    }

    #[test]
    fn records_are_partitioned_by_utc_day() {
        let tmp = tempdir().expect("tempdir");
        let log = TranscriptLog::new(tmp.path());
        log.append(&record("monday", 2)).expect("append");
        log.append(&record("tuesday", 3)).expect("append");

        let monday = log
            .read_day(NaiveDate::from_ymd_opt(2026, 3, 2).expect("date"))
            .expect("read");
        assert_eq!(monday.len(), 1);
        assert_eq!(monday[0].input, "monday");
    }

    #[test]
    fn appended_record_reads_back_equal() {
        let tmp = tempdir().expect("tempdir");
        let log = TranscriptLog::new(tmp.path());
        let original = DispatchRecord::new(
            DispatchKind::Query,
            "status?",
            "system prompt",
            DispatchStatus::Failure,
            "backend down",
        )
        .with_actor(Actor::guest().with_id("ryan"), Tier::Executive)
        .with_exit_code(Some(2));

        log.append(&original).expect("append");
        let today = log.read_today().expect("read");
        assert_eq!(today, vec![original]);
    }

    #[test]
    fn missing_day_is_empty() {
        let tmp = tempdir().expect("tempdir");
        let log = TranscriptLog::new(tmp.path().join("never-created"));
        assert!(log.read_today().expect("read").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn separate_logs_on_one_dir_never_drop_records() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().to_path_buf();

        let handles: Vec<_> = (0..6)
            .map(|writer| {
                let log = TranscriptLog::new(dir.clone());
                std::thread::spawn(move || {
                    for n in 0..5 {
                        log.append(&record(&format!("w{writer}-{n}"), 4))
                            .expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }

        let date = NaiveDate::from_ymd_opt(2026, 3, 4).expect("date");
        let log = TranscriptLog::new(dir);
        assert_eq!(log.read_day(date).expect("read").len(), 30);
    }

    #[test]
    fn corrupt_day_file_surfaces_an_error() {
        let tmp = tempdir().expect("tempdir");
        let log = TranscriptLog::new(tmp.path());
        let date = NaiveDate::from_ymd_opt(2026, 3, 4).expect("date");
        fs::write(log.path_for(date), "{ broken").expect("write");
        let err = log.append(&record("x", 4)).expect_err("corrupt file");
        assert!(err.to_string().contains("failed to parse transcript"));
    }
}
