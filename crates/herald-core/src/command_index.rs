use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandIndexError {
    #[error("failed to read command index at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse command index at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("command index entry '{0}' has an empty key or expansion")]
    EmptyEntry(String),
}

/// Outcome of a lookup: either the indexed expansion or the key itself, passed through as a
/// literal command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Mapped(String),
    PassThrough(String),
}

impl Resolution {
    pub fn command(&self) -> &str {
        match self {
            Self::Mapped(command) | Self::PassThrough(command) => command,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough(_))
    }
}

/// Immutable alias table from short command keys to full command lines.
#[derive(Debug, Clone, Default)]
pub struct CommandIndex {
    entries: BTreeMap<String, String>,
}

impl CommandIndex {
    pub fn from_entries<I, K, V>(entries: I) -> Result<Self, CommandIndexError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (key, expansion) in entries {
            let key = key.into();
            let expansion = expansion.into();
            if key.trim().is_empty() || expansion.trim().is_empty() {
                return Err(CommandIndexError::EmptyEntry(key));
            }
            map.insert(key, expansion);
        }
        Ok(Self { entries: map })
    }

    /// Reads a JSON object of `key -> expansion` strings.
    pub fn load(path: &Path) -> Result<Self, CommandIndexError> {
        let raw = fs::read_to_string(path).map_err(|source| CommandIndexError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: BTreeMap<String, String> =
            serde_json::from_str(&raw).map_err(|source| CommandIndexError::ParseFailed {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_entries(entries)
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn resolve(&self, key: &str) -> Resolution {
        match self.lookup(key) {
            Some(expansion) => Resolution::Mapped(expansion.to_string()),
            None => Resolution::PassThrough(key.to_string()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn indexed_keys_expand_and_unknown_keys_pass_through() {
        let index = CommandIndex::from_entries([
            ("status", "git status --short"),
            ("ship", "deploy"),
        ])
        .expect("index");

        assert_eq!(
            index.resolve("status"),
            Resolution::Mapped("git status --short".to_string())
        );
        assert_eq!(index.resolve("ship").command(), "deploy");

        for key in ["launch-the-thing", "Status", "echo hi"] {
            let resolution = index.resolve(key);
            assert!(resolution.is_pass_through());
            assert_eq!(resolution.command(), key);
        }
    }

    #[test]
    fn loads_json_definition() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("commands.json");
        fs::write(&path, r#"{"hello":"echo hello","list":"ls -la"}"#).expect("write");

        let index = CommandIndex::load(&path).expect("load");
        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup("hello"), Some("echo hello"));
        assert_eq!(index.lookup("missing"), None);
    }

    #[test]
    fn missing_or_malformed_definition_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        let missing = CommandIndex::load(&tmp.path().join("absent.json"));
        assert!(matches!(missing, Err(CommandIndexError::ReadFailed { .. })));

        let path = tmp.path().join("bad.json");
        fs::write(&path, r#"{"hello": 3}"#).expect("write");
        assert!(matches!(
            CommandIndex::load(&path),
            Err(CommandIndexError::ParseFailed { .. })
        ));

        fs::write(&path, r#"{"hello": "  "}"#).expect("write");
        assert!(matches!(
            CommandIndex::load(&path),
            Err(CommandIndexError::EmptyEntry(_))
        ));
    }
}
