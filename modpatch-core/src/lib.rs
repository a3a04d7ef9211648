use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod bytes;
pub mod changes;
pub mod codec;
mod install;
pub mod memory;
pub mod path;
mod pipeline;
pub mod strings;
pub mod table;
pub mod table_patch;
pub mod tree;
pub mod tree_patch;
pub mod value;

pub use changes::{ChangeSet, ChangesError};
pub use memory::{MemoryValue, TokenKind, TokenStore};
pub use pipeline::{run, FileFailure, Phase, RunSummary};

fn default_changes_file() -> String {
    "changes.ini".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatcherSettings {
    /// Root of the game installation the change-set is applied to.
    pub game_path: PathBuf,
    /// Folder holding the change-set and every file it installs or appends from.
    pub mod_path: PathBuf,
    #[serde(default = "default_changes_file")]
    pub changes_file: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub write_install_log: bool,
}

impl PatcherSettings {
    pub fn new(game_path: impl Into<PathBuf>, mod_path: impl Into<PathBuf>) -> Self {
        Self {
            game_path: game_path.into(),
            mod_path: mod_path.into(),
            changes_file: default_changes_file(),
            dry_run: false,
            write_install_log: true,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn changes_path(&self) -> PathBuf {
        self.mod_path.join(&self.changes_file)
    }
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Changes(#[from] ChangesError),

    #[error("{kind}{id} is read before anything wrote it")]
    UndefinedToken { kind: TokenKind, id: u32 },

    #[error("{kind}{id} already holds a value; tokens are write-once")]
    DuplicateToken { kind: TokenKind, id: u32 },

    #[error("target not found: {what}")]
    TargetNotFound { what: String },

    #[error("source not found: {what}")]
    SourceNotFound { what: String },

    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    #[error("cannot write {width} byte(s) at offset {offset:#X}: data is only {len} bytes long")]
    Bounds { offset: usize, width: usize, len: usize },

    #[error("'{value}' is not a valid {expected}")]
    InvalidValue { value: String, expected: String },

    #[error("malformed {format} data: {message}")]
    Format { format: &'static str, message: String },

    #[error("in [{section}]: {source}")]
    InSection {
        section: String,
        #[source]
        source: Box<PatchError>,
    },

    #[error("{file}{}: {source}", .operation.as_ref().map(|op| format!(" {op}")).unwrap_or_default())]
    Located {
        file: String,
        operation: Option<String>,
        #[source]
        source: Box<PatchError>,
    },
}

impl PatchError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        PatchError::SchemaMismatch {
            message: message.into(),
        }
    }

    pub(crate) fn invalid(value: impl Into<String>, expected: impl Into<String>) -> Self {
        PatchError::InvalidValue {
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Only a missing change/modify target is survivable: the installation
    /// may legitimately lack a row or field another installation has.
    pub fn is_fatal(&self) -> bool {
        match self {
            PatchError::TargetNotFound { .. } => false,
            PatchError::InSection { source, .. } | PatchError::Located { source, .. } => {
                source.is_fatal()
            }
            _ => true,
        }
    }

    pub(crate) fn in_section(self, section: &str) -> Self {
        PatchError::InSection {
            section: section.to_string(),
            source: Box::new(self),
        }
    }

    /// Attach the target file and operation. Already located errors keep
    /// their innermost location.
    pub(crate) fn located(self, file: &str, operation: Option<String>) -> Self {
        match self {
            located @ PatchError::Located { .. } => located,
            other => PatchError::Located {
                file: file.to_string(),
                operation,
                source: Box::new(other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PatchError>;
