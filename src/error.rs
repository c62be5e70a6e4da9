//! Error types.
//!
//! Only `ConfigError` is fatal. Scan errors and rule faults are recovered by
//! the engine and surface as tooling findings.

use std::io;
use std::path::PathBuf;

use crate::audit::Phase;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{origin} is malformed: {message}")]
    Parse { origin: String, message: String },

    #[error("unknown rule id '{0}'")]
    UnknownRule(String),

    #[error("unknown category '{0}'")]
    UnknownCategory(String),

    #[error("invalid glob '{pattern}': {message}")]
    InvalidGlob { pattern: String, message: String },

    #[error("invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("duplicate rule id '{0}'")]
    DuplicateRule(String),

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("cannot read file: {0}")]
    Read(#[from] io::Error),

    #[error("file is not valid UTF-8")]
    Encoding,

    #[error("syntax error near line {line}")]
    Syntax { line: usize },

    #[error("PHP parser unavailable: {0}")]
    Parser(String),

    #[error("scan exceeded {millis} ms")]
    Timeout { millis: u128 },
}

impl ScanError {
    /// Line the finding should point at.
    pub fn line(&self) -> usize {
        match self {
            ScanError::Syntax { line } => *line,
            _ => 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuleFault {
    #[error("attribute '{attribute}' is a {found}, expected a {expected}")]
    Shape {
        attribute: String,
        found: &'static str,
        expected: &'static str,
    },

    #[error("rule panicked: {0}")]
    Panic(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot write report to {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("illegal phase transition {from:?} -> {to:?}")]
    Phase { from: Phase, to: Phase },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
