//! Shared data models: severities, categories, findings, and the frozen report.

pub mod facts;
pub mod rule;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// How much a finding matters. Only `Error` fails the run.
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Practice area a rule belongs to. `Tooling` is reserved for scan/rule failures.
pub enum Category {
    Architecture,
    Database,
    Routes,
    Templates,
    Testing,
    Tooling,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Architecture,
        Category::Database,
        Category::Routes,
        Category::Templates,
        Category::Testing,
        Category::Tooling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Architecture => "architecture",
            Category::Database => "database",
            Category::Routes => "routes",
            Category::Templates => "templates",
            Category::Testing => "testing",
            Category::Tooling => "tooling",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// A single rule violation with its location.
pub struct Finding {
    pub rule_id: String,
    pub file: String,
    pub line: usize,
    pub severity: Severity,
    pub message: String,
    #[serde(skip)]
    pub category: Category,
    /// For `rule-fault` findings, the rule that failed. Part of the dedup key.
    #[serde(skip)]
    pub faulted_rule: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Aggregated counts used by printers and the exit status.
pub struct Summary {
    pub error_count: usize,
    pub warning_count: usize,
    pub files_scanned: usize,
    pub units_scanned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Frozen audit result: findings ordered by file, line, then rule id.
///
/// Built only through `engine::ReportBuilder::freeze`, so the ordering and
/// de-duplication guarantees hold for every instance.
pub struct Report {
    pub(crate) findings: Vec<Finding>,
    pub(crate) summary: Summary,
}

impl Report {
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn has_errors(&self) -> bool {
        self.summary.error_count > 0
    }
}
