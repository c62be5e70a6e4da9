//! Output rendering for audit reports and rule listings.
//!
//! Supports `text` (default) and `json`. Rendering is pure: the same report
//! always produces the same bytes. `write_report` is the only function here
//! that touches disk.

use crate::error::AuditError;
use crate::models::rule::Rule;
use crate::models::{Report, Severity};
use crate::registry::Registry;
use owo_colors::OwoColorize;
use serde_json::json;
use serde_json::Value as JsonVal;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<OutputFormat> {
        match s {
            "text" | "human" => Some(OutputFormat::Text),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Colors are used for text output only, and never when `NO_COLOR` is set.
pub fn use_colors(format: OutputFormat, is_terminal: bool) -> bool {
    format == OutputFormat::Text && is_terminal && std::env::var_os("NO_COLOR").is_none()
}

/// Process exit status for a finished audit: 1 when any finding is an error.
pub fn exit_code(report: &Report) -> i32 {
    if report.has_errors() {
        1
    } else {
        0
    }
}

pub fn render(report: &Report, format: OutputFormat, color: bool) -> String {
    match format {
        OutputFormat::Json => {
            let mut s = serde_json::to_string_pretty(&compose_report_json(report))
                .unwrap_or_else(|_| "{}".to_string());
            s.push('\n');
            s
        }
        OutputFormat::Text => render_text(report, color),
    }
}

fn render_text(report: &Report, color: bool) -> String {
    let mut out = String::new();
    for f in report.findings() {
        let (icon, sev) = match f.severity {
            Severity::Error => {
                if color {
                    ("✖".red().to_string(), "⟦error⟧".red().bold().to_string())
                } else {
                    ("✖".to_string(), "⟦error⟧".to_string())
                }
            }
            Severity::Warning => {
                if color {
                    ("▲".yellow().to_string(), "⟦warn⟧".yellow().bold().to_string())
                } else {
                    ("▲".to_string(), "⟦warn⟧".to_string())
                }
            }
        };
        let location = format!("{}:{}", f.file, f.line);
        let location = if color {
            location.bold().to_string()
        } else {
            location
        };
        out.push_str(&format!("{} {} {} ❲{}❳ — {}\n", icon, sev, location, f.rule_id, f.message));
    }
    let s = report.summary();
    let counts = format!(
        "{} {}, {} {}",
        s.error_count,
        plural(s.error_count, "error"),
        s.warning_count,
        plural(s.warning_count, "warning")
    );
    if color {
        out.push_str(&format!("{}\n", counts.bold()));
    } else {
        out.push_str(&counts);
        out.push('\n');
    }
    let rationale = if report.has_errors() {
        "exit 1: error-severity findings present"
    } else if s.warning_count > 0 {
        "exit 0: warnings only, no error-severity findings"
    } else {
        "exit 0: no findings"
    };
    out.push_str(rationale);
    out.push('\n');
    out
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

/// Compose the report JSON object (pure) for testing/snapshot purposes.
pub fn compose_report_json(report: &Report) -> JsonVal {
    let findings: Vec<JsonVal> = report
        .findings()
        .iter()
        .map(|f| {
            json!({
                "rule_id": f.rule_id,
                "file": f.file,
                "line": f.line,
                "severity": f.severity,
                "message": f.message,
            })
        })
        .collect();
    json!({
        "findings": findings,
        "error_count": report.summary().error_count,
        "warning_count": report.summary().warning_count,
    })
}

/// `--list-rules`: every known rule with its category and default severity.
pub fn render_rule_list(registry: &Registry) -> String {
    let rules = registry.rules();
    let width = rules.iter().map(|r| r.id.len()).max().unwrap_or(0);
    let mut out = String::new();
    for r in rules {
        out.push_str(&format!(
            "{:<width$}  {:<12}  {:<7}  {}\n",
            r.id,
            r.category.as_str(),
            r.severity.as_str(),
            r.title,
            width = width
        ));
    }
    out
}

/// `--explain <id>`: title, classification, and the remediation advice.
pub fn render_explain(rule: &Rule) -> String {
    let mut out = format!(
        "{} — {}\ncategory: {}\nseverity: {}\n",
        rule.id, rule.title, rule.category, rule.severity
    );
    let advice = rule.remediation.trim_end();
    if !advice.is_empty() {
        out.push('\n');
        out.push_str(advice);
        out.push('\n');
    }
    out
}

/// Write `contents` to a sibling temporary file, then rename it over `path`.
/// An interrupted write never leaves a truncated report behind.
pub fn write_report(path: &Path, contents: &str) -> Result<(), AuditError> {
    let fail = |source| AuditError::Output {
        path: path.to_path_buf(),
        source,
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "report".to_string());
    let tmp = path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()));
    if let Err(e) = fs::write(&tmp, contents) {
        let _ = fs::remove_file(&tmp);
        return Err(fail(e));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        fail(e)
    })
}
