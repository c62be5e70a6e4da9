//! Rule engine: evaluates the active rule set over scanned fact sets.
//!
//! Findings are collected into a `ReportBuilder` keyed by (file, line, rule
//! id, failing rule), which both de-duplicates and fixes the output order, so parallel
//! evaluation never leaks into what the formatter sees. Scan errors and rule
//! faults become findings of the built-in tooling rules, when those are
//! active.

use crate::error::RuleFault;
use crate::models::facts::FactSet;
use crate::models::rule::{render_message, Rule};
use crate::models::{Finding, Report, Severity, Summary};
use crate::registry::{RuleSet, RULE_FAULT, UNPARSEABLE};
use crate::scan::ScannedFile;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// (file, line, rule id, failing rule). The last part is empty except for rule faults.
type FindingKey = (String, usize, String, String);

#[derive(Default)]
/// Append-only collection of findings; `freeze` produces the ordered report.
pub struct ReportBuilder {
    findings: BTreeMap<FindingKey, Finding>,
    files_scanned: usize,
    units_scanned: usize,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finding. A second finding for the same (rule, file, line) is
    /// dropped; rule faults are told apart by the rule that failed.
    pub fn push(&mut self, finding: Finding) {
        let key = (
            finding.file.clone(),
            finding.line,
            finding.rule_id.clone(),
            finding.faulted_rule.clone().unwrap_or_default(),
        );
        self.findings.entry(key).or_insert(finding);
    }

    pub fn note_file(&mut self, units: usize) {
        self.files_scanned += 1;
        self.units_scanned += units;
    }

    pub fn freeze(self) -> Report {
        let findings: Vec<Finding> = self.findings.into_values().collect();
        let error_count = findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count();
        let summary = Summary {
            error_count,
            warning_count: findings.len() - error_count,
            files_scanned: self.files_scanned,
            units_scanned: self.units_scanned,
        };
        Report { findings, summary }
    }
}

/// Evaluate `rules` over every scanned file and freeze the result.
pub fn run<I>(rules: &RuleSet, files: I) -> Report
where
    I: IntoIterator<Item = ScannedFile>,
{
    let mut builder = ReportBuilder::new();
    for file in files {
        match file.outcome {
            Err(e) => {
                builder.note_file(0);
                warn!("{} could not be scanned: {}", file.path, e);
                if let Some(rule) = rules.get(UNPARSEABLE) {
                    let message =
                        render_message(&rule.message, &file.path, "", &file.path, &e.to_string());
                    builder.push(rule.finding_at(&file.path, e.line(), message));
                }
            }
            Ok(units) => {
                builder.note_file(units.len());
                let found: Vec<Finding> = units
                    .par_iter()
                    .flat_map_iter(|unit| evaluate_unit(rules, unit))
                    .collect();
                debug!("{}: {} unit(s), {} finding(s)", file.path, units.len(), found.len());
                for f in found {
                    builder.push(f);
                }
            }
        }
    }
    builder.freeze()
}

/// Apply every active rule to one unit, isolating faults per (rule, unit).
pub fn evaluate_unit(rules: &RuleSet, unit: &FactSet) -> Vec<Finding> {
    let mut out = Vec::new();
    for rule in rules.iter() {
        let result = catch_unwind(AssertUnwindSafe(|| rule.evaluate(unit)))
            .unwrap_or_else(|payload| Err(RuleFault::Panic(panic_text(payload.as_ref()))));
        match result {
            Ok(found) => out.extend(found),
            Err(fault) => {
                warn!("rule {} failed on {} ({}): {}", rule.id, unit.name, unit.file, fault);
                if let Some(tool) = rules.get(RULE_FAULT) {
                    out.push(fault_finding(tool, rule, unit, &fault));
                }
            }
        }
    }
    out
}

fn fault_finding(tool: &Rule, failed: &Rule, unit: &FactSet, fault: &RuleFault) -> Finding {
    let message = render_message(&tool.message, &unit.name, &failed.id, &unit.file, &fault.to_string());
    let mut finding = tool.finding_at(&unit.file, unit.line, message);
    finding.faulted_rule = Some(failed.id.clone());
    finding
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
