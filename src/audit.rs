//! One audit run: load rules, scan the tree, evaluate, render.
//!
//! The run moves through a fixed sequence of phases and refuses any other
//! order. Only loading (config file and rule packs) can fail; once the rule
//! set is valid every problem with an individual file or rule is reported as
//! a finding instead.

use crate::config::{resolve_effective, Effective, Overrides};
use crate::engine;
use crate::error::{AuditError, ConfigResult};
use crate::models::Report;
use crate::output;
use crate::registry::{builtin_sources, read_sources, Registry, RuleSet, RuleSource};
use crate::scan;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Scanning,
    Evaluating,
    Formatting,
    Done,
    Failed,
}

impl Phase {
    /// Whether `self -> to` is a legal transition.
    pub fn can_advance(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Idle, Phase::Loading)
                | (Phase::Loading, Phase::Scanning)
                | (Phase::Loading, Phase::Failed)
                | (Phase::Scanning, Phase::Evaluating)
                | (Phase::Evaluating, Phase::Formatting)
                | (Phase::Formatting, Phase::Done)
        )
    }
}

#[derive(Debug)]
pub struct AuditOutcome {
    pub report: Report,
    pub rendered: String,
    pub exit_code: i32,
    /// Ids of the rules that were active, sorted.
    pub active_rules: Vec<String>,
}

/// Built-in packs followed by the packs named in `rule_paths`.
pub fn rule_sources(eff: &Effective) -> ConfigResult<Vec<RuleSource>> {
    let mut sources = builtin_sources();
    sources.extend(read_sources(&eff.rule_paths)?);
    Ok(sources)
}

/// Every known rule, before selection.
pub fn registry(eff: &Effective) -> ConfigResult<Registry> {
    Registry::from_sources(&rule_sources(eff)?)
}

pub struct Audit {
    overrides: Overrides,
    phase: Phase,
}

impl Audit {
    pub fn new(overrides: Overrides) -> Self {
        Audit {
            overrides,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, to: Phase) -> Result<(), AuditError> {
        if !self.phase.can_advance(to) {
            return Err(AuditError::Phase {
                from: self.phase,
                to,
            });
        }
        info!("phase {:?} -> {:?}", self.phase, to);
        self.phase = to;
        Ok(())
    }

    /// Loading phase: resolve the configuration and the active rule set.
    fn load(&mut self) -> Result<(Effective, RuleSet), AuditError> {
        self.advance(Phase::Loading)?;
        let loaded = resolve_effective(&self.overrides).and_then(|eff| {
            let rules = registry(&eff)?.activate(&eff.selection)?;
            Ok((eff, rules))
        });
        match loaded {
            Ok(pair) => Ok(pair),
            Err(e) => {
                self.advance(Phase::Failed)?;
                Err(e.into())
            }
        }
    }

    /// Drive the run to completion. Nothing is written anywhere; the caller
    /// decides where the rendered report goes. Colors apply to text output on
    /// a terminal only.
    pub fn run(mut self, is_terminal: bool) -> Result<AuditOutcome, AuditError> {
        let (eff, rules) = self.load()?;
        info!("{} rule(s) active", rules.len());

        self.advance(Phase::Scanning)?;
        let files = scan::scan(&eff.root, &eff.scan);

        // Parsing is lazy: the engine pulls batches from the scanner.
        self.advance(Phase::Evaluating)?;
        let report = engine::run(&rules, files);
        let s = report.summary();
        info!(
            "{} file(s), {} unit(s): {} error(s), {} warning(s)",
            s.files_scanned, s.units_scanned, s.error_count, s.warning_count
        );

        self.advance(Phase::Formatting)?;
        let color = output::use_colors(eff.format, is_terminal);
        let rendered = output::render(&report, eff.format, color);
        let exit_code = output::exit_code(&report);
        debug!("exit code {}", exit_code);

        self.advance(Phase::Done)?;
        Ok(AuditOutcome {
            report,
            rendered,
            exit_code,
            active_rules: rules.iter().map(|r| r.id.clone()).collect(),
        })
    }
}
