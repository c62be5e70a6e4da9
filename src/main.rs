//! `audit` binary entry point.
//! Resolves configuration, runs one audit, and prints or writes the report.

use clap::Parser;
use idiom_audit::audit::{self, Audit};
use idiom_audit::cli::Cli;
use idiom_audit::{config, logging, output};
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::Path;

/// Configuration or I/O failure; distinct from "error findings present".
const EXIT_FAILURE: i32 = 2;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    std::process::exit(run(&cli));
}

fn error_prefix() -> String {
    if std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none() {
        "error:".red().bold().to_string()
    } else {
        "error:".to_string()
    }
}

fn fail(e: impl std::fmt::Display) -> i32 {
    eprintln!("{} {}", error_prefix(), e);
    EXIT_FAILURE
}

fn run(cli: &Cli) -> i32 {
    if cli.list_rules || cli.explain.is_some() {
        let eff = match config::resolve_effective(&cli.overrides()) {
            Ok(e) => e,
            Err(e) => return fail(e),
        };
        let registry = match audit::registry(&eff) {
            Ok(r) => r,
            Err(e) => return fail(e),
        };
        if let Some(id) = cli.explain.as_deref() {
            return match registry.get(id) {
                Some(rule) => {
                    print!("{}", output::render_explain(rule));
                    0
                }
                None => fail(format!("unknown rule id '{}'", id)),
            };
        }
        print!("{}", output::render_rule_list(&registry));
        return 0;
    }

    let to_terminal = cli.output.is_none() && std::io::stdout().is_terminal();
    let outcome = match Audit::new(cli.overrides()).run(to_terminal) {
        Ok(o) => o,
        Err(e) => return fail(e),
    };
    match cli.output.as_deref() {
        Some(path) => {
            if let Err(e) = output::write_report(Path::new(path), &outcome.rendered) {
                return fail(e);
            }
        }
        None => print!("{}", outcome.rendered),
    }
    outcome.exit_code
}
