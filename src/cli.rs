//! CLI argument parsing via `clap`.

use crate::config::Overrides;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "audit",
    version,
    about = "Audit a PHP web application for framework best-practice violations",
    long_about = "Scan a project tree, evaluate the built-in rule packs (plus any configured extras) and report findings.\n\nConfiguration precedence: CLI > audit.toml|yaml > defaults.\nExit status: 0 no error findings, 1 error findings, 2 configuration failure.",
    after_help = "Examples:\n  audit .\n  audit ./shop --format json --output report.json\n  audit . --rules mass-assignment,relationship-return\n  audit --list-rules\n  audit --explain route-name"
)]
/// Command-line options for a single audit run.
pub struct Cli {
    #[arg(help = "Project root to audit (default: current dir)")]
    pub path: Option<String>,
    #[arg(long, help = "Output mode: text|json (default: text)")]
    pub format: Option<String>,
    #[arg(long, value_delimiter = ',', help = "Run only these rule ids (comma-separated)")]
    pub rules: Vec<String>,
    #[arg(long, value_delimiter = ',', help = "Skip these rule ids (comma-separated)")]
    pub exclude_rules: Vec<String>,
    #[arg(long, action = clap::ArgAction::SetTrue, help = "List every known rule and exit")]
    pub list_rules: bool,
    #[arg(long, value_name = "ID", help = "Show a rule's remediation advice and exit")]
    pub explain: Option<String>,
    #[arg(long, help = "Config file (default: audit.toml|yaml|yml in the project root)")]
    pub config: Option<String>,
    #[arg(long, help = "Parser worker threads (default: available parallelism)")]
    pub jobs: Option<usize>,
    #[arg(long, help = "Per-file scan timeout in milliseconds (default: 2000)")]
    pub timeout_ms: Option<u64>,
    #[arg(long, value_name = "FILE", help = "Write the report to FILE instead of stdout")]
    pub output: Option<String>,
    #[arg(long, short, action = clap::ArgAction::SetTrue, help = "Debug logging on stderr")]
    pub verbose: bool,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            root: self.path.clone(),
            config: self.config.clone(),
            format: self.format.clone(),
            rules: self.rules.clone(),
            exclude_rules: self.exclude_rules.clone(),
            jobs: self.jobs,
            timeout_ms: self.timeout_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "audit",
            "shop",
            "--format",
            "json",
            "--rules",
            "mass-assignment,route-name",
            "--exclude-rules",
            "route-closure",
            "--jobs",
            "2",
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        let ov = cli.overrides();
        assert_eq!(ov.root.as_deref(), Some("shop"));
        assert_eq!(ov.format.as_deref(), Some("json"));
        assert_eq!(ov.rules, vec!["mass-assignment", "route-name"]);
        assert_eq!(ov.exclude_rules, vec!["route-closure"]);
        assert_eq!(ov.jobs, Some(2));
        assert_eq!(ov.timeout_ms, Some(500));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_path_is_optional() {
        let cli = Cli::try_parse_from(["audit", "--list-rules"]).unwrap();
        assert!(cli.list_rules);
        assert!(cli.path.is_none());
        assert!(Cli::try_parse_from(["audit", "--jobs", "many"]).is_err());
    }
}
