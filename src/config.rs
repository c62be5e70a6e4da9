//! Configuration discovery and effective settings resolution.
//!
//! The auditor reads `audit.toml|yaml|yml` from the audit root (or the file
//! passed with `--config`) and merges it with CLI flags to produce an
//! `Effective` config. Defaults:
//! - `format`: `text`
//! - `jobs`: available parallelism
//! - `timeout_ms`: 2000 per file
//! - `max_file_bytes`: 1 MiB
//! - `include`: everything; `exclude`: nothing
//!
//! Overrides precedence: CLI > config file > defaults. Unknown keys, rule
//! ids and categories are configuration errors, never silently ignored.

use crate::error::{ConfigError, ConfigResult};
use crate::models::Severity;
use crate::output::OutputFormat;
use crate::scan::{default_jobs, ScanOptions};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILES: [&str; 3] = ["audit.toml", "audit.yaml", "audit.yml"];

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
/// Root configuration loaded from `audit.toml|yaml`.
pub struct AuditConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub format: Option<String>,
    pub jobs: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub max_file_bytes: Option<u64>,
    /// Extra rule packs, relative to the config file; globs allowed.
    #[serde(default)]
    pub rule_paths: Vec<String>,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>, // [categories] templates = false
    #[serde(default)]
    pub rules: BTreeMap<String, RuleOverride>, // [rules.<id>]
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RuleOverride {
    pub enabled: Option<bool>,
    pub severity: Option<Severity>,
}

#[derive(Debug, Default, Clone)]
/// Which rules run, merged from CLI lists and the config file.
pub struct Selection {
    /// `--rules`: when non-empty, only these run.
    pub only: Vec<String>,
    /// `--exclude-rules`.
    pub skip: Vec<String>,
    pub categories: BTreeMap<String, bool>,
    pub overrides: BTreeMap<String, RuleOverride>,
}

#[derive(Debug, Default, Clone)]
/// Values supplied on the command line. `None`/empty means "not given".
pub struct Overrides {
    pub root: Option<String>,
    pub config: Option<String>,
    pub format: Option<String>,
    pub rules: Vec<String>,
    pub exclude_rules: Vec<String>,
    pub jobs: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
/// Fully-resolved configuration used by the audit after applying precedence.
pub struct Effective {
    pub root: PathBuf,
    pub config_path: Option<PathBuf>,
    pub format: OutputFormat,
    pub scan: ScanOptions,
    pub rule_paths: Vec<PathBuf>,
    pub selection: Selection,
}

/// First `audit.toml|yaml|yml` present in `root`.
pub fn find_config(root: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

/// Parse a config file; YAML by extension, TOML otherwise.
pub fn load_config(path: &Path) -> ConfigResult<AuditConfig> {
    let s = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let origin = path.to_string_lossy().to_string();
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(&s).map_err(|e| ConfigError::Parse {
            origin,
            message: e.to_string(),
        })
    } else {
        toml::from_str(&s).map_err(|e| ConfigError::Parse {
            origin,
            message: e.to_string(),
        })
    }
}

fn compile_globs(patterns: &[String]) -> ConfigResult<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| ConfigError::InvalidGlob {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

fn expand_rule_paths(base: &Path, entries: &[String]) -> ConfigResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in entries {
        let pattern = base.join(entry).to_string_lossy().to_string();
        let matches = glob::glob(&pattern).map_err(|e| ConfigError::InvalidGlob {
            pattern: entry.clone(),
            message: e.to_string(),
        })?;
        let mut found: Vec<PathBuf> = matches.filter_map(Result::ok).filter(|p| p.is_file()).collect();
        if found.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "rule_paths".into(),
                message: format!("'{}' matches no files", entry),
            });
        }
        found.sort();
        out.extend(found);
    }
    Ok(out)
}

fn positive<T: PartialEq + Default>(key: &str, v: Option<T>) -> ConfigResult<Option<T>> {
    match v {
        Some(x) if x == T::default() => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: "must be greater than zero".into(),
        }),
        other => Ok(other),
    }
}

/// Resolve `Effective` by merging CLI flags, the config file, and defaults.
pub fn resolve_effective(cli: &Overrides) -> ConfigResult<Effective> {
    let root = PathBuf::from(cli.root.as_deref().unwrap_or("."));
    if !root.is_dir() {
        return Err(ConfigError::InvalidValue {
            key: "path".into(),
            message: format!("{} is not a directory", root.display()),
        });
    }

    let config_path = match cli.config.as_deref() {
        Some(p) => Some(PathBuf::from(p)),
        None => find_config(&root),
    };
    let cfg = match config_path.as_deref() {
        Some(p) => {
            debug!("loading config from {}", p.display());
            load_config(p)?
        }
        None => AuditConfig::default(),
    };

    let format_str = cli
        .format
        .clone()
        .or(cfg.format)
        .unwrap_or_else(|| "text".to_string());
    let format = OutputFormat::parse(&format_str).ok_or_else(|| ConfigError::InvalidValue {
        key: "format".into(),
        message: format!("expected text|json, got '{}'", format_str),
    })?;

    let jobs = positive("jobs", cli.jobs.or(cfg.jobs))?.unwrap_or_else(default_jobs);
    let timeout_ms = positive("timeout_ms", cli.timeout_ms.or(cfg.timeout_ms))?.unwrap_or(2000);
    let max_file_bytes = positive("max_file_bytes", cfg.max_file_bytes)?.unwrap_or(1024 * 1024);

    let scan = ScanOptions {
        include: compile_globs(&cfg.include)?,
        exclude: compile_globs(&cfg.exclude)?,
        jobs,
        timeout: Duration::from_millis(timeout_ms),
        max_file_bytes,
    };

    let base = config_path
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.clone());
    let rule_paths = expand_rule_paths(&base, &cfg.rule_paths)?;

    let selection = Selection {
        only: cli.rules.clone(),
        skip: cli.exclude_rules.clone(),
        categories: cfg.categories,
        overrides: cfg.rules,
    };

    Ok(Effective {
        root,
        config_path,
        format,
        scan,
        rule_paths,
        selection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn at(root: &Path) -> Overrides {
        Overrides {
            root: root.to_str().map(String::from),
            ..Overrides::default()
        }
    }

    #[test]
    fn test_detect_and_load_toml() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let mut f = fs::File::create(root.join("audit.toml")).unwrap();
        writeln!(
            f,
            "{}",
            r#"
format = "json"
jobs = 3
exclude = ["app/Legacy/**"]
[categories]
templates = false
[rules.mass-assignment]
severity = "error"
    "#
        )
        .unwrap();

        let eff = resolve_effective(&at(root)).unwrap();
        assert_eq!(eff.format, OutputFormat::Json);
        assert_eq!(eff.scan.jobs, 3);
        assert!(eff.scan.exclude[0].matches("app/Legacy/Old.php"));
        assert_eq!(eff.selection.categories.get("templates"), Some(&false));
        assert_eq!(
            eff.selection.overrides["mass-assignment"].severity,
            Some(Severity::Error)
        );
        assert_eq!(eff.config_path, Some(root.join("audit.toml")));
    }

    #[test]
    fn test_load_yaml_and_defaults() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("audit.yaml"),
            "include:\n  - app/**\nrules:\n  route-name:\n    enabled: false\n",
        )
        .unwrap();

        let eff = resolve_effective(&at(root)).unwrap();
        assert_eq!(eff.format, OutputFormat::Text);
        assert_eq!(eff.scan.timeout, Duration::from_millis(2000));
        assert_eq!(eff.scan.max_file_bytes, 1024 * 1024);
        assert_eq!(eff.scan.include.len(), 1);
        assert_eq!(eff.selection.overrides["route-name"].enabled, Some(false));
    }

    #[test]
    fn test_cli_takes_precedence() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("audit.toml"), "format = \"json\"\ntimeout_ms = 50\n").unwrap();
        let mut cli = at(root);
        cli.format = Some("text".into());
        cli.timeout_ms = Some(900);
        cli.rules = vec!["mass-assignment".into()];
        let eff = resolve_effective(&cli).unwrap();
        assert_eq!(eff.format, OutputFormat::Text);
        assert_eq!(eff.scan.timeout, Duration::from_millis(900));
        assert_eq!(eff.selection.only, vec!["mass-assignment".to_string()]);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("audit.toml"), "exlude = [\"vendor/**\"]\n").unwrap();
        assert!(matches!(
            resolve_effective(&at(root)),
            Err(ConfigError::Parse { .. })
        ));

        fs::write(
            root.join("audit.toml"),
            "[rules.mass-assignment]\nenabled = false\nsilence = true\n",
        )
        .unwrap();
        assert!(matches!(
            resolve_effective(&at(root)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("audit.toml"), "include = [\"app/[\"]\n").unwrap();
        assert!(matches!(
            resolve_effective(&at(root)),
            Err(ConfigError::InvalidGlob { .. })
        ));

        fs::write(root.join("audit.toml"), "format = \"xml\"\n").unwrap();
        assert!(matches!(
            resolve_effective(&at(root)),
            Err(ConfigError::InvalidValue { key, .. }) if key == "format"
        ));

        fs::write(root.join("audit.toml"), "jobs = 0\n").unwrap();
        assert!(resolve_effective(&at(root)).is_err());

        fs::write(root.join("audit.toml"), "rule_paths = [\"missing/*.toml\"]\n").unwrap();
        assert!(matches!(
            resolve_effective(&at(root)),
            Err(ConfigError::InvalidValue { key, .. }) if key == "rule_paths"
        ));
    }

    #[test]
    fn test_rule_paths_are_expanded_relative_to_config() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("audit-rules")).unwrap();
        fs::write(root.join("audit-rules/b.toml"), "").unwrap();
        fs::write(root.join("audit-rules/a.toml"), "").unwrap();
        fs::write(root.join("audit.toml"), "rule_paths = [\"audit-rules/*.toml\"]\n").unwrap();
        let eff = resolve_effective(&at(root)).unwrap();
        assert_eq!(
            eff.rule_paths,
            vec![root.join("audit-rules/a.toml"), root.join("audit-rules/b.toml")]
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let cli = Overrides {
            root: dir.path().join("nope").to_str().map(String::from),
            ..Overrides::default()
        };
        assert!(matches!(
            resolve_effective(&cli),
            Err(ConfigError::InvalidValue { key, .. }) if key == "path"
        ));
    }
}
