//! Rule registry: loads rule packs, validates them, and builds the active set.
//!
//! Built-in packs live under `rules/` (one TOML file per practice area) and
//! are embedded at compile time. Extra packs named by the config file are
//! read from disk. Any invalid definition aborts loading: a partially loaded
//! rule set never runs.

use crate::config::Selection;
use crate::error::{ConfigError, ConfigResult};
use crate::models::rule::{Rule, RulePack};
use crate::models::Category;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Built-in tooling rule for files that could not be scanned.
pub const UNPARSEABLE: &str = "unparseable";
/// Built-in tooling rule for rules that failed during evaluation.
pub const RULE_FAULT: &str = "rule-fault";

const BUILTIN: [(&str, &str); 6] = [
    ("rules/architecture.toml", include_str!("../rules/architecture.toml")),
    ("rules/database.toml", include_str!("../rules/database.toml")),
    ("rules/routes.toml", include_str!("../rules/routes.toml")),
    ("rules/templates.toml", include_str!("../rules/templates.toml")),
    ("rules/testing.toml", include_str!("../rules/testing.toml")),
    ("rules/tooling.toml", include_str!("../rules/tooling.toml")),
];

#[derive(Debug, Clone)]
/// Raw rule pack text plus where it came from, for error messages.
pub struct RuleSource {
    pub origin: String,
    pub text: String,
}

pub fn builtin_sources() -> Vec<RuleSource> {
    BUILTIN
        .iter()
        .map(|(origin, text)| RuleSource {
            origin: (*origin).to_string(),
            text: (*text).to_string(),
        })
        .collect()
}

/// Read extra rule packs from disk.
pub fn read_sources(paths: &[PathBuf]) -> ConfigResult<Vec<RuleSource>> {
    paths
        .iter()
        .map(|p| {
            let text = fs::read_to_string(p).map_err(|source| ConfigError::Read {
                path: p.clone(),
                source,
            })?;
            Ok(RuleSource {
                origin: p.to_string_lossy().to_string(),
                text,
            })
        })
        .collect()
}

#[derive(Debug, Clone)]
/// Every known, validated rule, ordered by id.
pub struct Registry {
    rules: Vec<Rule>,
}

impl Registry {
    pub fn from_sources(sources: &[RuleSource]) -> ConfigResult<Registry> {
        let mut by_id: BTreeMap<String, Rule> = BTreeMap::new();
        for src in sources {
            let pack: RulePack = toml::from_str(&src.text).map_err(|e| ConfigError::Parse {
                origin: src.origin.clone(),
                message: e.to_string(),
            })?;
            debug!("{}: {} rule(s)", src.origin, pack.rules.len());
            for def in pack.rules {
                let rule = Rule::compile(def)?;
                if by_id.contains_key(&rule.id) {
                    return Err(ConfigError::DuplicateRule(rule.id));
                }
                by_id.insert(rule.id.clone(), rule);
            }
        }
        Ok(Registry {
            rules: by_id.into_values().collect(),
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Apply the selection (allow/deny lists, categories, severity overrides).
    ///
    /// Every rule id and category the selection mentions must exist.
    pub fn activate(&self, sel: &Selection) -> ConfigResult<RuleSet> {
        for id in sel.only.iter().chain(&sel.skip).chain(sel.overrides.keys()) {
            if self.get(id).is_none() {
                return Err(ConfigError::UnknownRule(id.clone()));
            }
        }
        let mut categories: BTreeMap<Category, bool> = BTreeMap::new();
        for (name, on) in &sel.categories {
            let cat = Category::parse(name)
                .ok_or_else(|| ConfigError::UnknownCategory(name.clone()))?;
            categories.insert(cat, *on);
        }
        let only: BTreeSet<&str> = sel.only.iter().map(String::as_str).collect();
        let skip: BTreeSet<&str> = sel.skip.iter().map(String::as_str).collect();

        let mut active = Vec::new();
        for rule in &self.rules {
            let ov = sel.overrides.get(&rule.id);
            let mut enabled = ov
                .and_then(|o| o.enabled)
                .or_else(|| categories.get(&rule.category).copied())
                .unwrap_or(true);
            if !only.is_empty() {
                enabled = only.contains(rule.id.as_str());
            }
            if skip.contains(rule.id.as_str()) {
                enabled = false;
            }
            if !enabled {
                debug!("rule {} disabled", rule.id);
                continue;
            }
            let mut rule = rule.clone();
            if let Some(sev) = ov.and_then(|o| o.severity) {
                rule.severity = sev;
            }
            active.push(rule);
        }
        Ok(RuleSet { rules: active })
    }
}

/// Load and validate `sources`, then apply `sel`.
pub fn load(sources: &[RuleSource], sel: &Selection) -> ConfigResult<RuleSet> {
    Registry::from_sources(sources)?.activate(sel)
}

#[derive(Debug, Clone)]
/// The rules in effect for one run, ordered by id.
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleOverride;
    use crate::models::Severity;

    fn registry() -> Registry {
        Registry::from_sources(&builtin_sources()).unwrap()
    }

    #[test]
    fn test_builtin_packs_load() {
        let reg = registry();
        let ids: Vec<&str> = reg.rules().iter().map(|r| r.id.as_str()).collect();
        for id in [
            "mass-assignment",
            "relationship-return",
            "migration-down",
            "container-injection",
            "env-outside-config",
            "controller-suffix",
            "route-name",
            "route-closure",
            "inline-middleware",
            "view-query",
            "view-php-block",
            "test-isolation",
            UNPARSEABLE,
            RULE_FAULT,
        ] {
            assert!(ids.contains(&id), "missing builtin rule {}", id);
        }
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        let mass = reg.get("mass-assignment").unwrap();
        assert_eq!(mass.severity, Severity::Warning);
        assert_eq!(mass.category, Category::Database);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut sources = builtin_sources();
        sources.push(sources[1].clone());
        assert!(matches!(
            Registry::from_sources(&sources),
            Err(ConfigError::DuplicateRule(_))
        ));
    }

    #[test]
    fn test_malformed_pack_is_rejected() {
        let bad = RuleSource {
            origin: "extra.toml".into(),
            text: "[[rules]]\nid = \"x\"\ntitle = \"t\"\ncategory = \"styling\"\nseverity = \"error\"\nmessage = \"m\"\n[rules.check]\nkind = \"tooling\"\n".into(),
        };
        match Registry::from_sources(&[bad]) {
            Err(ConfigError::Parse { origin, .. }) => assert_eq!(origin, "extra.toml"),
            other => panic!("unexpected: {:?}", other.map(|r| r.rules().len())),
        }
    }

    #[test]
    fn test_selection_only_skip_and_categories() {
        let reg = registry();
        let only = reg
            .activate(&Selection {
                only: vec!["mass-assignment".into()],
                ..Selection::default()
            })
            .unwrap();
        assert_eq!(only.len(), 1);
        assert!(only.contains("mass-assignment"));

        let mut categories = BTreeMap::new();
        categories.insert("templates".to_string(), false);
        let set = reg
            .activate(&Selection {
                skip: vec!["route-name".into()],
                categories,
                ..Selection::default()
            })
            .unwrap();
        assert!(!set.contains("route-name"));
        assert!(!set.contains("view-query"));
        assert!(set.contains("route-closure"));
    }

    #[test]
    fn test_overrides_and_unknown_names() {
        let reg = registry();
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "mass-assignment".to_string(),
            RuleOverride {
                enabled: None,
                severity: Some(Severity::Error),
            },
        );
        overrides.insert(
            "route-name".to_string(),
            RuleOverride {
                enabled: Some(false),
                severity: None,
            },
        );
        let set = reg
            .activate(&Selection {
                overrides,
                ..Selection::default()
            })
            .unwrap();
        assert_eq!(set.get("mass-assignment").unwrap().severity, Severity::Error);
        assert!(!set.contains("route-name"));

        let unknown = reg.activate(&Selection {
            only: vec!["mass-assigment".into()],
            ..Selection::default()
        });
        assert!(matches!(unknown, Err(ConfigError::UnknownRule(id)) if id == "mass-assigment"));

        let mut categories = BTreeMap::new();
        categories.insert("styling".to_string(), false);
        let bad_cat = reg.activate(&Selection {
            categories,
            ..Selection::default()
        });
        assert!(matches!(bad_cat, Err(ConfigError::UnknownCategory(_))));
    }
}
