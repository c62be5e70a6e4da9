//! Rule schema and evaluation.
//!
//! Rule packs are TOML files holding a `[[rules]]` array. Each rule names:
//! - `when`: the selector (unit `kind`, optional `role`, optional `paths` globs).
//! - `check`: a tagged predicate (`flags`, `member_missing`, `member_present`,
//!   `pattern`, or `tooling` for the built-in scan/rule failure rules).
//! - `message`: a template with `{name}`, `{member}`, `{file}`, `{value}`.
//!
//! Definitions are compiled into `Rule` once, at load time. Evaluation is pure.

use crate::error::{ConfigError, ConfigResult, RuleFault};
use crate::models::facts::{Attr, FactSet, Member, UnitKind};
use crate::models::{Category, Finding, Severity};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const PLACEHOLDERS: [&str; 4] = ["name", "member", "file", "value"];

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
/// Top-level rule pack.
pub struct RulePack {
    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
/// A rule entry as written in a rule pack.
pub struct RuleDef {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub when: Option<SelectorDef>,
    pub check: CheckDef,
}

#[derive(Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SelectorDef {
    pub kind: UnitKind,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Detection predicates supported by the engine.
pub enum CheckDef {
    Flags {
        flags: BTreeMap<String, bool>,
    },
    MemberMissing {
        collection: String,
        tag: String,
    },
    MemberPresent {
        collection: String,
        #[serde(default)]
        tag: Option<String>,
    },
    Pattern {
        attribute: String,
        regex: String,
        #[serde(default = "default_must_match")]
        must_match: bool,
    },
    Tooling,
}

fn default_must_match() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct Selector {
    pub kind: UnitKind,
    pub role: Option<String>,
    pub paths: Vec<glob::Pattern>,
}

impl Selector {
    pub fn matches(&self, unit: &FactSet) -> bool {
        if unit.kind != self.kind {
            return false;
        }
        if let Some(role) = self.role.as_deref() {
            if unit.text("role") != Some(role) {
                return false;
            }
        }
        self.paths.is_empty() || self.paths.iter().any(|p| p.matches(&unit.file))
    }
}

#[derive(Debug, Clone)]
pub enum Check {
    Flags(BTreeMap<String, bool>),
    MemberMissing { collection: String, tag: String },
    MemberPresent { collection: String, tag: Option<String> },
    Pattern { attribute: String, regex: Regex, must_match: bool },
    Tooling,
}

#[derive(Debug, Clone)]
/// A validated, immutable rule.
pub struct Rule {
    pub id: String,
    pub title: String,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    pub remediation: String,
    pub selector: Option<Selector>,
    pub check: Check,
}

impl Rule {
    /// Validate and compile a definition.
    pub fn compile(def: RuleDef) -> ConfigResult<Rule> {
        let invalid = |reason: String| ConfigError::InvalidRule {
            id: def.id.clone(),
            reason,
        };
        if def.id.is_empty()
            || !def
                .id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid("id must be non-empty [a-z0-9-]".into()));
        }
        if def.title.trim().is_empty() {
            return Err(invalid("title is empty".into()));
        }
        if def.message.trim().is_empty() {
            return Err(invalid("message is empty".into()));
        }
        for ph in placeholders(&def.message).map_err(invalid)? {
            if !PLACEHOLDERS.contains(&ph) {
                return Err(invalid(format!("unknown placeholder '{{{}}}' in message", ph)));
            }
        }

        let check = match def.check {
            CheckDef::Flags { flags } => {
                if flags.is_empty() {
                    return Err(invalid("flags check lists no flags".into()));
                }
                Check::Flags(flags)
            }
            CheckDef::MemberMissing { collection, tag } => {
                if collection.is_empty() || tag.is_empty() {
                    return Err(invalid("member_missing needs a collection and a tag".into()));
                }
                Check::MemberMissing { collection, tag }
            }
            CheckDef::MemberPresent { collection, tag } => {
                if collection.is_empty() {
                    return Err(invalid("member_present needs a collection".into()));
                }
                Check::MemberPresent { collection, tag }
            }
            CheckDef::Pattern {
                attribute,
                regex,
                must_match,
            } => {
                let regex =
                    Regex::new(&regex).map_err(|e| invalid(format!("bad regex: {}", e)))?;
                Check::Pattern {
                    attribute,
                    regex,
                    must_match,
                }
            }
            CheckDef::Tooling => Check::Tooling,
        };

        let is_tooling = matches!(check, Check::Tooling);
        if is_tooling != (def.category == Category::Tooling) {
            return Err(invalid(
                "the tooling check and the tooling category go together".into(),
            ));
        }

        let selector = match def.when {
            Some(w) => {
                if is_tooling {
                    return Err(invalid("tooling rules take no 'when' selector".into()));
                }
                let mut paths = Vec::new();
                for p in w.paths {
                    let pat = glob::Pattern::new(&p).map_err(|e| ConfigError::InvalidGlob {
                        pattern: p.clone(),
                        message: e.to_string(),
                    })?;
                    paths.push(pat);
                }
                Some(Selector {
                    kind: w.kind,
                    role: w.role,
                    paths,
                })
            }
            None if is_tooling => None,
            None => return Err(invalid("missing 'when' selector".into())),
        };

        Ok(Rule {
            id: def.id,
            title: def.title,
            category: def.category,
            severity: def.severity,
            message: def.message,
            remediation: def.remediation,
            selector,
            check,
        })
    }

    /// Evaluate this rule against one fact set.
    ///
    /// Units outside the selector, and units missing the attributes the check
    /// reads, yield no findings.
    pub fn evaluate(&self, unit: &FactSet) -> Result<Vec<Finding>, RuleFault> {
        let Some(selector) = self.selector.as_ref() else {
            return Ok(Vec::new());
        };
        if !selector.matches(unit) {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        match &self.check {
            Check::Flags(flags) => {
                for (key, want) in flags {
                    match unit.attr(key) {
                        None => return Ok(out),
                        Some(Attr::Flag(got)) => {
                            if got != want {
                                return Ok(out);
                            }
                        }
                        Some(other) => return Err(shape_fault(key, other, "flag")),
                    }
                }
                out.push(self.finding_at(&unit.file, unit.line, self.render(unit, "", "")));
            }
            Check::MemberMissing { collection, tag } => {
                for m in members_of(unit, collection)? {
                    if !m.has_tag(tag) {
                        out.push(self.finding_at(&unit.file, m.line, self.render(unit, &m.name, "")));
                    }
                }
            }
            Check::MemberPresent { collection, tag } => {
                for m in members_of(unit, collection)? {
                    if tag.as_deref().map_or(true, |t| m.has_tag(t)) {
                        out.push(self.finding_at(&unit.file, m.line, self.render(unit, &m.name, "")));
                    }
                }
            }
            Check::Pattern {
                attribute,
                regex,
                must_match,
            } => match unit.attr(attribute) {
                None => {}
                Some(Attr::Text(value)) => {
                    if regex.is_match(value) != *must_match {
                        out.push(self.finding_at(&unit.file, unit.line, self.render(unit, "", value)));
                    }
                }
                Some(other) => return Err(shape_fault(attribute, other, "text")),
            },
            Check::Tooling => {}
        }
        Ok(out)
    }

    /// Build a finding owned by this rule.
    pub fn finding_at(&self, file: &str, line: usize, message: String) -> Finding {
        Finding {
            rule_id: self.id.clone(),
            file: file.to_string(),
            line,
            severity: self.severity,
            message,
            category: self.category,
            faulted_rule: None,
        }
    }

    fn render(&self, unit: &FactSet, member: &str, value: &str) -> String {
        render_message(&self.message, &unit.name, member, &unit.file, value)
    }
}

fn members_of<'a>(unit: &'a FactSet, key: &str) -> Result<&'a [Member], RuleFault> {
    match unit.attr(key) {
        None => Ok(&[]),
        Some(Attr::Members(items)) => Ok(items.as_slice()),
        Some(other) => Err(shape_fault(key, other, "collection")),
    }
}

fn shape_fault(key: &str, found: &Attr, expected: &'static str) -> RuleFault {
    RuleFault::Shape {
        attribute: key.to_string(),
        found: found.shape(),
        expected,
    }
}

/// Placeholder names used by a template, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<&str>, String> {
    let mut out = Vec::new();
    let mut rest = template;
    loop {
        match (rest.find('{'), rest.find('}')) {
            (None, None) => return Ok(out),
            (None, Some(_)) => return Err("stray '}' in message".into()),
            (Some(open), Some(close)) if close < open => {
                return Err("stray '}' in message".into())
            }
            (Some(open), _) => {
                let after = &rest[open + 1..];
                let close = after
                    .find('}')
                    .ok_or_else(|| "unclosed '{' in message".to_string())?;
                let name = &after[..close];
                if name.contains('{') {
                    return Err("nested '{' in message".into());
                }
                out.push(name);
                rest = &after[close + 1..];
            }
        }
    }
}

/// Substitute the known placeholders in one left-to-right pass, so braces
/// inside substituted values are never expanded again.
pub fn render_message(template: &str, name: &str, member: &str, file: &str, value: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        match &after[..close] {
            "name" => out.push_str(name),
            "member" => out.push_str(member),
            "file" => out.push_str(file),
            "value" => out.push_str(value),
            _ => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(toml_src: &str) -> RuleDef {
        let pack: RulePack = toml::from_str(toml_src).unwrap();
        pack.rules.into_iter().next().unwrap()
    }

    const MASS: &str = r#"
[[rules]]
id = "mass-assignment"
title = "Guard models"
category = "database"
severity = "warning"
message = "Model {name} declares neither $fillable nor $guarded"
[rules.when]
kind = "class"
role = "model"
[rules.check]
kind = "flags"
flags = { fillable = false, guarded = false }
"#;

    fn model(fillable: Option<bool>, guarded: Option<bool>) -> FactSet {
        let mut fs = FactSet::new(UnitKind::Class, "Post", "app/Models/Post.php", 7);
        fs.set_text("role", "model");
        if let Some(f) = fillable {
            fs.set_flag("fillable", f);
        }
        if let Some(g) = guarded {
            fs.set_flag("guarded", g);
        }
        fs
    }

    #[test]
    fn test_flags_check_matches_only_when_all_flags_agree() {
        let rule = Rule::compile(def(MASS)).unwrap();
        let hits = rule.evaluate(&model(Some(false), Some(false))).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 7);
        assert_eq!(hits[0].severity, Severity::Warning);
        assert_eq!(hits[0].message, "Model Post declares neither $fillable nor $guarded");
        assert!(rule.evaluate(&model(Some(true), Some(false))).unwrap().is_empty());
    }

    #[test]
    fn test_missing_attributes_are_not_violations() {
        let rule = Rule::compile(def(MASS)).unwrap();
        assert!(rule.evaluate(&model(None, Some(false))).unwrap().is_empty());
        assert!(rule.evaluate(&model(None, None)).unwrap().is_empty());
        let mut not_model = model(Some(false), Some(false));
        not_model.set_text("role", "controller");
        assert!(rule.evaluate(&not_model).unwrap().is_empty());
    }

    #[test]
    fn test_member_missing_reports_each_member() {
        let rule = Rule::compile(def(
            r#"
[[rules]]
id = "relationship-return"
title = "Return relations"
category = "database"
severity = "error"
message = "{member} in {name} does not return its relation"
[rules.when]
kind = "class"
[rules.check]
kind = "member_missing"
collection = "relationships"
tag = "returns"
"#,
        ))
        .unwrap();
        let mut fs = FactSet::new(UnitKind::Class, "User", "app/Models/User.php", 3);
        fs.push_member("relationships", Member::new("posts", 10));
        fs.push_member("relationships", Member::new("team", 15).tagged("returns", true));
        fs.push_member("relationships", Member::new("roles", 20));
        let hits = rule.evaluate(&fs).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].line, 10);
        assert_eq!(hits[0].message, "posts in User does not return its relation");
        assert_eq!(hits[1].line, 20);
    }

    #[test]
    fn test_wrong_attribute_shape_is_a_fault() {
        let rule = Rule::compile(def(MASS)).unwrap();
        let mut fs = model(None, Some(false));
        fs.set_text("fillable", "yes");
        let err = rule.evaluate(&fs).unwrap_err();
        assert!(err.to_string().contains("fillable"));
    }

    #[test]
    fn test_pattern_check_and_paths_selector() {
        let rule = Rule::compile(def(
            r#"
[[rules]]
id = "controller-suffix"
title = "Suffix"
category = "architecture"
severity = "warning"
message = "{value} should end with Controller"
[rules.when]
kind = "class"
paths = ["app/Http/Controllers/**"]
[rules.check]
kind = "pattern"
attribute = "name"
regex = "Controller$"
"#,
        ))
        .unwrap();
        let mut fs = FactSet::new(UnitKind::Class, "Users", "app/Http/Controllers/Users.php", 4);
        fs.set_text("name", "Users");
        let hits = rule.evaluate(&fs).unwrap();
        assert_eq!(hits[0].message, "Users should end with Controller");
        fs.file = "app/Services/Users.php".into();
        assert!(rule.evaluate(&fs).unwrap().is_empty());
    }

    #[test]
    fn test_compile_rejects_bad_definitions() {
        let bad_placeholder = MASS.replace("Model {name}", "Model {klass}");
        assert!(Rule::compile(def(&bad_placeholder)).is_err());
        let bad_id = MASS.replace("mass-assignment", "Mass_Assignment");
        assert!(Rule::compile(def(&bad_id)).is_err());
        let empty_flags = MASS.replace("flags = { fillable = false, guarded = false }", "flags = {}");
        assert!(Rule::compile(def(&empty_flags)).is_err());
        let tooling_category = MASS.replace("category = \"database\"", "category = \"tooling\"");
        assert!(Rule::compile(def(&tooling_category)).is_err());
    }

    #[test]
    fn test_placeholders_parsing() {
        assert_eq!(placeholders("a {name} b {member}").unwrap(), vec!["name", "member"]);
        assert!(placeholders("a {name").is_err());
        assert!(placeholders("a } b").is_err());
        assert!(placeholders("a } b {name}").is_err());
        assert!(placeholders("a {na{me} b").is_err());
    }

    #[test]
    fn test_render_message_does_not_expand_substituted_text() {
        let out = render_message(
            "{file} could not be scanned: {value}",
            "",
            "",
            "app/{value}.php",
            "bad {file}",
        );
        assert_eq!(out, "app/{value}.php could not be scanned: bad {file}");
        assert_eq!(render_message("{other} {name}", "A", "", "", ""), "{other} A");
    }
}
