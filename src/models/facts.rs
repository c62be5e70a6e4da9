//! Fact sets: the structural summary the scanner extracts from one source unit.
//!
//! A fact set carries a bag of named attributes. Rules only ever read them;
//! a rule that asks for an attribute the scanner did not record must treat
//! that as "no information" rather than as a violation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// What kind of source unit a fact set describes.
pub enum UnitKind {
    Class,
    RouteList,
    Migration,
    View,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Class => "class",
            UnitKind::RouteList => "route-list",
            UnitKind::Migration => "migration",
            UnitKind::View => "view",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One item inside a collection attribute (a route, a relationship method...).
pub struct Member {
    pub name: String,
    pub line: usize,
    pub tags: BTreeSet<String>,
}

impl Member {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Member {
            name: name.into(),
            line,
            tags: BTreeSet::new(),
        }
    }

    pub fn tagged(mut self, tag: &str, on: bool) -> Self {
        if on {
            self.tags.insert(tag.to_string());
        }
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    Flag(bool),
    Text(String),
    Members(Vec<Member>),
}

impl Attr {
    pub fn shape(&self) -> &'static str {
        match self {
            Attr::Flag(_) => "flag",
            Attr::Text(_) => "text",
            Attr::Members(_) => "collection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactSet {
    pub kind: UnitKind,
    pub name: String,
    /// Path relative to the audit root, `/`-separated.
    pub file: String,
    /// 1-based declaration line.
    pub line: usize,
    pub attrs: BTreeMap<String, Attr>,
}

impl FactSet {
    pub fn new(kind: UnitKind, name: impl Into<String>, file: impl Into<String>, line: usize) -> Self {
        FactSet {
            kind,
            name: name.into(),
            file: file.into(),
            line,
            attrs: BTreeMap::new(),
        }
    }

    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.attrs.insert(key.to_string(), Attr::Flag(value));
    }

    pub fn set_text(&mut self, key: &str, value: impl Into<String>) {
        self.attrs.insert(key.to_string(), Attr::Text(value.into()));
    }

    /// Declare an (initially empty) collection so rules can tell "none found"
    /// apart from "not extracted".
    pub fn declare_members(&mut self, key: &str) {
        self.attrs
            .entry(key.to_string())
            .or_insert_with(|| Attr::Members(Vec::new()));
    }

    pub fn push_member(&mut self, key: &str, member: Member) {
        match self
            .attrs
            .entry(key.to_string())
            .or_insert_with(|| Attr::Members(Vec::new()))
        {
            Attr::Members(items) => items.push(member),
            other => *other = Attr::Members(vec![member]),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&Attr> {
        self.attrs.get(key)
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.attrs.get(key) {
            Some(Attr::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.attrs.get(key) {
            Some(Attr::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn members(&self, key: &str) -> Option<&[Member]> {
        match self.attrs.get(key) {
            Some(Attr::Members(items)) => Some(items.as_slice()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_member_creates_collection() {
        let mut fs = FactSet::new(UnitKind::RouteList, "web", "routes/web.php", 1);
        assert!(fs.members("routes").is_none());
        fs.declare_members("routes");
        assert_eq!(fs.members("routes").map(|m| m.len()), Some(0));
        fs.push_member("routes", Member::new("GET /", 3).tagged("named", true));
        let routes = fs.members("routes").unwrap();
        assert_eq!(routes.len(), 1);
        assert!(routes[0].has_tag("named"));
        assert!(!routes[0].has_tag("closure"));
    }

    #[test]
    fn test_typed_accessors_ignore_other_shapes() {
        let mut fs = FactSet::new(UnitKind::Class, "User", "app/Models/User.php", 5);
        fs.set_flag("fillable", true);
        fs.set_text("role", "model");
        assert_eq!(fs.flag("fillable"), Some(true));
        assert_eq!(fs.text("fillable"), None);
        assert_eq!(fs.flag("role"), None);
        assert_eq!(fs.text("role"), Some("model"));
        assert_eq!(fs.attr("role").map(Attr::shape), Some("text"));
    }
}
