//! Fact extraction for Blade views.

use crate::error::ScanError;
use crate::models::facts::{FactSet, Member, UnitKind};
use crate::scan::syntax::Deadline;
use regex::Regex;
use std::sync::OnceLock;

fn query_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bDB::\w+\s*\(|\b[A-Z]\w*::(?:all|where\w*|find|findOrFail|query|paginate|first|count)\s*\(")
            .unwrap_or_else(|e| panic!("invalid builtin regex: {e}"))
    })
}

fn php_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@php\b|<\?php\b").unwrap_or_else(|e| panic!("invalid builtin regex: {e}"))
    })
}

/// Dotted view name: `resources/views/admin/users/index.blade.php` → `admin.users.index`.
pub fn view_name(rel: &str) -> String {
    let tail = match rel.find("views/") {
        Some(i) => &rel[i + "views/".len()..],
        None => rel,
    };
    tail.trim_end_matches(".blade.php").replace('/', ".")
}

/// Remove `{{-- ... --}}` comments, keeping line breaks so numbering holds.
fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(open) = rest.find("{{--") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 4..];
        match after.find("--}}") {
            Some(close) => {
                out.extend(after[..close].chars().filter(|c| *c == '\n'));
                rest = &after[close + 4..];
            }
            None => {
                out.extend(after.chars().filter(|c| *c == '\n'));
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn extract_view(rel: &str, src: &str, deadline: &Deadline) -> Result<FactSet, ScanError> {
    let cleaned = strip_comments(src);
    let mut fs = FactSet::new(UnitKind::View, view_name(rel), rel, 1);
    fs.declare_members("queries");
    fs.declare_members("php_blocks");
    for (i, line) in cleaned.lines().enumerate() {
        deadline.check()?;
        for m in query_re().find_iter(line) {
            let call = m.as_str().trim_end_matches('(').trim_end();
            fs.push_member("queries", Member::new(call, i + 1));
        }
        for m in php_block_re().find_iter(line) {
            fs.push_member("php_blocks", Member::new(m.as_str(), i + 1));
        }
    }
    Ok(fs)
}
