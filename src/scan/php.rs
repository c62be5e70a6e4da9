//! Fact extraction for PHP units: classes, route files, and migrations.

use crate::models::facts::{FactSet, Member, UnitKind};
use crate::scan::syntax::{
    arguments, line_of, named_children, of_kind, short_name, string_value, Source,
};
use regex::Regex;
use std::sync::OnceLock;
use tree_sitter::Node;

const RELATIONS: [&str; 11] = [
    "hasOne",
    "hasMany",
    "belongsTo",
    "belongsToMany",
    "hasOneThrough",
    "hasManyThrough",
    "morphTo",
    "morphOne",
    "morphMany",
    "morphToMany",
    "morphedByMany",
];
const DB_TRAITS: [&str; 4] = [
    "RefreshDatabase",
    "LazilyRefreshDatabase",
    "DatabaseTransactions",
    "DatabaseMigrations",
];
const DB_WRITES: [&str; 12] = [
    "factory",
    "create",
    "insert",
    "save",
    "post",
    "put",
    "patch",
    "delete",
    "postJson",
    "putJson",
    "patchJson",
    "deleteJson",
];
const ROUTE_VERBS: [&str; 12] = [
    "get",
    "post",
    "put",
    "patch",
    "delete",
    "options",
    "any",
    "match",
    "resource",
    "apiResource",
    "view",
    "redirect",
];
const CLOSURES: [&str; 3] = ["anonymous_function", "anonymous_function_creation_expression", "arrow_function"];

fn service_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:Service|Repository|Manager|Client|Gateway)$")
            .unwrap_or_else(|e| panic!("invalid builtin regex: {e}"))
    })
}

fn role_for(rel: &str, name: &str, extends: Option<&str>) -> &'static str {
    let parent = extends.unwrap_or("");
    if rel.starts_with("tests/") || parent.ends_with("TestCase") || name.ends_with("Test") {
        "test"
    } else if rel.starts_with("app/Models/")
        || matches!(parent, "Model" | "Authenticatable" | "Pivot")
    {
        "model"
    } else if rel.starts_with("app/Http/Controllers/") || parent == "Controller" {
        "controller"
    } else {
        "class"
    }
}

/// Name of a call: `name` field of member/scoped calls, `function` of plain calls.
fn call_name<'s>(src: &Source<'s>, call: Node<'_>) -> &'s str {
    let field = match call.kind() {
        "function_call_expression" => "function",
        _ => "name",
    };
    call.child_by_field_name(field)
        .map_or("", |n| src.text(n))
}

/// `$this->name(...)`.
fn is_this_call(src: &Source<'_>, call: Node<'_>, names: &[&str]) -> bool {
    call.kind() == "member_call_expression"
        && call
            .child_by_field_name("object")
            .is_some_and(|o| src.text(o) == "$this")
        && names.contains(&call_name(src, call))
}

fn calls(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    if matches!(
        node.kind(),
        "member_call_expression" | "scoped_call_expression" | "function_call_expression"
    ) {
        out.push(node);
    }
    out.extend(crate::scan::syntax::descendants(node).into_iter().filter(|n| {
        matches!(
            n.kind(),
            "member_call_expression" | "scoped_call_expression" | "function_call_expression"
        )
    }));
    out
}

fn first_string_arg<'s>(src: &Source<'s>, call: Node<'_>) -> Option<&'s str> {
    arguments(call).into_iter().find_map(|a| string_value(src, a))
}

/// One fact set per `class` declaration in the file.
pub fn extract_classes(rel: &str, src: &Source<'_>) -> Vec<FactSet> {
    of_kind(src.root(), "class_declaration")
        .into_iter()
        .map(|class| class_facts(rel, src, class))
        .collect()
}

fn class_facts(rel: &str, src: &Source<'_>, class: Node<'_>) -> FactSet {
    let name = class
        .child_by_field_name("name")
        .map_or("", |n| src.text(n))
        .to_string();
    let extends = named_children(class)
        .into_iter()
        .find(|c| c.kind() == "base_clause")
        .and_then(|b| named_children(b).into_iter().next())
        .map(|p| short_name(src.text(p)).to_string());
    let role = role_for(rel, &name, extends.as_deref());

    let mut fs = FactSet::new(UnitKind::Class, name.as_str(), rel, line_of(class));
    fs.set_text("name", name.as_str());
    fs.set_text("role", role);
    if let Some(parent) = extends.as_deref() {
        fs.set_text("extends", parent);
    }
    for key in ["relationships", "instantiations", "env_calls", "middleware_calls"] {
        fs.declare_members(key);
    }

    let mut fillable = false;
    let mut guarded = false;
    let mut traits: Vec<String> = Vec::new();
    let body = class.child_by_field_name("body");
    for member in body.map(named_children).unwrap_or_default() {
        match member.kind() {
            "property_declaration" => {
                for var in of_kind(member, "variable_name") {
                    match src.text(var) {
                        "$fillable" => fillable = true,
                        "$guarded" => guarded = true,
                        _ => {}
                    }
                }
            }
            "use_declaration" => {
                traits.extend(
                    named_children(member)
                        .into_iter()
                        .filter(|n| matches!(n.kind(), "name" | "qualified_name"))
                        .map(|n| short_name(src.text(n)).to_string()),
                );
            }
            "method_declaration" => method_facts(&mut fs, src, member),
            _ => {}
        }
    }

    for call in calls(class) {
        if call.kind() == "function_call_expression" && call_name(src, call) == "env" {
            let key = first_string_arg(src, call).unwrap_or("env");
            fs.push_member("env_calls", Member::new(key, line_of(call)));
        }
    }

    fs.set_flag("fillable", fillable);
    fs.set_flag("guarded", guarded);
    if role == "test" {
        fs.set_flag("writes_database", writes_database(src, class));
        fs.set_flag(
            "refreshes_database",
            traits.iter().any(|t| DB_TRAITS.contains(&t.as_str())),
        );
    }
    fs
}

fn method_facts(fs: &mut FactSet, src: &Source<'_>, method: Node<'_>) {
    let name = method
        .child_by_field_name("name")
        .map_or("", |n| src.text(n));
    let Some(body) = method.child_by_field_name("body") else {
        return;
    };
    let body_calls = calls(body);
    if body_calls.iter().any(|c| is_this_call(src, *c, &RELATIONS)) {
        let returns = of_kind(body, "return_statement")
            .into_iter()
            .any(|r| calls(r).iter().any(|c| is_this_call(src, *c, &RELATIONS)));
        fs.push_member(
            "relationships",
            Member::new(name, line_of(method)).tagged("returns", returns),
        );
    }
    if name == "__construct" {
        for call in body_calls.iter().filter(|c| is_this_call(src, **c, &["middleware"])) {
            let arg = first_string_arg(src, *call).unwrap_or("middleware");
            fs.push_member("middleware_calls", Member::new(arg, line_of(*call)));
        }
    } else {
        for created in of_kind(body, "object_creation_expression") {
            let class = named_children(created)
                .into_iter()
                .find(|n| matches!(n.kind(), "name" | "qualified_name"))
                .map(|n| short_name(src.text(n)));
            if let Some(class) = class.filter(|c| service_re().is_match(c)) {
                fs.push_member("instantiations", Member::new(class, line_of(created)));
            }
        }
    }
}

fn writes_database(src: &Source<'_>, class: Node<'_>) -> bool {
    calls(class).into_iter().any(|c| match c.kind() {
        "member_call_expression" => DB_WRITES.contains(&call_name(src, c)),
        "scoped_call_expression" => {
            let name = call_name(src, c);
            let scope = c.child_by_field_name("scope").map_or("", |s| src.text(s));
            DB_WRITES.contains(&name) || (short_name(scope) == "DB" && name == "table")
        }
        _ => false,
    })
}

fn file_stem(rel: &str) -> &str {
    rel.rsplit('/')
        .next()
        .unwrap_or(rel)
        .trim_end_matches(".php")
}

/// A route file: one member per `Route::<verb>(...)` call.
pub fn extract_routes(rel: &str, src: &Source<'_>) -> FactSet {
    let mut fs = FactSet::new(UnitKind::RouteList, file_stem(rel), rel, 1);
    fs.declare_members("routes");

    for call in of_kind(src.root(), "scoped_call_expression") {
        let scope = call.child_by_field_name("scope").map_or("", |s| src.text(s));
        let verb = call_name(src, call);
        if short_name(scope) != "Route" || !ROUTE_VERBS.contains(&verb) {
            continue;
        }
        let uri = first_string_arg(src, call).unwrap_or("");
        let auto_named = matches!(verb, "resource" | "apiResource");
        let label = if auto_named {
            format!("RESOURCE {}", uri)
        } else {
            format!("{} {}", verb.to_uppercase(), uri)
        };
        let chained = chain_above(src, call);
        let closure = arguments(call).iter().any(|a| CLOSURES.contains(&a.kind()));
        let member = Member::new(label, line_of(call))
            .tagged(
                "named",
                auto_named || chained.iter().any(|m| matches!(*m, "name" | "names")),
            )
            .tagged("closure", closure)
            .tagged("middleware", chained.contains(&"middleware"));
        fs.push_member("routes", member);
    }
    fs
}

/// Methods chained onto `call`: `Route::get(...)->name(...)->middleware(...)`.
fn chain_above<'s>(src: &Source<'s>, call: Node<'_>) -> Vec<&'s str> {
    let mut out = Vec::new();
    let mut current = call;
    while let Some(parent) = current.parent() {
        let is_receiver = parent.kind() == "member_call_expression"
            && parent.child_by_field_name("object") == Some(current);
        if !is_receiver {
            break;
        }
        out.push(call_name(src, parent));
        current = parent;
    }
    out
}

/// A migration: whether it defines `up()` and `down()`.
pub fn extract_migration(rel: &str, src: &Source<'_>) -> FactSet {
    let root = src.root();
    let named = of_kind(root, "class_declaration").into_iter().next();
    let name = named
        .and_then(|c| c.child_by_field_name("name"))
        .map_or_else(|| file_stem(rel).to_string(), |n| src.text(n).to_string());
    let line = of_kind(root, "declaration_list")
        .into_iter()
        .next()
        .and_then(|body| body.parent())
        .map_or(1, line_of);
    let mut fs = FactSet::new(UnitKind::Migration, name, rel, line);
    let methods: Vec<&str> = of_kind(root, "method_declaration")
        .into_iter()
        .filter_map(|m| m.child_by_field_name("name"))
        .map(|n| src.text(n))
        .collect();
    fs.set_flag("up", methods.contains(&"up"));
    fs.set_flag("down", methods.contains(&"down"));
    fs
}
