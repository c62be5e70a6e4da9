//! idiom-audit core library.
//!
//! Static best-practice auditor for PHP web applications: scans a project
//! tree, extracts facts about classes, routes, migrations and Blade views,
//! and evaluates data-driven rule packs against them.
//!
//! High-level modules:
//! - `audit`: One run, driven through its phases.
//! - `cli`: CLI argument parsing (binary uses this).
//! - `config`: Discovery and effective configuration resolution.
//! - `engine`: Rule evaluation and deterministic report assembly.
//! - `error`: Error types.
//! - `logging`: `tracing` subscriber setup.
//! - `models`: Findings, reports, fact sets and rule definitions.
//! - `output`: Text/JSON rendering and report writing.
//! - `registry`: Rule pack loading, validation and selection.
//! - `scan`: Source tree walking and fact extraction.
pub mod audit;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod output;
pub mod registry;
pub mod scan;
