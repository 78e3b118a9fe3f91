//! folio command line front end
//!
//! Thin layer over [`folio_cache`]: argument parsing and config layering,
//! one-shot maintenance commands, and the `watch` scheduler that drives the
//! TTL sweep and size eviction on their intervals.

// CLI crate writes command output to stdout and diagnostics to stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

/// CLI argument parsing and exit codes.
pub mod cli;
/// One-shot command implementations.
pub mod commands;
/// Reading progress loaded from a JSON file.
pub mod progress;
/// Signal handling for long-running commands.
pub mod shutdown;
/// Tracing and logging configuration.
pub mod tracing;
/// Periodic sweep and eviction scheduler.
pub mod watch;
