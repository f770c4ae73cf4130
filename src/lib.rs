//
// lib.rs
// reproin
//
// Exposes the crate's modules and re-exports the CLI entry point for both binary and library consumers.
//
// Thales Matheus Mendonça Santos - November 2025

// Public surface of the library: each module backs a CLI command group or shared plumbing.
pub mod accessions;
pub mod cli;
pub mod config;
pub mod error;
pub mod heudiconv;
pub mod lists;
pub mod manifest;
pub mod models;
pub mod plan;
pub mod reconvert;
pub mod runner;
pub mod setup;
pub mod study;
pub mod validate;

pub use cli::{run as run_cli, Cli, Commands};
