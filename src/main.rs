//
// main.rs
// reproin
//
// Entry point: loads `.env`, installs the tracing subscriber and hands off to the CLI layer.
//
// Thales Matheus Mendonça Santos - November 2025

use std::process::ExitCode;

use reproin::{cli, error};
use tracing_subscriber::prelude::*;

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Stdout carries command output; diagnostics go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("reproin=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = match cli::run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            error::exit_code_for(&err)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
