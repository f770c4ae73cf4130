//
// validate.rs
// reproin
//
// Wraps bids-validator: runs it on a study, keeps its log inside the dataset and summarizes the messages.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::config::{self, Config, VALIDATOR_CONFIG, VALIDATOR_CONFIG_FALLBACK, VALIDATOR_LOG};
use crate::error::ReproinError;
use crate::models::ValidatorSummary;
use crate::runner::{shell_quote, CommandRunner};

static MESSAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+: \[[A-Z]+\]").expect("valid regex"));

/// Directory the validator runs in: the study, or the current directory without one.
fn target_dir(config: &Config, study: Option<&str>) -> Result<PathBuf> {
    match study {
        Some(study) => {
            let dir = config.study_dir(study);
            if !dir.is_dir() {
                return Err(ReproinError::StudyNotFound(dir).into());
            }
            Ok(dir)
        }
        None => std::env::current_dir().context("Failed to resolve current directory"),
    }
}

fn validator_config(dir: &Path) -> Result<PathBuf> {
    let local = dir.join(VALIDATOR_CONFIG);
    if local.exists() {
        return Ok(local);
    }
    let fallback = config::home_dir()
        .map(|home| home.join(VALIDATOR_CONFIG_FALLBACK))
        .filter(|path| path.exists());
    fallback.ok_or_else(|| ReproinError::MissingPath(local).into())
}

/// Run bids-validator and return what it printed. Its exit status is not an error.
pub fn run(config: &Config, runner: &dyn CommandRunner, study: Option<&str>) -> Result<String> {
    let dir = target_dir(config, study)?;
    let cfg = validator_config(&dir)?;
    let command = format!(
        "bids-validator --verbose -c {} {}",
        shell_quote(&cfg.to_string_lossy()),
        shell_quote(&dir.to_string_lossy())
    );
    let output = runner.run(&command, &dir)?;
    if !output.success() {
        info!(code = output.code, "bids-validator reported problems");
    }
    Ok(output.stdout)
}

/// Replace the study's validator log with a fresh run and save it in the dataset.
pub fn save(config: &Config, runner: &dyn CommandRunner, study: &str) -> Result<PathBuf> {
    let dir = target_dir(config, Some(study))?;
    let log = config.validator_log(&dir);
    if log.exists() {
        fs::remove_file(&log).with_context(|| format!("Failed to remove {}", log.display()))?;
    }

    let output = run(config, runner, Some(study))?;
    if let Some(parent) = log.parent() {
        fs::create_dir_all(parent).context("Failed to create .heudiconv directory")?;
    }
    fs::write(&log, output).with_context(|| format!("Failed to write {}", log.display()))?;
    info!("Validator output in {}", log.display());

    let saved = runner.run(
        &format!("datalad save -d . -m 'New BIDS validator output' {VALIDATOR_LOG}"),
        &dir,
    )?;
    if !saved.success() {
        warn!(code = saved.code, "could not save validator log: {}", saved.stderr.trim());
    }
    Ok(log)
}

pub fn parse_summary(log: &str) -> ValidatorSummary {
    let messages: Vec<String> = log
        .lines()
        .filter(|line| MESSAGE.is_match(line))
        .map(|line| line.trim().to_string())
        .collect();
    let level = |tag: &str| messages.iter().filter(|m| m.contains(tag)).count();
    let errors = level("[ERR]");
    let warnings = level("[WARN]");
    ValidatorSummary {
        messages,
        errors,
        warnings,
    }
}

fn existing_log(config: &Config, study: &str) -> Result<PathBuf> {
    let log = config.validator_log(&config.study_dir(study));
    if !log.exists() {
        return Err(ReproinError::MissingPath(log).into());
    }
    Ok(log)
}

pub fn summary(config: &Config, study: &str) -> Result<ValidatorSummary> {
    let log = existing_log(config, study)?;
    let text = fs::read_to_string(&log)
        .with_context(|| format!("Failed to read {}", log.display()))?;
    Ok(parse_summary(&text))
}

pub fn print_summary(summary: &ValidatorSummary) {
    println!("# Errors/warnings from current state of the validator:");
    if summary.messages.is_empty() {
        println!("  no messages were found");
        return;
    }
    for message in &summary.messages {
        println!("  {message}");
    }
    println!("  errors={} warnings={}", summary.errors, summary.warnings);
}

/// Page through the validator log; returns the pager's exit code.
pub fn show(config: &Config, runner: &dyn CommandRunner, study: &str) -> Result<i32> {
    let log = existing_log(config, study)?;
    let log = log.to_string_lossy();
    runner.run_interactive(&config.pager, &[log.as_ref()], &config.study_dir(study))
}
