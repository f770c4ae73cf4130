//
// lists.rs
// reproin
//
// Maintains the per-month accession lists and checks the DICOM tree for accessions they are missing.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use glob::Pattern;
use once_cell::sync::Lazy;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::ReproinError;
use crate::manifest;
use crate::models::{GapReason, GapReport, LocatorCount, MonthTodo};
use crate::runner::{shell_quote, CommandOutput, CommandRunner};
use crate::study;

/// Years predating the scanner's naming conventions; never checked.
const IGNORED_YEARS: &[&str] = &["2016"];
const SCOUT_PATTERN: &str = "00*cout*";
const BACKUP_SUFFIX: &str = "_backup";

static SCOUT: Lazy<Pattern> = Lazy::new(|| Pattern::new(SCOUT_PATTERN).expect("valid pattern"));

/// A freshly written accession list and the organizer output behind it.
#[derive(Debug, Clone)]
pub struct ListUpdate {
    pub path: PathBuf,
    pub output: CommandOutput,
}

pub fn current_year() -> String {
    Local::now().format("%Y").to_string()
}

pub fn current_month() -> String {
    Local::now().format("%m").to_string()
}

/// Run heudiconv in `ls` mode over one month (or day) and store the listing.
pub fn update(
    config: &Config,
    runner: &dyn CommandRunner,
    year: &str,
    month: &str,
    day: &str,
) -> Result<ListUpdate> {
    let list_dir = config.list_dir();
    fs::create_dir_all(&list_dir)
        .with_context(|| format!("Failed to create {}", list_dir.display()))?;
    let path = list_dir.join(manifest::list_file_name(year, month, day));
    info!("updating {}", path.display());

    // The scout glob is left for the shell to expand.
    let command = format!(
        "{} -f {} --command ls --files {}/{year}/{month}/{day}/*/{SCOUT_PATTERN}",
        config.heudiconv_cmd(),
        shell_quote(&config.heuristic),
        shell_quote(&config.dicom_dir.to_string_lossy()),
    );
    let output = runner.run(&command, Path::new("."))?;
    if !output.success() {
        error!("Failed to update lists: {}", output.stderr.trim());
        return Err(ReproinError::CommandFailed {
            command,
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        }
        .into());
    }

    fs::write(&path, &output.stdout)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(ListUpdate { path, output })
}

/// Update the current month and count the study locators it mentions.
pub fn update_summary(config: &Config, runner: &dyn CommandRunner) -> Result<Vec<LocatorCount>> {
    let update = update(config, runner, &current_year(), &current_month(), "*")?;
    let combined = format!("{}\n{}", update.output.stdout, update.output.stderr);
    Ok(manifest::summarize_locators(&combined))
}

/// For every study seen this month, refresh its saved plan and convert if allowed.
pub fn update_study_shows(config: &Config, runner: &dyn CommandRunner) -> Result<()> {
    for LocatorCount { locator, count } in update_summary(config, runner)? {
        print!("{locator}: new={count} ");
        let summary = match study::show_save(config, runner, &locator) {
            Ok(summary) => summary,
            Err(err) => {
                error!("{locator}: {err:#}");
                continue;
            }
        };
        let pending = summary.map_or(0, |s| s.todo);
        if config.auto_conversion && pending > 0 {
            if let Err(err) = study::convert(config, runner, &locator, None) {
                error!("{locator}: conversion failed: {err:#}");
            }
        }
    }
    Ok(())
}

fn sorted_glob(pattern: &Path) -> Result<Vec<PathBuf>> {
    let pattern = pattern.to_string_lossy();
    let mut hits: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid pattern {pattern}"))?
        .filter_map(|entry| entry.ok())
        .collect();
    hits.sort();
    Ok(hits)
}

fn has_scouts_below(month_dir: &Path) -> Result<bool> {
    Ok(!sorted_glob(&month_dir.join("*").join("*").join(SCOUT_PATTERN))?.is_empty())
}

/// Does the accession folder contain scouts? Errors (permissions) are returned as is.
fn scouts_in(accession: &Path) -> std::io::Result<bool> {
    for entry in fs::read_dir(accession)? {
        if SCOUT.matches(&entry?.file_name().to_string_lossy()) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn owning_group(runner: &dyn CommandRunner, path: &Path) -> String {
    let command = format!("stat -c %G {}", shell_quote(&path.to_string_lossy()));
    match runner.run(&command, Path::new(".")) {
        Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
            output.stdout.trim().to_string()
        }
        _ => "unknown".to_string(),
    }
}

fn is_redundant_backup(accession: &Path) -> bool {
    let name = accession.to_string_lossy();
    match name.strip_suffix(BACKUP_SUFFIX) {
        Some(original) => Path::new(original).exists(),
        None => false,
    }
}

/// Does the list mention `accession` as a whole path (itself or something under it)?
fn is_listed(listed: &str, accession: &str) -> bool {
    listed.match_indices(accession).any(|(pos, hit)| {
        match listed[pos + hit.len()..].chars().next() {
            None => true,
            Some(next) => next == '/' || next.is_whitespace(),
        }
    })
}

/// Compare `{DICOM_DIR}/{year}/{month}` folders against their lists.
pub fn check(
    config: &Config,
    runner: &dyn CommandRunner,
    year: &str,
    month: &str,
) -> Result<GapReport> {
    let mut report = GapReport::default();
    let list_dir = config.list_dir();

    for month_dir in sorted_glob(&config.dicom_dir.join(year).join(month))? {
        if !month_dir.is_dir() {
            continue;
        }
        let m = file_name(&month_dir);
        let y = month_dir.parent().map(file_name).unwrap_or_default();
        if IGNORED_YEARS.contains(&y.as_str()) {
            continue;
        }

        let list = list_dir.join(manifest::list_file_name(&y, &m, "*"));
        if !list.exists() {
            println!("I: no {}", list.display());
            if has_scouts_below(&month_dir)? {
                println!("E: there were legitimatish accession folders with scouts!");
                report.todo.push(MonthTodo {
                    year: y,
                    month: m,
                    reason: GapReason::Scouts,
                });
            }
            continue;
        }
        let listed = fs::read_to_string(&list)
            .with_context(|| format!("Failed to read {}", list.display()))?;

        let mut missing_here = false;
        for accession in sorted_glob(&month_dir.join("*").join("*"))? {
            if !accession.is_dir() {
                continue;
            }
            if is_redundant_backup(&accession) {
                println!("skip odd backup {} for which original also exists", accession.display());
                continue;
            }
            let shown = accession.to_string_lossy().to_string();
            match scouts_in(&accession) {
                Ok(false) => {
                    debug!("no scouts under {shown}");
                }
                Ok(true) if is_listed(&listed, &shown) => {}
                Ok(true) => {
                    println!("{shown} is missing: unknown");
                    report.missing.push(accession);
                    missing_here = true;
                }
                Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                    if is_listed(&listed, &shown) {
                        continue;
                    }
                    let group = owning_group(runner, &accession);
                    println!("{shown} is missing: permissions? group {group}");
                    report.permission_groups.entry(group).or_default().push(accession);
                }
                Err(err) => {
                    debug!("cannot inspect {shown}: {err}");
                }
            }
        }

        if missing_here {
            report.todo.push(MonthTodo {
                year: y,
                month: m,
                reason: GapReason::Missing,
            });
        }
    }

    Ok(report)
}

pub fn print_report(report: &GapReport) {
    if !report.todo.is_empty() {
        println!("List of TODOs:");
        for todo in &report.todo {
            println!("reproin lists update {} {}", todo.year, todo.month);
        }
    }
    if !report.permission_groups.is_empty() {
        let groups: Vec<&str> = report.permission_groups.keys().map(String::as_str).collect();
        println!(
            "List of groups for which permissions fail: {}",
            groups.join(", ")
        );
        for (group, accessions) in &report.permission_groups {
            let shown: Vec<String> = accessions.iter().map(|a| a.display().to_string()).collect();
            println!("  {group}: {}", shown.join(" "));
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
