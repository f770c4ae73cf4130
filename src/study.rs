//
// study.rs
// reproin
//
// Study-level workflows: create the datalad dataset, show/save/summarize the conversion plan, run conversions.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{error, info};

use crate::config::Config;
use crate::error::ReproinError;
use crate::models::ShowSummary;
use crate::plan::{self, StudyPlan};
use crate::runner::{shell_quote, CommandRunner};
use crate::{setup, validate};

const SHOW_SCRIPT: &str = ".git/study-show.sh";
const SHOW_STDERR: &str = ".git/study-show.stderr";
const NFS_IGNORE: &str = ".nfs*";

/// Print the plan: script lines on stdout, diagnostics on stderr.
pub fn show(
    config: &Config,
    runner: &dyn CommandRunner,
    study: &str,
    target_sub: Option<&str>,
) -> Result<StudyPlan> {
    let plan = plan::plan_study(config, runner, study, target_sub)?;
    for line in &plan.diagnostics {
        eprintln!("{line}");
    }
    print!("{}", plan.script());
    Ok(plan)
}

/// Create the study dataset (and any missing parents) inside the BIDS root.
pub fn create(config: &Config, runner: &dyn CommandRunner, study: &str) -> Result<()> {
    let study_dir = config.study_dir(study);
    if study_dir.exists() {
        return Err(ReproinError::StudyExists {
            study: study.to_string(),
        }
        .into());
    }

    if !config.bids_dir.exists() {
        runner.run_checked(
            &format!(
                "datalad create -c text2git {}",
                shell_quote(&config.bids_dir.to_string_lossy())
            ),
            Path::new("."),
        )?;
    }

    let parts: Vec<&str> = study.split('/').filter(|p| !p.is_empty()).collect();
    let mut cwd = config.bids_dir.clone();
    for (idx, part) in parts.iter().enumerate() {
        let target = cwd.join(part);
        if !target.exists() {
            let quoted = shell_quote(part);
            let command = if idx + 1 == parts.len() {
                format!("datalad create --fake-dates -d . {quoted}")
            } else {
                format!("datalad create -c text2git -d . {quoted}")
            };
            runner.run_checked(&command, &cwd)?;

            if ensure_nfs_ignored(&target)? {
                runner.run_checked(
                    &format!("datalad save -d {quoted} -m 'ignore .nfs* files' {quoted}/.gitignore"),
                    &cwd,
                )?;
            }
        }
        cwd = target;
    }

    runner.run_checked(
        &format!(
            "datalad -c datalad.locations.user-procedures={} run-procedure cfg_reproin_bids",
            shell_quote(&config.resources_dir.to_string_lossy())
        ),
        &study_dir,
    )?;
    runner.run_checked("git tag -m 'The beginning' 0.0.0", &study_dir)?;

    setup::containers(config, runner, &study_dir)?;
    setup::devel_reproin(runner, &study_dir)?;
    show_save(config, runner, study)?;
    Ok(())
}

/// Append `.nfs*` to the dataset's `.gitignore`; true when the file changed.
fn ensure_nfs_ignored(dataset: &Path) -> Result<bool> {
    let gitignore = dataset.join(".gitignore");
    let current = fs::read_to_string(&gitignore).unwrap_or_default();
    if current.lines().any(|line| line.trim() == NFS_IGNORE) {
        return Ok(false);
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore)
        .with_context(|| format!("Failed to open {}", gitignore.display()))?;
    if !current.is_empty() && !current.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{NFS_IGNORE}")?;
    Ok(true)
}

/// Store the current plan under `.git/` and print its summary.
///
/// Returns `None` when the study has no dataset yet (and auto-creation is off or failed).
pub fn show_save(
    config: &Config,
    runner: &dyn CommandRunner,
    study: &str,
) -> Result<Option<ShowSummary>> {
    let study_dir = config.study_dir(study);
    if !study_dir.join(".git").exists() && config.auto_create_ds {
        println!("creating study directory");
        if let Err(err) = create(config, runner, study) {
            error!("failed to create {study}: {err:#}");
        }
    }
    if !study_dir.join(".git").exists() {
        println!("no studydir yet");
        return Ok(None);
    }

    let plan = plan::plan_study(config, runner, study, None)?;
    let script = study_dir.join(SHOW_SCRIPT);
    let stderr = study_dir.join(SHOW_STDERR);
    fs::write(&script, plan.script())
        .with_context(|| format!("Failed to write {}", script.display()))?;
    if plan.diagnostics.is_empty() {
        if stderr.exists() {
            fs::remove_file(&stderr)?;
        }
    } else {
        let mut text = plan.diagnostics.join("\n");
        text.push('\n');
        fs::write(&stderr, text).with_context(|| format!("Failed to write {}", stderr.display()))?;
    }

    let summary = show_summary(config, study)?;
    println!("{summary}");
    Ok(Some(summary))
}

/// Counters over a study-show script.
pub fn summarize_script(script: &str) -> ShowSummary {
    let lines: Vec<&str> = script.lines().collect();
    ShowSummary {
        todo: lines.iter().filter(|l| l.starts_with("heudiconv ")).count(),
        done: lines
            .iter()
            .filter(|l| l.starts_with("# ") && l.contains(" done  "))
            .count(),
        fixups: script.matches("!!!").count(),
        warnings: script.matches("WARNING: ").count(),
        ..Default::default()
    }
}

pub fn show_summary(config: &Config, study: &str) -> Result<ShowSummary> {
    let study_dir = config.study_dir(study);
    let script = study_dir.join(SHOW_SCRIPT);
    let stderr = study_dir.join(SHOW_STDERR);

    let mut summary = match fs::read_to_string(&script) {
        Ok(text) => {
            let mut summary = summarize_script(&text);
            summary.modified = modified_date(&script);
            summary.script = Some(script);
            summary
        }
        Err(_) => ShowSummary::default(),
    };
    if let Ok(text) = fs::read_to_string(&stderr) {
        summary.stderrs = text.lines().count();
    }
    Ok(summary)
}

fn modified_date(path: &Path) -> Option<String> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let modified: DateTime<Local> = modified.into();
    Some(modified.format("%Y-%m-%d").to_string())
}

/// Run every pending conversion, then refresh the validator log.
pub fn convert(
    config: &Config,
    runner: &dyn CommandRunner,
    study: &str,
    target_sub: Option<&str>,
) -> Result<()> {
    let plan = plan::plan_study(config, runner, study, target_sub)?;
    for line in &plan.diagnostics {
        eprintln!("{line}");
    }

    for command in plan.commands() {
        info!("Running {command}");
        let output = runner.run(command, &plan.study_dir)?;
        if !output.success() {
            error!("Conversion failed: {}", output.stderr.trim());
            return Err(ReproinError::CommandFailed {
                command: command.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
    }

    match validate::save(config, runner, study) {
        Ok(_) => validate::print_summary(&validate::summary(config, study)?),
        Err(err) => error!("validator did not run: {err:#}"),
    }
    Ok(())
}
