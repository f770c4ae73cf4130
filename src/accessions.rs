//
// accessions.rs
// reproin
//
// Skip-file bookkeeping and removal of converted subjects so they can be redone.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{Config, HEUDICONV_DIR, SKIP_FILE};
use crate::error::ReproinError;
use crate::heudiconv;
use crate::runner::{shell_quote, CommandRunner};

fn existing_study(config: &Config, study: &str) -> Result<PathBuf> {
    let dir = config.study_dir(study);
    if !dir.is_dir() {
        return Err(ReproinError::StudyNotFound(dir).into());
    }
    Ok(dir)
}

/// `accession[ reason]`, the line format of the skip file.
pub fn skip_line(accession: &str, reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("{accession} {reason}"),
        None => accession.to_string(),
    }
}

/// Append an accession to the study's skip file and save it.
pub fn accession_skip(
    config: &Config,
    runner: &dyn CommandRunner,
    study: &str,
    accession: &str,
    reason: Option<&str>,
) -> Result<()> {
    let study_dir = existing_study(config, study)?;
    let skip_file = config.skip_file(&study_dir);

    // An annexed skip file is a read-only symlink until unlocked.
    let is_link = fs::symlink_metadata(&skip_file)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false);
    if is_link {
        let unlocked = runner.run("git annex unlock sid-skip", &study_dir.join(HEUDICONV_DIR))?;
        if !unlocked.success() {
            warn!("git annex unlock failed: {}", unlocked.stderr.trim());
        }
    }

    if let Some(parent) = skip_file.parent() {
        fs::create_dir_all(parent).context("Failed to create .heudiconv directory")?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&skip_file)
        .with_context(|| format!("Failed to open {}", skip_file.display()))?;
    writeln!(file, "{}", skip_line(accession, reason))?;

    runner.run_checked(&format!("git annex add {SKIP_FILE}"), &study_dir)?;
    runner.run_checked(
        &format!("datalad save -d. -m 'skip an accession' {SKIP_FILE}"),
        &study_dir,
    )?;
    info!("{accession} added to {}", skip_file.display());
    Ok(())
}

/// Everything that belongs to one subject (or one of its sessions), relative to the study.
pub fn subject_paths(sid: &str, session: Option<&str>) -> Vec<String> {
    let suffix = session.map(|s| format!("/ses-{s}")).unwrap_or_default();
    vec![
        format!("sub-{sid}{suffix}"),
        format!("sourcedata/sub-{sid}{suffix}"),
        format!("{HEUDICONV_DIR}/{}", heudiconv::subses_id(sid, session)),
    ]
}

/// `git rm -r` the subject's outputs and heudiconv bookkeeping.
pub fn remove_subject(
    config: &Config,
    runner: &dyn CommandRunner,
    study: &str,
    sid: &str,
    session: Option<&str>,
) -> Result<()> {
    let study_dir = existing_study(config, study)?;
    remove_in(runner, &study_dir, sid, session)
}

fn remove_in(runner: &dyn CommandRunner, study_dir: &Path, sid: &str, session: Option<&str>) -> Result<()> {
    let present: Vec<String> = subject_paths(sid, session)
        .into_iter()
        .filter(|p| study_dir.join(p).exists())
        .collect();
    if present.is_empty() {
        return Err(ReproinError::Precondition(format!(
            "nothing to remove for sub-{sid} in {}",
            study_dir.display()
        ))
        .into());
    }

    let quoted: Vec<String> = present.iter().map(|p| shell_quote(p)).collect();
    runner.run_checked(&format!("git rm -r {}", quoted.join(" ")), study_dir)?;
    info!("removed {}", present.join(" "));
    Ok(())
}

/// Remove a converted subject and skip its source "to redo" with a fixed heuristic.
pub fn remove_subject2redo(
    config: &Config,
    runner: &dyn CommandRunner,
    study: &str,
    sid: &str,
    session: Option<&str>,
) -> Result<()> {
    let study_dir = existing_study(config, study)?;
    let id = heudiconv::subses_id(sid, session);
    let source = heudiconv::infodir_sourcepath(&study_dir, &id).ok_or_else(|| {
        ReproinError::Precondition(format!("Could not determine source path for {id}"))
    })?;

    remove_in(runner, &study_dir, sid, session)?;
    accession_skip(config, runner, study, &source.to_string_lossy(), Some("to redo"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_lines_drop_blank_reasons() {
        assert_eq!(skip_line("/d/A1", Some("bad run")), "/d/A1 bad run");
        assert_eq!(skip_line("/d/A1", Some("  ")), "/d/A1");
        assert_eq!(skip_line("/d/A1", None), "/d/A1");
    }

    #[test]
    fn subject_paths_cover_bids_sourcedata_and_heudiconv() {
        assert_eq!(
            subject_paths("01", Some("2")),
            vec!["sub-01/ses-2", "sourcedata/sub-01/ses-2", ".heudiconv/01/ses-2"]
        );
        assert_eq!(
            subject_paths("01", None),
            vec!["sub-01", "sourcedata/sub-01", ".heudiconv/01"]
        );
    }
}
