//
// reconvert.rs
// reproin
//
// Re-runs heudiconv for already converted sub-*/ses-* folders from their sourcedata/ copy, inside `datalad run`.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{Config, STUDY_HEURISTIC};
use crate::error::ReproinError;
use crate::runner::CommandRunner;

/// A `sub-X[/ses-Y]` folder to reconvert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: String,
    pub subject: String,
    pub session: Option<String>,
}

impl Target {
    /// Accepts `sub-X`, `sub-X/ses-Y`, with or without a leading `sourcedata/`.
    pub fn parse(raw: &str) -> Result<Self> {
        let path = raw
            .trim_end_matches('/')
            .strip_prefix("sourcedata/")
            .unwrap_or(raw.trim_end_matches('/'))
            .to_string();
        let mut parts = path.split('/');
        let subject = parts
            .next()
            .and_then(|p| p.strip_prefix("sub-"))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReproinError::Precondition(format!("Folder {path} is not sub-*")))?
            .to_string();
        let session = parts
            .next()
            .and_then(|p| p.strip_prefix("ses-"))
            .map(str::to_string);
        Ok(Self {
            subject,
            session,
            path,
        })
    }

    /// `.heudiconv/` folder holding this subject/session's conversion state.
    pub fn heudiconv_dir(&self) -> String {
        match &self.session {
            Some(ses) => format!(".heudiconv/{}/ses-{ses}", self.subject),
            None => format!(".heudiconv/{}", self.subject),
        }
    }
}

/// Outputs to clear before reconverting: everything in the folder except physio recordings.
fn outputs_to_remove(dataset: &Path, target: &Target) -> Result<Vec<String>> {
    let dir = dataset.join(&target.path);
    let mut files: Vec<String> = fs::read_dir(&dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| !name.contains("physio"))
        .map(|name| format!("{}/{name}", target.path))
        .collect();
    files.sort();
    Ok(files)
}

/// The `datalad run` line that reconverts one folder.
pub fn reconvert_command(target: &Target, heuristic: &str, remove: &[String]) -> String {
    let path = &target.path;
    let hdir = target.heudiconv_dir();
    let mut ids = format!("-s {}", target.subject);
    if let Some(ses) = &target.session {
        ids.push_str(&format!(" -ss {ses}"));
    }
    let script = [
        format!("rm -rf {} {hdir}", remove.join(" ")),
        format!("mkdir -p '{hdir}'"),
        format!("mv sourcedata/{path} sourcedata/{path}.src"),
        format!(
            "heudiconv -f {heuristic} -c dcm2niix --bids -o . -l . {ids} --files sourcedata/{path}.src -g all >& {hdir}/heudiconv.log"
        ),
        format!(
            "if [ -e sourcedata/{path}.src/physio ] ; then mkdir -p sourcedata/{path} && mv sourcedata/{path}.src/physio sourcedata/{path}/; fi"
        ),
        format!("rm -rf sourcedata/{path}.src"),
    ]
    .join(" && ");
    format!("datalad run -m 'Reconvert {path}' --input sourcedata/{path} bash -x -c \"{script}\"")
}

/// Reconvert the given folders of the BIDS dataset rooted at `dataset`.
pub fn sourcedata(
    config: &Config,
    runner: &dyn CommandRunner,
    dataset: &Path,
    paths: &[String],
) -> Result<()> {
    if !dataset.join("dataset_description.json").exists() {
        return Err(ReproinError::Precondition(
            "Run from the top directory of BIDS dataset".into(),
        )
        .into());
    }

    let mut targets = Vec::with_capacity(paths.len());
    for raw in paths {
        let target = Target::parse(raw)?;
        let pattern = dataset.join(&target.path).join("*_scans.tsv");
        let has_scans = glob::glob(&pattern.to_string_lossy())
            .map(|mut hits| hits.any(|hit| hit.is_ok()))
            .unwrap_or(false);
        if !has_scans {
            return Err(ReproinError::Precondition(format!(
                "{} lacks a _scans.tsv file. Make sure to point to sub-[/ses-] folders",
                target.path
            ))
            .into());
        }
        if !dataset.join("sourcedata").join(&target.path).exists() {
            return Err(ReproinError::Precondition(format!(
                "{} lacks entry under sourcedata/",
                target.path
            ))
            .into());
        }
        targets.push(target);
    }

    let heuristic = if dataset.join(STUDY_HEURISTIC).exists() {
        info!("Will use study specific heuristic");
        STUDY_HEURISTIC.to_string()
    } else {
        config.heuristic.clone()
    };

    info!("Will reconvert {} subject session folders", targets.len());
    for target in &targets {
        let remove = outputs_to_remove(dataset, target)?;
        runner.run_checked(&reconvert_command(target, &heuristic, &remove), dataset)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_accept_sourcedata_prefix_and_sessions() {
        let target = Target::parse("sourcedata/sub-01/ses-2/").expect("target");
        assert_eq!(target.path, "sub-01/ses-2");
        assert_eq!(target.subject, "01");
        assert_eq!(target.session.as_deref(), Some("2"));
        assert_eq!(target.heudiconv_dir(), ".heudiconv/01/ses-2");

        let target = Target::parse("sub-qa").expect("target");
        assert_eq!(target.session, None);
        assert!(Target::parse("derivatives/x").is_err());
    }

    #[test]
    fn command_keeps_physio_and_logs_heudiconv() {
        let target = Target::parse("sub-01").expect("target");
        let cmd = reconvert_command(&target, "reproin", &["sub-01/anat".to_string()]);
        assert!(cmd.starts_with("datalad run -m 'Reconvert sub-01' --input sourcedata/sub-01 bash -x -c \""));
        assert!(cmd.contains("rm -rf sub-01/anat .heudiconv/01 && "));
        assert!(cmd.contains("-l . -s 01 --files sourcedata/sub-01.src -g all >& .heudiconv/01/heudiconv.log"));
        assert!(cmd.contains("mv sourcedata/sub-01.src/physio sourcedata/sub-01/"));
        assert!(!cmd.contains("-ss"));
    }
}
