//
// plan.rs
// reproin
//
// Decides, for every accession a study owns, whether it is converted, skipped, conflicting or still to convert.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::{Config, STUDY_ANON_CMD, STUDY_HEURISTIC};
use crate::error::ReproinError;
use crate::heudiconv;
use crate::manifest::{self, ManifestRecord};
use crate::runner::{shell_quote, CommandRunner};

/// Entries of `.heudiconv/sid-skip`: `accession[ reason]` per line.
#[derive(Debug, Clone, Default)]
pub struct SkipList {
    entries: Vec<(String, Option<String>)>,
}

impl SkipList {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once(char::is_whitespace) {
                Some((path, reason)) => (path.to_string(), Some(reason.trim().to_string())),
                None => (line.to_string(), None),
            })
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read skip file {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn contains(&self, source: &str) -> bool {
        self.entries.iter().any(|(path, _)| path == source)
    }

    pub fn reason(&self, source: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(path, _)| path == source)
            .and_then(|(_, reason)| reason.as_deref())
    }
}

/// What happens to one accession of the study.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The accession line had no subject/session tuple after it.
    NoSessionInfo { source: String },
    /// Filtered out by the target-subject argument.
    OtherSubject {
        subject: String,
        session: Option<String>,
        target: String,
    },
    Skipped { source: String, label: String },
    /// The study's anon-cmd could not map the subject.
    AnonFailed { source: String, subject: String },
    /// The same source already went into another subject/session.
    DoneElsewhere {
        source: String,
        label: String,
        converted_into: Vec<String>,
        alert: String,
    },
    /// Identity seen earlier in this run.
    Duplicate { source: String, id: String },
    Done {
        source: String,
        label: String,
        alert: String,
    },
    Convert {
        source: String,
        command: String,
        options: String,
    },
}

impl Disposition {
    /// Line written to the study-show script, if the disposition shows up there at all.
    pub fn script_line(&self) -> Option<String> {
        match self {
            Disposition::NoSessionInfo { .. } | Disposition::AnonFailed { .. } => None,
            Disposition::OtherSubject {
                subject,
                session,
                target,
            } => Some(format!(
                "# Skipping {subject} session={} since {subject} != {target}",
                session.as_deref().unwrap_or("None")
            )),
            Disposition::Skipped { source, label } => Some(format!("# {source} skip  # {label}")),
            Disposition::DoneElsewhere {
                source,
                label,
                alert,
                ..
            }
            | Disposition::Done {
                source,
                label,
                alert,
            } => Some(format!("# {source} done  {label}{alert}")),
            Disposition::Duplicate { id, .. } => {
                Some(format!("# WARNING: {id} already known or converted"))
            }
            Disposition::Convert {
                command, options, ..
            } => Some(format!("{command} # {options}")),
        }
    }
}

/// Full outcome of inspecting one study.
#[derive(Debug, Clone, Default)]
pub struct StudyPlan {
    pub study_dir: PathBuf,
    pub entries: Vec<Disposition>,
    /// Messages meant for stderr (environment drift, anon-cmd failures).
    pub diagnostics: Vec<String>,
}

impl StudyPlan {
    pub fn script(&self) -> String {
        let mut out = String::new();
        for line in self.entries.iter().filter_map(Disposition::script_line) {
            let _ = writeln!(out, "{line}");
        }
        out
    }

    /// Converter command lines ready to run, in manifest order.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            Disposition::Convert { command, .. } => Some(command.as_str()),
            _ => None,
        })
    }
}

/// Inspect `study` against every month list and decide what to do with each accession.
pub fn plan_study(
    config: &Config,
    runner: &dyn CommandRunner,
    study: &str,
    target_sub: Option<&str>,
) -> Result<StudyPlan> {
    let study_dir = config.study_dir(study);
    if !study_dir.is_dir() {
        info!("no study directory yet - {}", study_dir.display());
        return Err(ReproinError::StudyNotFound(study_dir).into());
    }

    let mut plan = StudyPlan {
        study_dir: study_dir.clone(),
        ..Default::default()
    };
    check_dcm2niix_drift(runner, &study_dir, &mut plan.diagnostics);

    let heuristic = if study_dir.join(STUDY_HEURISTIC).exists() {
        info!("Will use study specific heuristic");
        STUDY_HEURISTIC.to_string()
    } else {
        config.heuristic.clone()
    };
    let anon_cmd = study_dir.join(STUDY_ANON_CMD);
    let anon_cmd = anon_cmd.exists().then_some(anon_cmd);
    let mut heudiconv_cmd = config.heudiconv_cmd();
    if anon_cmd.is_some() {
        info!("Will use study specific anon-cmd");
        heudiconv_cmd.push_str(&format!(" --anon-cmd '{STUDY_ANON_CMD}'"));
    }

    let skip = SkipList::load(&config.skip_file(&study_dir))?;
    let mut engine = Engine {
        study,
        study_dir: &study_dir,
        target_sub,
        runner,
        skip: &skip,
        anon_cmd: anon_cmd.as_deref(),
        convert_prefix: format!(
            "{heudiconv_cmd} -f {} -l {} --files",
            shell_quote(&heuristic),
            shell_quote(study)
        ),
        seen: HashSet::new(),
    };

    for list in manifest::month_lists(&config.list_dir())? {
        let text = fs::read_to_string(&list)
            .with_context(|| format!("Failed to read list {}", list.display()))?;
        for record in manifest::study_records(&text, study) {
            let entry = engine.decide(&record, &mut plan.diagnostics);
            plan.entries.push(entry);
        }
    }

    Ok(plan)
}

fn check_dcm2niix_drift(runner: &dyn CommandRunner, study_dir: &Path, diagnostics: &mut Vec<String>) {
    let used = heudiconv::study_conversion_versions(runner, study_dir);
    let Some(latest) = used.last() else {
        return;
    };
    if used.len() > 1 {
        diagnostics.push(format!(
            "W: Study already used multiple versions of dcm2niix: {}",
            used.join(", ")
        ));
    }
    if let Some(current) = heudiconv::dcm2niix_version(runner) {
        if &current != latest {
            diagnostics.push(format!(
                "W: Wrong environment - dcm2niix {current} when study used {latest}"
            ));
        }
    }
}

struct Engine<'a> {
    study: &'a str,
    study_dir: &'a Path,
    target_sub: Option<&'a str>,
    runner: &'a dyn CommandRunner,
    skip: &'a SkipList,
    anon_cmd: Option<&'a Path>,
    convert_prefix: String,
    seen: HashSet<String>,
}

impl Engine<'_> {
    fn decide(&mut self, record: &ManifestRecord, diagnostics: &mut Vec<String>) -> Disposition {
        let source = record.source.clone();
        let Some(info) = &record.info else {
            debug!(%source, study = self.study, "no subject/session line, skipping");
            return Disposition::NoSessionInfo { source };
        };
        let session = info.session.clone();
        let ses_label = session.as_deref().unwrap_or("None");

        if let Some(target) = self.target_sub {
            if info.subject != target {
                return Disposition::OtherSubject {
                    subject: info.subject.clone(),
                    session,
                    target: target.to_string(),
                };
            }
        }

        if self.skip.contains(&source) {
            if let Some(reason) = self.skip.reason(&source) {
                debug!(%source, reason, "skip-listed");
            }
            return Disposition::Skipped {
                source,
                label: format!("{} session={ses_label}", info.subject),
            };
        }

        let subject = match self.anonymize(&info.subject) {
            Ok(subject) => subject,
            Err(detail) => {
                let message = format!(
                    "ERROR: failed to get anonymized ID for {}, skipping: {detail}",
                    info.subject
                );
                debug!("{message}");
                diagnostics.push(message);
                return Disposition::AnonFailed {
                    source,
                    subject: info.subject.clone(),
                };
            }
        };

        let label = if subject == info.subject {
            format!("{subject} session={ses_label}")
        } else {
            format!("{subject} ({}) session={ses_label}", info.subject)
        };
        let mut options = format!("-s '{subject}'");
        if let Some(ses) = &session {
            options.push_str(&format!(" --ses '{ses}'"));
        }

        let id = heudiconv::subses_id(&subject, session.as_deref());
        let mut alert = String::new();
        if let Some(previous) = heudiconv::infodir_sourcepath(self.study_dir, &id) {
            if previous != Path::new(&source) {
                alert.push_str(&format!(" !!! came from {}", previous.display()));
            }
        }

        let elsewhere = heudiconv::converted_into(self.study_dir, &source, &id);
        if !elsewhere.is_empty() {
            alert.push_str(&format!(" !!! was converted into {}", elsewhere.join(" ")));
            return Disposition::DoneElsewhere {
                source,
                label,
                converted_into: elsewhere,
                alert,
            };
        }

        if !self.seen.insert(id.clone()) {
            return Disposition::Duplicate { source, id };
        }

        if heudiconv::info_dir(self.study_dir, &id).is_dir() {
            return Disposition::Done {
                source,
                label,
                alert,
            };
        }

        Disposition::Convert {
            command: format!("{} {}", self.convert_prefix, shell_quote(&source)),
            source,
            options,
        }
    }

    /// Map the subject through the study's anon-cmd, if it has one.
    fn anonymize(&self, subject: &str) -> std::result::Result<String, String> {
        let Some(anon_cmd) = self.anon_cmd else {
            return Ok(subject.to_string());
        };
        let command = format!(
            "{} {}",
            shell_quote(&anon_cmd.to_string_lossy()),
            shell_quote(subject)
        );
        match self.runner.run(&command, self.study_dir) {
            Ok(output) if output.success() && !output.stdout.trim().is_empty() => {
                Ok(output.stdout.trim().to_string())
            }
            Ok(output) => Err(format!("exit code {}: {}", output.code, output.stderr.trim())),
            Err(err) => Err(format!("{err:#}")),
        }
    }
}
