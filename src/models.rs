//
// models.rs
// reproin
//
// Serializable report structures printed by the summary commands (plain text or --json).
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How often a study locator showed up in organizer output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorCount {
    pub locator: String,
    pub count: usize,
}

impl std::fmt::Display for LocatorCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.count, self.locator)
    }
}

/// Counts extracted from a saved study-show script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowSummary {
    pub todo: usize,
    pub done: usize,
    pub fixups: usize,
    pub warnings: usize,
    pub stderrs: usize,
    pub script: Option<PathBuf>,
    /// Modification date of the script, `YYYY-MM-DD`.
    pub modified: Option<String>,
}

impl std::fmt::Display for ShowSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "todo={} done={}", self.todo, self.done)?;
        if self.fixups > 0 {
            write!(f, " fixups={}", self.fixups)?;
        }
        if self.warnings > 0 {
            write!(f, " warnings={}", self.warnings)?;
        }
        if self.stderrs > 0 {
            write!(f, " stderrs={}", self.stderrs)?;
        }
        if let (Some(script), Some(modified)) = (&self.script, &self.modified) {
            write!(f, " {} {}", script.display(), modified)?;
        }
        Ok(())
    }
}

/// `N: [LEVEL]` messages pulled out of a validator log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSummary {
    pub messages: Vec<String>,
    pub errors: usize,
    pub warnings: usize,
}

/// Result of comparing the DICOM tree with the accession lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    /// Months whose list needs an update, in walk order.
    pub todo: Vec<MonthTodo>,
    /// Owning group -> accessions we could not read.
    pub permission_groups: BTreeMap<String, Vec<PathBuf>>,
    /// Accessions with scouts that are absent from their list for no visible reason.
    pub missing: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthTodo {
    pub year: String,
    pub month: String,
    pub reason: GapReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapReason {
    /// No list file yet although scouts exist.
    Scouts,
    Missing,
}

impl GapReport {
    /// Bit 0: something to update. Bit 1: permission problems.
    pub fn exit_code(&self) -> i32 {
        let mut code = 0;
        if !self.todo.is_empty() {
            code |= 1;
        }
        if !self.permission_groups.is_empty() {
            code |= 2;
        }
        code
    }
}
