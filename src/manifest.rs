//
// manifest.rs
// reproin
//
// Naming and pattern-matching of the per-month accession lists produced by `heudiconv --command ls`.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::LocatorCount;

static SUBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"subject='([^']*)'").expect("valid regex"));
static SESSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"session='([^']*)'").expect("valid regex"));
static LOCATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"locator='([^']*)'").expect("valid regex"));
static SUMMARY_LOCATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"StudySes.*locator='([^']*)'").expect("valid regex"));

/// Marker heudiconv prints in front of every study/session tuple.
const SESSION_INFO_MARKER: &str = "StudySess";

/// `{year}{month}{day}.txt`, with a wildcard day collapsing to `xx`.
pub fn list_file_name(year: &str, month: &str, day: &str) -> String {
    let day = if day == "*" { "xx" } else { day };
    format!("{year}{month}{day}.txt")
}

/// Every month-level list (`*xx.txt`) in `list_dir`, sorted by name.
pub fn month_lists(list_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = list_dir.join("*xx.txt");
    let pattern = pattern.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&pattern)
        .with_context(|| format!("Invalid list pattern {pattern}"))?
        .filter_map(|entry| entry.ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Subject/session tuple as printed by heudiconv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub locator: Option<String>,
    pub subject: String,
    pub session: Option<String>,
}

impl SessionInfo {
    /// `None` unless the line carries the session-info marker and a subject.
    pub fn parse(line: &str) -> Option<Self> {
        if !line.contains(SESSION_INFO_MARKER) {
            return None;
        }
        let subject = SUBJECT.captures(line)?.get(1)?.as_str().to_string();
        let capture = |re: &Regex| {
            re.captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        };
        Some(Self {
            locator: capture(&LOCATOR),
            subject,
            session: capture(&SESSION),
        })
    }
}

/// One accession line of a manifest that belongs to the study being inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// The accession line, trimmed; doubles as the source path handed to heudiconv.
    pub source: String,
    /// `None` when the following line carries no subject/session tuple.
    pub info: Option<SessionInfo>,
}

/// Scan manifest text for accessions of `study`, in line order.
///
/// An accession line belongs to the study when the session-info line right after it has the
/// study as locator or, lacking a locator, when the line mentions the study name. Session-info
/// lines are never treated as accession lines themselves.
pub fn study_records(text: &str, study: &str) -> Vec<ManifestRecord> {
    let lines: Vec<&str> = text.lines().collect();
    let mut records = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx].trim();
        if line.is_empty() || line.contains(SESSION_INFO_MARKER) {
            idx += 1;
            continue;
        }

        let info = lines.get(idx + 1).and_then(|next| SessionInfo::parse(next));
        // A locator on the info line is authoritative; the line text only decides without one.
        let belongs = match info.as_ref().and_then(|i| i.locator.as_deref()) {
            Some(locator) => locator == study,
            None => line.contains(study),
        };

        if belongs {
            let consumed = if info.is_some() { 2 } else { 1 };
            records.push(ManifestRecord {
                source: line.to_string(),
                info,
            });
            idx += consumed;
        } else {
            idx += 1;
        }
    }

    records
}

/// Count locators in organizer output, most frequent first (ties by name).
pub fn summarize_locators(text: &str) -> Vec<LocatorCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for caps in SUMMARY_LOCATOR.captures_iter(text) {
        if let Some(locator) = caps.get(1) {
            *counts.entry(locator.as_str()).or_default() += 1;
        }
    }

    let mut summary: Vec<LocatorCount> = counts
        .into_iter()
        .map(|(locator, count)| LocatorCount {
            locator: locator.to_string(),
            count,
        })
        .collect();
    summary.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.locator.cmp(&b.locator)));
    summary
}
