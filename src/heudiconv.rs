//
// heudiconv.rs
// reproin
//
// Reads what heudiconv and dcm2niix leave behind: tool versions, .heudiconv/*/info markers and their source paths.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::HEUDICONV_DIR;
use crate::runner::CommandRunner;

static DCM2NIIX_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"version v(\S+)").expect("valid regex"));
static CONVERSION_VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""ConversionSoftwareVersion"\s*:\s*"([^"]+)""#).expect("valid regex")
});

/// Version token of `dcm2niix -v`, without the leading `v`.
pub fn parse_dcm2niix_version(output: &str) -> Option<String> {
    DCM2NIIX_VERSION
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn dcm2niix_version(runner: &dyn CommandRunner) -> Option<String> {
    // dcm2niix -v exits nonzero even when it works, so only the text matters.
    let output = runner.run("dcm2niix -v", Path::new(".")).ok()?;
    parse_dcm2niix_version(&format!("{}\n{}", output.stdout, output.stderr))
}

pub fn heudiconv_version(runner: &dyn CommandRunner) -> Option<String> {
    let output = runner.run("heudiconv --version", Path::new(".")).ok()?;
    if !output.success() {
        return None;
    }
    let version = output.stdout_or_stderr().trim();
    (!version.is_empty()).then(|| version.to_string())
}

/// Distinct dcm2niix versions recorded in a study's sidecars, in `git grep` order.
pub fn parse_conversion_versions(grep_output: &str) -> Vec<String> {
    let mut versions: Vec<String> = Vec::new();
    for caps in CONVERSION_VERSION.captures_iter(grep_output) {
        let version = caps[1].trim_start_matches('v').to_string();
        if !version.is_empty() && !versions.contains(&version) {
            versions.push(version);
        }
    }
    versions
}

pub fn study_conversion_versions(runner: &dyn CommandRunner, study_dir: &Path) -> Vec<String> {
    match runner.run("git grep -h ConversionSoftwareVersion", study_dir) {
        Ok(output) if output.success() => parse_conversion_versions(&output.stdout),
        _ => Vec::new(),
    }
}

/// `{subject}` or `{subject}/ses-{session}`, the layout heudiconv uses under `.heudiconv/`.
pub fn subses_id(subject: &str, session: Option<&str>) -> String {
    match session {
        Some(session) => format!("{subject}/ses-{session}"),
        None => subject.to_string(),
    }
}

/// Presence of `.heudiconv/{id}/info` means the subject/session was converted.
pub fn info_dir(study_dir: &Path, subses_id: &str) -> PathBuf {
    study_dir.join(HEUDICONV_DIR).join(subses_id).join("info")
}

/// Common source directory of everything recorded in `filegroup*.json` for a converted subject.
pub fn infodir_sourcepath(study_dir: &Path, subses_id: &str) -> Option<PathBuf> {
    let info = info_dir(study_dir, subses_id);
    let entries = fs::read_dir(&info).ok()?;

    let mut sources: Vec<PathBuf> = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with("filegroup") && name.ends_with(".json")) {
            continue;
        }
        let parsed = fs::read_to_string(entry.path())
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok());
        match parsed {
            Some(value) => collect_paths(&value, &mut sources),
            None => debug!(path = %entry.path().display(), "unreadable filegroup"),
        }
    }

    common_path(&sources)
}

fn collect_paths(value: &Value, out: &mut Vec<PathBuf>) {
    match value {
        Value::String(s) if s.contains('/') => out.push(PathBuf::from(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_paths(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_paths(v, out)),
        _ => {}
    }
}

/// Longest shared leading path of all inputs (component-wise).
pub fn common_path(paths: &[PathBuf]) -> Option<PathBuf> {
    let (first, rest) = paths.split_first()?;
    let mut prefix: Vec<Component> = first.components().collect();
    for path in rest {
        let shared = prefix
            .iter()
            .zip(path.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(shared);
    }
    if prefix.is_empty() {
        return None;
    }
    // A single file shares its full path; report its directory instead.
    if paths.len() == 1 || paths.iter().all(|p| p.components().count() == prefix.len()) {
        prefix.pop();
    }
    Some(prefix.iter().collect())
}

/// Paths recorded in one info file: JSON string values, or path-like tokens of a text file.
fn recorded_paths(text: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    match serde_json::from_str::<Value>(text) {
        Ok(value) => collect_paths(&value, &mut paths),
        Err(_) => paths.extend(
            text.split(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ','))
                .filter(|token| token.contains('/'))
                .map(PathBuf::from),
        ),
    }
    paths
}

/// Identities (other than `current_id`) whose info files record files under `source`.
pub fn converted_into(study_dir: &Path, source: &str, current_id: &str) -> Vec<String> {
    let root = study_dir.join(HEUDICONV_DIR);
    let mut found: Vec<String> = Vec::new();

    let info_files = WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .parent()
                .and_then(|p| p.file_name())
                .is_some_and(|name| name == "info")
        });

    for entry in info_files {
        let Some(owner) = entry.path().parent().and_then(Path::parent) else {
            continue;
        };
        let Ok(relative) = owner.strip_prefix(&root) else {
            continue;
        };
        let identity = relative.to_string_lossy().to_string();
        if identity.is_empty() || identity == current_id || found.contains(&identity) {
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()) else {
            continue;
        };
        let recorded = recorded_paths(&String::from_utf8_lossy(&bytes));
        if recorded.iter().any(|path| path.starts_with(source)) {
            found.push(identity);
        }
    }

    found.sort();
    found
}
