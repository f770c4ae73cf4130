//
// config.rs
// reproin
//
// Runtime configuration resolved once from the environment (or CLI flags) and passed to every workflow.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf};

use crate::runner::shell_quote;

/// Per-study bookkeeping folder written by heudiconv.
pub const HEUDICONV_DIR: &str = ".heudiconv";
pub const SKIP_FILE: &str = ".heudiconv/sid-skip";
pub const VALIDATOR_LOG: &str = ".heudiconv/bids-validator.log";
pub const VALIDATOR_CONFIG: &str = ".bids-validator-config.json";
/// Fallback validator config, relative to the home directory.
pub const VALIDATOR_CONFIG_FALLBACK: &str = "heudiconv/heudiconv/heuristics/reproin_validator.cfg";
pub const STUDY_HEURISTIC: &str = ".heudiconv/heuristic.py";
pub const STUDY_ANON_CMD: &str = ".heudiconv/anon-cmd";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the date-partitioned DICOM tree (`YYYY/MM/DD/accession`).
    pub dicom_dir: PathBuf,
    /// Root BIDS dataset holding every study.
    pub bids_dir: PathBuf,
    /// Local clone of the ReproNim containers collection.
    pub containers_dir: PathBuf,
    pub heuristic: String,
    pub resources_dir: PathBuf,
    pub auto_create_ds: bool,
    pub auto_conversion: bool,
    /// Program used by `validate show`.
    pub pager: String,
}

impl Config {
    pub fn new(dicom_dir: impl Into<PathBuf>, bids_dir: impl Into<PathBuf>) -> Self {
        Self {
            dicom_dir: dicom_dir.into(),
            bids_dir: bids_dir.into(),
            containers_dir: default_containers_dir(),
            heuristic: "reproin".to_string(),
            resources_dir: default_resources_dir(),
            auto_create_ds: true,
            auto_conversion: true,
            pager: "vim".to_string(),
        }
    }

    pub fn list_dir(&self) -> PathBuf {
        self.bids_dir.join("reproin").join("lists")
    }

    pub fn study_dir(&self, study: &str) -> PathBuf {
        self.bids_dir.join(study)
    }

    /// Base converter invocation; callers append heuristic and file arguments.
    pub fn heudiconv_cmd(&self) -> String {
        format!(
            "heudiconv -c dcm2niix --bids -o {} -g accession_number",
            shell_quote(&self.bids_dir.to_string_lossy())
        )
    }

    pub fn skip_file(&self, study_dir: &Path) -> PathBuf {
        study_dir.join(SKIP_FILE)
    }

    pub fn validator_log(&self, study_dir: &Path) -> PathBuf {
        study_dir.join(VALIDATOR_LOG)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("/inbox/DICOM", "/inbox/BIDS")
    }
}

pub fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

pub fn default_containers_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("repronim-containers")
}

/// `resources/` shipped next to the crate (holds the `cfg_reproin_bids` procedure).
pub fn default_resources_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("resources")
}
