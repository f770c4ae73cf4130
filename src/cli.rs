//
// cli.rs
// reproin
//
// Defines the CLI surface with Clap and dispatches user-selected commands to the corresponding workflows.
//
// Thales Matheus Mendonça Santos - November 2025

use std::ffi::OsString;
use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;

use crate::config::{self, Config};
use crate::runner::{CommandRunner, ShellRunner};
use crate::{accessions, heudiconv, lists, reconvert, setup, study, validate};

/// Command-line interface glue code: defines the available verbs and dispatches to workflows.
#[derive(Parser, Debug)]
#[command(name = "reproin", version)]
#[command(
    about = "Automatic generation of shareable BIDS datasets from MR scanners",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Site configuration; every flag can also come from the environment (or `.env`).
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Root of the date-partitioned DICOM tree
    #[arg(long, env = "DICOM_DIR", default_value = "/inbox/DICOM", global = true)]
    pub dicom_dir: PathBuf,

    /// Root BIDS dataset holding every study
    #[arg(long, env = "BIDS_DIR", default_value = "/inbox/BIDS", global = true)]
    pub bids_dir: PathBuf,

    /// Local clone of the ReproNim containers collection
    #[arg(long, env = "REPRONIM_CONTAINERS", global = true)]
    pub containers: Option<PathBuf>,

    #[arg(long, env = "REPROIN_HEURISTIC", default_value = "reproin", global = true)]
    pub heuristic: String,

    /// Create a study dataset on first show-save
    #[arg(
        long,
        env = "REPROIN_AUTO_CREATE_DS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub auto_create_ds: bool,

    /// Convert new accessions during update-study-shows
    #[arg(
        long,
        env = "REPROIN_AUTO_CONVERSION",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub auto_conversion: bool,

    /// Directory holding the cfg_reproin_bids datalad procedure
    #[arg(long, env = "REPROIN_RESOURCES", global = true)]
    pub resources: Option<PathBuf>,

    #[arg(long, env = "PAGER", default_value = "vim", global = true)]
    pub pager: String,
}

impl From<Settings> for Config {
    fn from(settings: Settings) -> Self {
        Config {
            dicom_dir: settings.dicom_dir,
            bids_dir: settings.bids_dir,
            containers_dir: settings
                .containers
                .unwrap_or_else(config::default_containers_dir),
            heuristic: settings.heuristic,
            resources_dir: settings
                .resources
                .unwrap_or_else(config::default_resources_dir),
            auto_create_ds: settings.auto_create_ds,
            auto_conversion: settings.auto_conversion,
            pager: settings.pager,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Maintain the per-month accession lists
    #[command(subcommand)]
    Lists(ListsCommand),
    /// Plan, convert and bookkeep a study
    #[command(subcommand)]
    Study(StudyCommand),
    /// Embed containers into a study dataset
    #[command(subcommand)]
    Setup(SetupCommand),
    /// Run and inspect bids-validator
    #[command(subcommand)]
    Validate(ValidateCommand),
    /// Redo conversions from sourcedata/
    #[command(subcommand)]
    Reconvert(ReconvertCommand),
}

#[derive(Subcommand, Debug)]
pub enum ListsCommand {
    /// Refresh the accession list of a month (or a single day)
    Update {
        year: Option<String>,
        month: Option<String>,
        #[arg(default_value = "*")]
        day: String,
    },
    /// Look for accessions the lists do not mention
    Check {
        #[arg(default_value = "20??")]
        year: String,
        #[arg(default_value = "??")]
        month: String,
        #[arg(long)]
        json: bool,
    },
    /// Update the current month and count accessions per study
    UpdateSummary,
    /// Update the current month and refresh the saved plan of every study seen
    UpdateStudyShows,
}

#[derive(Subcommand, Debug)]
pub enum StudyCommand {
    /// Create the study dataset and its parents
    Create { study: String },
    /// Print the conversion plan
    Show {
        study: String,
        target_sub: Option<String>,
    },
    /// Run every pending conversion
    Convert {
        study: String,
        target_sub: Option<String>,
    },
    /// Store the plan under .git/ and print its summary
    ShowSave { study: String },
    /// Summarize the stored plan
    ShowSummary {
        study: String,
        #[arg(long)]
        json: bool,
    },
    /// Never convert an accession for this study
    AccessionSkip {
        study: String,
        accession: String,
        reason: Option<String>,
    },
    /// Remove a converted subject (or session)
    RemoveSubject {
        study: String,
        sid: String,
        session: Option<String>,
    },
    /// Remove a converted subject and skip its source so it can be redone
    #[command(name = "remove-subject2redo")]
    RemoveSubject2redo {
        study: String,
        sid: String,
        session: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SetupCommand {
    /// Install the containers collection under code/containers
    Containers {
        /// Study to set up; the current directory when omitted
        study: Option<String>,
    },
    /// Bundle the development version of reproin
    DevelReproin { study: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum ValidateCommand {
    /// Run bids-validator over a study (or the whole BIDS root)
    Run { study: Option<String> },
    /// Store validator output in the study's log
    Save { study: String },
    /// Count errors and warnings in the stored log
    Summary {
        study: String,
        #[arg(long)]
        json: bool,
    },
    /// Open the stored log in the pager
    Show { study: String },
}

#[derive(Subcommand, Debug)]
pub enum ReconvertCommand {
    /// Reconvert sub-*/ses-* folders of the current BIDS dataset
    Sourcedata {
        #[arg(required = true)]
        paths: Vec<String>,
        #[arg(long, default_value = ".")]
        dataset: PathBuf,
    },
}

/// Hyphenated command names kept working for existing cron jobs and scripts.
const LEGACY_COMMANDS: &[(&str, &[&str])] = &[
    ("lists-update", &["lists", "update"]),
    ("lists-check", &["lists", "check"]),
    ("lists-update-summary", &["lists", "update-summary"]),
    ("lists-update-study-shows", &["lists", "update-study-shows"]),
    ("study-create", &["study", "create"]),
    ("study-show", &["study", "show"]),
    ("study-convert", &["study", "convert"]),
    ("study-show-save", &["study", "show-save"]),
    ("study-show-summary", &["study", "show-summary"]),
    ("study-accession-skip", &["study", "accession-skip"]),
    ("study-remove-subject", &["study", "remove-subject"]),
    ("study-remove-subject2redo", &["study", "remove-subject2redo"]),
    ("setup-containers", &["setup", "containers"]),
    ("setup-devel-reproin", &["setup", "devel-reproin"]),
    ("validator", &["validate", "run"]),
    ("validator-save", &["validate", "save"]),
    ("validator-summary", &["validate", "summary"]),
    ("validator-show", &["validate", "show"]),
];

/// Rewrite a legacy command name (the first positional argument) into its grouped form.
pub fn normalize_legacy_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().map(Into::into).collect();
    let mut idx = 1;
    while idx < args.len() {
        let Some(arg) = args[idx].to_str() else {
            break;
        };
        if arg.starts_with('-') {
            // `--flag value` consumes the next token; `--flag=value` and help/version do not.
            let takes_value = arg.starts_with("--")
                && !arg.contains('=')
                && !matches!(arg, "--help" | "--version");
            idx += if takes_value { 2 } else { 1 };
            continue;
        }
        if let Some((_, grouped)) = LEGACY_COMMANDS.iter().find(|(legacy, _)| *legacy == arg) {
            let replacement = grouped.iter().map(OsString::from);
            args.splice(idx..=idx, replacement);
        }
        break;
    }
    args
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse the process arguments and run the selected command; returns the exit code.
pub fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse_from(normalize_legacy_args(std::env::args_os()));
    let config = Config::from(cli.settings);
    dispatch(&config, &ShellRunner, cli.command)
}

/// Execute one parsed command against the given configuration and runner.
pub fn dispatch(
    config: &Config,
    runner: &dyn CommandRunner,
    command: Option<Commands>,
) -> anyhow::Result<i32> {
    let Some(command) = command else {
        let unknown = || "unknown".to_string();
        println!(
            "heudiconv: {}",
            heudiconv::heudiconv_version(runner).unwrap_or_else(unknown)
        );
        println!(
            "dcm2niix: {}",
            heudiconv::dcm2niix_version(runner).unwrap_or_else(unknown)
        );
        return Ok(0);
    };

    match command {
        Commands::Lists(cmd) => match cmd {
            ListsCommand::Update { year, month, day } => {
                let year = year.unwrap_or_else(lists::current_year);
                let month = month.unwrap_or_else(lists::current_month);
                lists::update(config, runner, &year, &month, &day)?;
            }
            ListsCommand::Check { year, month, json } => {
                let report = lists::check(config, runner, &year, &month)?;
                if json {
                    print_json(&report)?;
                } else {
                    lists::print_report(&report);
                }
                return Ok(report.exit_code());
            }
            ListsCommand::UpdateSummary => {
                for entry in lists::update_summary(config, runner)? {
                    println!("{entry}");
                }
            }
            ListsCommand::UpdateStudyShows => lists::update_study_shows(config, runner)?,
        },
        Commands::Study(cmd) => match cmd {
            StudyCommand::Create { study } => study::create(config, runner, &study)?,
            StudyCommand::Show { study, target_sub } => {
                study::show(config, runner, &study, target_sub.as_deref())?;
            }
            StudyCommand::Convert { study, target_sub } => {
                study::convert(config, runner, &study, target_sub.as_deref())?
            }
            StudyCommand::ShowSave { study } => {
                study::show_save(config, runner, &study)?;
            }
            StudyCommand::ShowSummary { study, json } => {
                let summary = study::show_summary(config, &study)?;
                if json {
                    print_json(&summary)?;
                } else {
                    println!("{summary}");
                }
            }
            StudyCommand::AccessionSkip {
                study,
                accession,
                reason,
            } => accessions::accession_skip(config, runner, &study, &accession, reason.as_deref())?,
            StudyCommand::RemoveSubject {
                study,
                sid,
                session,
            } => accessions::remove_subject(config, runner, &study, &sid, session.as_deref())?,
            StudyCommand::RemoveSubject2redo {
                study,
                sid,
                session,
            } => accessions::remove_subject2redo(config, runner, &study, &sid, session.as_deref())?,
        },
        Commands::Setup(cmd) => match cmd {
            SetupCommand::Containers { study } => {
                setup::containers(config, runner, &dataset_dir(config, study))?
            }
            SetupCommand::DevelReproin { study } => {
                setup::devel_reproin(runner, &dataset_dir(config, study))?
            }
        },
        Commands::Validate(cmd) => match cmd {
            ValidateCommand::Run { study } => {
                print!("{}", validate::run(config, runner, study.as_deref())?);
            }
            ValidateCommand::Save { study } => {
                validate::save(config, runner, &study)?;
            }
            ValidateCommand::Summary { study, json } => {
                let summary = validate::summary(config, &study)?;
                if json {
                    print_json(&summary)?;
                } else {
                    validate::print_summary(&summary);
                }
            }
            ValidateCommand::Show { study } => return validate::show(config, runner, &study),
        },
        Commands::Reconvert(ReconvertCommand::Sourcedata { paths, dataset }) => {
            reconvert::sourcedata(config, runner, &dataset, &paths)?
        }
    }

    Ok(0)
}

fn dataset_dir(config: &Config, study: Option<String>) -> PathBuf {
    match study {
        Some(study) => config.study_dir(&study),
        None => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_legacy_args(args.iter().copied())).expect("parse")
    }

    #[test]
    fn legacy_names_become_grouped_commands() {
        let args = normalize_legacy_args(["reproin", "study-show", "dbic/QA", "01"]);
        assert_eq!(args, ["reproin", "study", "show", "dbic/QA", "01"]);

        let args = normalize_legacy_args(["reproin", "--bids-dir", "/b", "validator"]);
        assert_eq!(args, ["reproin", "--bids-dir", "/b", "validate", "run"]);

        // Only the command position is rewritten.
        let args = normalize_legacy_args(["reproin", "study", "show", "validator"]);
        assert_eq!(args, ["reproin", "study", "show", "validator"]);
    }

    #[test]
    fn lists_check_defaults_to_every_month() {
        let cli = parse(&["reproin", "lists-check"]);
        match cli.command {
            Some(Commands::Lists(ListsCommand::Check { year, month, json })) => {
                assert_eq!(year, "20??");
                assert_eq!(month, "??");
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn settings_flags_build_the_config() {
        let cli = parse(&[
            "reproin",
            "--dicom-dir",
            "/d",
            "--auto-conversion",
            "no",
            "study",
            "show-summary",
            "s",
            "--json",
        ]);
        let config = Config::from(cli.settings);
        assert_eq!(config.dicom_dir, PathBuf::from("/d"));
        assert!(!config.auto_conversion);
        assert!(matches!(
            cli.command,
            Some(Commands::Study(StudyCommand::ShowSummary { json: true, .. }))
        ));
    }

    #[test]
    fn remove_subject2redo_keeps_its_name() {
        let cli = parse(&["reproin", "study", "remove-subject2redo", "s", "01", "2"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Study(StudyCommand::RemoveSubject2redo { session: Some(_), .. }))
        ));
    }

    #[test]
    fn no_subcommand_is_allowed() {
        assert!(parse(&["reproin"]).command.is_none());
    }
}
