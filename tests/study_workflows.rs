//
// study_workflows.rs
// reproin
//
// Integration-style tests driving the workflows against temporary BIDS/DICOM trees with a scripted command runner.
//
// Thales Matheus Mendonça Santos - November 2025

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use reproin::config::Config;
use reproin::error::exit_code_for;
use reproin::models::GapReason;
use reproin::plan::{self, Disposition};
use reproin::runner::{CommandOutput, CommandRunner};
use reproin::{accessions, lists, reconvert, study, validate};
use tempfile::{tempdir, TempDir};

const STUDY: &str = "dbic/QA";

/// Answers commands by substring, records every call; unknown commands succeed silently.
#[derive(Default)]
struct ScriptedRunner {
    responses: Vec<(String, CommandOutput)>,
    calls: RefCell<Vec<(String, PathBuf)>>,
}

impl ScriptedRunner {
    fn respond(mut self, needle: &str, code: i32, stdout: &str) -> Self {
        self.responses.push((
            needle.to_string(),
            CommandOutput {
                code,
                stdout: stdout.to_string(),
                stderr: if code == 0 { String::new() } else { format!("{needle} failed") },
            },
        ));
        self
    }

    fn commands(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|(cmd, _)| cmd.clone()).collect()
    }

    fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|cmd| cmd.contains(needle))
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, command: &str, cwd: &Path) -> anyhow::Result<CommandOutput> {
        self.calls
            .borrow_mut()
            .push((command.to_string(), cwd.to_path_buf()));
        Ok(self
            .responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn run_interactive(&self, program: &str, args: &[&str], cwd: &Path) -> anyhow::Result<i32> {
        let command = format!("{program} {}", args.join(" "));
        self.calls.borrow_mut().push((command, cwd.to_path_buf()));
        Ok(0)
    }
}

const MONTH_LIST: &str = "\
/inbox/DICOM/2024/01/02/A001
\tStudySessionInfo(locator='dbic/QA', session=None, subject='01')
/inbox/DICOM/2024/01/02/A002
\tStudySessionInfo(locator='dbic/QA', session=None, subject='02')
/inbox/DICOM/2024/01/03/A003
\tStudySessionInfo(locator='dbic/QA', session=None, subject='03')
/inbox/DICOM/2024/01/04/A004
\tStudySessionInfo(locator='dbic/QA', session=None, subject='03')
/inbox/DICOM/dbic/QA/A005
/inbox/DICOM/2024/01/06/A006
\tStudySessionInfo(locator='dbic/QA', session=None, subject='04')
/inbox/DICOM/2024/01/07/B001
\tStudySessionInfo(locator='other/Study', session=None, subject='99')
";

fn write_info(study_dir: &Path, id: &str, files: &[&str]) {
    let info = study_dir.join(".heudiconv").join(id).join("info");
    fs::create_dir_all(&info).expect("mkdir info");
    let json = serde_json::json!({ "1-anat-scout": files });
    fs::write(info.join("filegroup.json"), json.to_string()).expect("write filegroup");
}

/// A study with one converted subject, one skip-listed accession and one source converted under another id.
fn study_fixture() -> (TempDir, Config, PathBuf) {
    let root = tempdir().expect("tempdir");
    let mut config = Config::new(root.path().join("DICOM"), root.path().join("BIDS"));
    config.auto_create_ds = false;
    config.auto_conversion = false;

    let lists_dir = config.list_dir();
    fs::create_dir_all(&lists_dir).expect("mkdir lists");
    fs::write(lists_dir.join("202401xx.txt"), MONTH_LIST).expect("write list");
    // Day-level lists are not consulted.
    fs::write(lists_dir.join("20240103.txt"), "/inbox/DICOM/2024/01/03/A999\n").expect("write day list");

    let study_dir = config.study_dir(STUDY);
    fs::create_dir_all(study_dir.join(".git")).expect("mkdir study");
    write_info(
        &study_dir,
        "01",
        &["/inbox/DICOM/2024/01/02/A001/1.dcm", "/inbox/DICOM/2024/01/02/A001/2.dcm"],
    );
    write_info(&study_dir, "05", &["/inbox/DICOM/2024/01/06/A006/1.dcm"]);
    fs::write(
        study_dir.join(".heudiconv").join("sid-skip"),
        "/inbox/DICOM/2024/01/02/A002 phantom\n",
    )
    .expect("write skip");

    (root, config, study_dir)
}

#[test]
fn plan_classifies_every_accession_of_the_study() {
    let (_root, config, _) = study_fixture();
    let runner = ScriptedRunner::default();
    let plan = plan::plan_study(&config, &runner, STUDY, None).expect("plan");

    assert_eq!(plan.entries.len(), 6);
    assert!(matches!(plan.entries[0], Disposition::Done { .. }));
    assert!(matches!(plan.entries[1], Disposition::Skipped { .. }));
    assert!(matches!(plan.entries[2], Disposition::Convert { .. }));
    assert!(matches!(plan.entries[3], Disposition::Duplicate { .. }));
    assert!(matches!(plan.entries[4], Disposition::NoSessionInfo { .. }));
    assert!(matches!(plan.entries[5], Disposition::DoneElsewhere { .. }));

    let commands: Vec<&str> = plan.commands().collect();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].ends_with("-f reproin -l dbic/QA --files /inbox/DICOM/2024/01/03/A003"));
    assert!(commands[0].starts_with("heudiconv -c dcm2niix --bids -o "));

    let script = plan.script();
    assert!(script.contains("# /inbox/DICOM/2024/01/02/A001 done  01 session=None\n"));
    assert!(script.contains("# /inbox/DICOM/2024/01/02/A002 skip  # 02 session=None\n"));
    assert!(script.contains("/inbox/DICOM/2024/01/03/A003 # -s '03'\n"));
    assert!(script.contains("# WARNING: 03 already known or converted\n"));
    assert!(script.contains("# /inbox/DICOM/2024/01/06/A006 done  04 session=None !!! was converted into 05\n"));
    assert!(!script.contains("A005"));
    assert!(!script.contains("B001"));
    assert!(!script.contains("A999"));
    assert!(plan.diagnostics.is_empty());
}

#[test]
fn records_located_in_another_study_are_not_planned() {
    let (_root, config, _) = study_fixture();
    let list = config.list_dir().join("202402xx.txt");
    fs::write(
        &list,
        "/inbox/DICOM/dbic/QA2/A1\n\tStudySessionInfo(locator='dbic/QA2', session=None, subject='07')\n",
    )
    .expect("write list");

    let plan = plan::plan_study(&config, &ScriptedRunner::default(), STUDY, None).expect("plan");
    assert!(!plan.script().contains("QA2"));
    assert_eq!(plan.commands().count(), 1);
}

#[test]
fn sources_are_matched_by_whole_path_when_looking_for_other_conversions() {
    let (_root, config, study_dir) = study_fixture();
    fs::write(
        config.list_dir().join("202402xx.txt"),
        "/inbox/DICOM/2024/02/01/A1\n\tStudySessionInfo(locator='dbic/QA', session=None, subject='06')\n",
    )
    .expect("write list");
    write_info(&study_dir, "08", &["/inbox/DICOM/2024/02/01/A10/1.dcm"]);

    let plan = plan::plan_study(&config, &ScriptedRunner::default(), STUDY, None).expect("plan");
    assert!(plan.commands().any(|cmd| cmd.ends_with("/inbox/DICOM/2024/02/01/A1")));
}

#[test]
fn heuristic_and_locator_are_shell_quoted() {
    let (_root, mut config, _) = study_fixture();
    config.heuristic = "/opt/my heuristics/reproin.py".to_string();

    let plan = plan::plan_study(&config, &ScriptedRunner::default(), STUDY, None).expect("plan");
    let commands: Vec<&str> = plan.commands().collect();
    assert!(commands[0].contains(" -f '/opt/my heuristics/reproin.py' -l dbic/QA --files "));
}

#[test]
fn skip_listed_accessions_are_never_emitted() {
    let (_root, config, study_dir) = study_fixture();
    // Even with no other reason to skip it.
    fs::remove_dir_all(study_dir.join(".heudiconv").join("01")).expect("rm info");
    fs::write(
        study_dir.join(".heudiconv").join("sid-skip"),
        "/inbox/DICOM/2024/01/02/A001\n/inbox/DICOM/2024/01/03/A003 redo later\n",
    )
    .expect("write skip");

    let plan = plan::plan_study(&config, &ScriptedRunner::default(), STUDY, None).expect("plan");
    let commands: Vec<&str> = plan.commands().collect();
    assert!(commands.iter().all(|cmd| !cmd.contains("A001") && !cmd.contains("A003")));
    // A004 carries the same subject as the skipped A003 and is now the first one seen.
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().any(|cmd| cmd.ends_with("A002")));
    assert!(commands.iter().any(|cmd| cmd.ends_with("A004")));
}

#[test]
fn target_subject_filters_other_subjects() {
    let (_root, config, _) = study_fixture();
    let plan = plan::plan_study(&config, &ScriptedRunner::default(), STUDY, Some("03")).expect("plan");

    let script = plan.script();
    assert!(script.contains("# Skipping 01 session=None since 01 != 03\n"));
    assert!(script.contains("# Skipping 04 session=None since 04 != 03\n"));
    assert_eq!(plan.commands().count(), 1);
}

#[test]
fn anon_cmd_failure_skips_the_record_and_reports_it() {
    let (_root, config, study_dir) = study_fixture();
    fs::write(study_dir.join(".heudiconv").join("anon-cmd"), "#!/bin/sh\nexit 1\n").expect("write anon-cmd");
    let runner = ScriptedRunner::default().respond("anon-cmd", 1, "");

    let plan = plan::plan_study(&config, &runner, STUDY, None).expect("plan");
    assert_eq!(plan.commands().count(), 0);
    assert!(plan
        .diagnostics
        .iter()
        .any(|line| line.starts_with("ERROR: failed to get anonymized ID for 03")));
    // The skip list still wins over anonymization.
    assert!(plan.script().contains("A002 skip"));
}

#[test]
fn anonymized_subjects_are_used_for_the_command() {
    let (_root, config, study_dir) = study_fixture();
    fs::write(study_dir.join(".heudiconv").join("anon-cmd"), "#!/bin/sh\n").expect("write anon-cmd");
    let runner = ScriptedRunner::default().respond("anon-cmd", 0, "qa003\n");

    let plan = plan::plan_study(&config, &runner, STUDY, Some("03")).expect("plan");
    let script = plan.script();
    assert!(script.contains("--anon-cmd '.heudiconv/anon-cmd'"));
    assert!(script.contains("# -s 'qa003'\n"));
}

#[test]
fn dcm2niix_drift_is_reported_on_stderr_lines() {
    let (_root, config, _) = study_fixture();
    let runner = ScriptedRunner::default()
        .respond(
            "git grep",
            0,
            "\"ConversionSoftwareVersion\": \"v1.0.20211006\",\n\"ConversionSoftwareVersion\": \"v1.0.20220720\",\n",
        )
        .respond("dcm2niix -v", 0, "Chris Rorden's dcm2niiX version v1.0.20230411 GCC12.2.0\n");

    let plan = plan::plan_study(&config, &runner, STUDY, None).expect("plan");
    assert_eq!(
        plan.diagnostics,
        vec![
            "W: Study already used multiple versions of dcm2niix: 1.0.20211006, 1.0.20220720".to_string(),
            "W: Wrong environment - dcm2niix 1.0.20230411 when study used 1.0.20220720".to_string(),
        ]
    );
}

#[test]
fn missing_study_is_an_error_with_exit_code_one() {
    let (_root, config, _) = study_fixture();
    let err = plan::plan_study(&config, &ScriptedRunner::default(), "dbic/Nope", None).unwrap_err();
    assert_eq!(exit_code_for(&err), 1);
}

#[test]
fn show_save_writes_script_and_summary() {
    let (_root, config, study_dir) = study_fixture();
    let summary = study::show_save(&config, &ScriptedRunner::default(), STUDY)
        .expect("show-save")
        .expect("study exists");

    assert_eq!(summary.todo, 1);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.fixups, 1);
    assert_eq!(summary.warnings, 1);
    assert_eq!(summary.stderrs, 0);
    assert!(study_dir.join(".git/study-show.sh").exists());
    assert!(!study_dir.join(".git/study-show.stderr").exists());

    let reread = study::show_summary(&config, STUDY).expect("summary");
    assert_eq!(reread.todo, summary.todo);
    assert!(reread.to_string().starts_with("todo=1 done=2 fixups=1 warnings=1 "));
}

#[test]
fn show_save_without_dataset_reports_nothing() {
    let (_root, config, _) = study_fixture();
    let summary = study::show_save(&config, &ScriptedRunner::default(), "dbic/New").expect("show-save");
    assert!(summary.is_none());
}

#[test]
fn convert_stops_at_first_failure_and_forwards_its_code() {
    let (_root, config, study_dir) = study_fixture();
    fs::remove_dir_all(study_dir.join(".heudiconv").join("01")).expect("rm info");
    let runner = ScriptedRunner::default().respond("--files", 3, "");

    let err = study::convert(&config, &runner, STUDY, None).unwrap_err();
    assert_eq!(exit_code_for(&err), 3);
    let conversions: Vec<String> = runner
        .commands()
        .into_iter()
        .filter(|cmd| cmd.contains("--files"))
        .collect();
    assert_eq!(conversions.len(), 1);
    assert!(!runner.ran("bids-validator"));
}

#[test]
fn convert_runs_in_study_and_saves_validator_log() {
    let (_root, config, study_dir) = study_fixture();
    fs::write(study_dir.join(".bids-validator-config.json"), "{}").expect("write cfg");
    let runner = ScriptedRunner::default().respond(
        "bids-validator",
        1,
        "\t1: [ERR] Files with such naming scheme are not part of BIDS specification.\n",
    );

    study::convert(&config, &runner, STUDY, None).expect("convert");
    let calls = runner.calls.borrow();
    let (_, cwd) = calls
        .iter()
        .find(|(cmd, _)| cmd.contains("--files"))
        .expect("conversion ran");
    assert_eq!(cwd, &study_dir);
    drop(calls);

    assert!(runner.ran("datalad save -d . -m 'New BIDS validator output'"));
    let summary = validate::summary(&config, STUDY).expect("summary");
    assert_eq!(summary.errors, 1);
    assert_eq!(summary.warnings, 0);
}

#[test]
fn validator_summary_needs_a_log() {
    let (_root, config, _) = study_fixture();
    let err = validate::summary(&config, STUDY).unwrap_err();
    assert_eq!(exit_code_for(&err), 1);
}

#[test]
fn accession_skip_appends_and_saves() {
    let (_root, config, study_dir) = study_fixture();
    let runner = ScriptedRunner::default();
    accessions::accession_skip(&config, &runner, STUDY, "/inbox/DICOM/2024/01/03/A003", Some("motion"))
        .expect("skip");

    let text = fs::read_to_string(study_dir.join(".heudiconv/sid-skip")).expect("read skip");
    assert_eq!(
        text,
        "/inbox/DICOM/2024/01/02/A002 phantom\n/inbox/DICOM/2024/01/03/A003 motion\n"
    );
    assert!(runner.ran("git annex add .heudiconv/sid-skip"));
    assert!(runner.ran("datalad save -d. -m 'skip an accession' .heudiconv/sid-skip"));
    assert!(!runner.ran("git annex unlock"));

    let plan = plan::plan_study(&config, &runner, STUDY, None).expect("plan");
    let commands: Vec<&str> = plan.commands().collect();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].ends_with("A004"));
}

#[test]
fn remove_subject2redo_skips_the_previous_source() {
    let (_root, config, study_dir) = study_fixture();
    fs::create_dir_all(study_dir.join("sub-01/anat")).expect("mkdir sub");
    let runner = ScriptedRunner::default();

    accessions::remove_subject2redo(&config, &runner, STUDY, "01", None).expect("remove");
    assert!(runner.ran("git rm -r sub-01 .heudiconv/01"));
    let text = fs::read_to_string(study_dir.join(".heudiconv/sid-skip")).expect("read skip");
    assert!(text.ends_with("/inbox/DICOM/2024/01/02/A001 to redo\n"));
}

#[test]
fn git_rm_failure_propagates() {
    let (_root, config, _) = study_fixture();
    let runner = ScriptedRunner::default().respond("git rm", 128, "");
    let err = accessions::remove_subject(&config, &runner, STUDY, "01", None).unwrap_err();
    assert_eq!(exit_code_for(&err), 128);
}

fn touch_scout(dicom: &Path, accession: &str) -> PathBuf {
    let dir = dicom.join(accession);
    fs::create_dir_all(dir.join("001_anat-scout_ses-01")).expect("mkdir scout");
    dir
}

#[test]
fn gap_check_flags_unlisted_accessions_and_months() {
    let root = tempdir().expect("tempdir");
    let config = Config::new(root.path().join("DICOM"), root.path().join("BIDS"));
    let dicom = &config.dicom_dir;

    let listed = touch_scout(dicom, "2024/01/02/A001");
    touch_scout(dicom, "2024/01/02/A002");
    let original = touch_scout(dicom, "2024/01/03/A003");
    touch_scout(dicom, "2024/01/03/A003_backup");
    fs::create_dir_all(dicom.join("2024/01/04/A004/005_t1w")).expect("mkdir no scout");
    touch_scout(dicom, "2024/02/01/B001");
    touch_scout(dicom, "2016/05/01/OLD1");

    fs::create_dir_all(config.list_dir()).expect("mkdir lists");
    fs::write(
        config.list_dir().join("202401xx.txt"),
        format!("{}\n{}\n", listed.display(), original.display()),
    )
    .expect("write list");

    let report = lists::check(&config, &ScriptedRunner::default(), "20??", "??").expect("check");
    assert_eq!(report.missing, vec![dicom.join("2024/01/02/A002")]);
    let todo: Vec<(&str, &str, GapReason)> = report
        .todo
        .iter()
        .map(|t| (t.year.as_str(), t.month.as_str(), t.reason))
        .collect();
    assert_eq!(
        todo,
        vec![("2024", "01", GapReason::Missing), ("2024", "02", GapReason::Scouts)]
    );
    assert!(report.permission_groups.is_empty());
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn gap_check_does_not_confuse_accessions_sharing_a_prefix() {
    let root = tempdir().expect("tempdir");
    let config = Config::new(root.path().join("DICOM"), root.path().join("BIDS"));
    let short = touch_scout(&config.dicom_dir, "2024/01/02/A1");
    let long = touch_scout(&config.dicom_dir, "2024/01/02/A10");
    fs::create_dir_all(config.list_dir()).expect("mkdir lists");
    fs::write(config.list_dir().join("202401xx.txt"), format!("{}\n", long.display())).expect("write list");

    let report = lists::check(&config, &ScriptedRunner::default(), "2024", "01").expect("check");
    assert_eq!(report.missing, vec![short]);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn gap_check_is_clean_when_lists_are_complete() {
    let root = tempdir().expect("tempdir");
    let config = Config::new(root.path().join("DICOM"), root.path().join("BIDS"));
    let listed = touch_scout(&config.dicom_dir, "2024/01/02/A001");
    fs::create_dir_all(config.list_dir()).expect("mkdir lists");
    fs::write(config.list_dir().join("202401xx.txt"), format!("{}\n", listed.display())).expect("write list");

    let report = lists::check(&config, &ScriptedRunner::default(), "2024", "01").expect("check");
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn lists_update_writes_the_month_list() {
    let root = tempdir().expect("tempdir");
    let config = Config::new(root.path().join("DICOM"), root.path().join("BIDS"));
    let runner = ScriptedRunner::default().respond("--command ls", 0, MONTH_LIST);

    let update = lists::update(&config, &runner, "2024", "01", "*").expect("update");
    assert_eq!(update.path, config.list_dir().join("202401xx.txt"));
    assert_eq!(fs::read_to_string(&update.path).expect("read"), MONTH_LIST);
    let commands = runner.commands();
    assert!(commands[0].contains("/2024/01/*/*/00*cout*"));
}

#[test]
fn lists_update_failure_keeps_previous_list() {
    let root = tempdir().expect("tempdir");
    let config = Config::new(root.path().join("DICOM"), root.path().join("BIDS"));
    fs::create_dir_all(config.list_dir()).expect("mkdir lists");
    let list = config.list_dir().join("20240105.txt");
    fs::write(&list, "old\n").expect("write");
    let runner = ScriptedRunner::default().respond("--command ls", 2, "");

    let err = lists::update(&config, &runner, "2024", "01", "05").unwrap_err();
    assert_eq!(exit_code_for(&err), 2);
    assert_eq!(fs::read_to_string(&list).expect("read"), "old\n");
}

#[test]
fn update_summary_counts_locators() {
    let root = tempdir().expect("tempdir");
    let config = Config::new(root.path().join("DICOM"), root.path().join("BIDS"));
    let runner = ScriptedRunner::default().respond("--command ls", 0, MONTH_LIST);

    let summary = lists::update_summary(&config, &runner).expect("summary");
    assert_eq!(summary[0].locator, "dbic/QA");
    assert_eq!(summary[0].count, 5);
    assert_eq!(summary[1].locator, "other/Study");
    assert_eq!(summary[1].count, 1);
}

fn bids_dataset() -> TempDir {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("dataset_description.json"), "{}").expect("write description");
    fs::create_dir_all(dir.path().join("sub-01/anat")).expect("mkdir anat");
    fs::create_dir_all(dir.path().join("sub-01/func")).expect("mkdir func");
    fs::write(dir.path().join("sub-01/func/sub-01_task-rest_physio.tsv.gz"), b"").expect("write physio");
    fs::write(dir.path().join("sub-01/sub-01_scans.tsv"), "filename\n").expect("write scans");
    fs::create_dir_all(dir.path().join("sourcedata/sub-01")).expect("mkdir sourcedata");
    dir
}

#[test]
fn reconvert_checks_dataset_layout() {
    let config = Config::default();
    let runner = ScriptedRunner::default();

    let empty = tempdir().expect("tempdir");
    assert!(reconvert::sourcedata(&config, &runner, empty.path(), &["sub-01".into()]).is_err());

    let dataset = bids_dataset();
    let err = reconvert::sourcedata(&config, &runner, dataset.path(), &["sub-02".into()]).unwrap_err();
    assert!(err.to_string().contains("_scans.tsv"));
    assert!(runner.commands().is_empty());
}

#[test]
fn reconvert_runs_one_datalad_run_per_folder() {
    let config = Config::default();
    let runner = ScriptedRunner::default();
    let dataset = bids_dataset();

    reconvert::sourcedata(&config, &runner, dataset.path(), &["sourcedata/sub-01/".into()]).expect("reconvert");
    let calls = runner.calls.borrow();
    assert_eq!(calls.len(), 1);
    let (command, cwd) = &calls[0];
    assert_eq!(cwd, dataset.path());
    assert!(command.starts_with("datalad run -m 'Reconvert sub-01'"));
    assert!(command.contains("rm -rf sub-01/anat sub-01/func sub-01/sub-01_scans.tsv .heudiconv/01"));
    assert!(command.contains("-f reproin"));
}
