//
// setup.rs
// reproin
//
// Embeds the ReproNim containers collection (and optionally a development reproin) into a study dataset.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::error::ReproinError;
use crate::runner::{shell_quote, CommandRunner};

const CONTAINERS_PATH: &str = "code/containers";
const CONTAINERS_URL: &str = "https://datasets.datalad.org/repronim/containers/.git";
const REPROIN_REPO: &str = "https://github.com/ReproNim/reproin";
const CMDEXEC_KEY: &str = "datalad.containers.repronim-reproin.cmdexec";

/// Bind the DICOM and BIDS roots into the container invocation.
pub fn with_bind_mounts(cmdexec: &str, dicom_dir: &Path, bids_dir: &Path) -> String {
    let bids = bids_dir.display();
    let mounts = format!(
        "-B '{}' -B '{bids}' --env 'BIDS_DIR={bids}' {{img}}",
        dicom_dir.display()
    );
    cmdexec.replace("{img}", &mounts)
}

/// Route the container's reproin to the development checkout under `code/reproin`.
pub fn with_devel_reproin(cmdexec: &str) -> String {
    let replaced = match cmdexec.find("{img} {cmd}") {
        Some(pos) => format!(
            "{}-B {{img_dspath}}/code/reproin/bin/reproin:/usr/local/bin/reproin {{img}} /usr/local/bin/reproin {{cmd}}",
            &cmdexec[..pos]
        ),
        None => cmdexec.to_string(),
    };
    replaced.replace(" run ", " exec ")
}

fn rewrite_cmdexec(
    runner: &dyn CommandRunner,
    dataset: &Path,
    rewrite: impl FnOnce(&str) -> String,
) -> Result<()> {
    let current = runner.run_checked(&format!("git config -f .datalad/config {CMDEXEC_KEY}"), dataset)?;
    let modified = rewrite(current.stdout.trim());
    runner.run_checked(
        &format!(
            "git config -f .datalad/config {CMDEXEC_KEY} {}",
            shell_quote(&modified)
        ),
        dataset,
    )?;
    Ok(())
}

/// Clone the containers collection into `code/containers` and tune it for this site.
pub fn containers(config: &Config, runner: &dyn CommandRunner, dataset: &Path) -> Result<()> {
    if dataset.join(CONTAINERS_PATH).exists() {
        return Err(ReproinError::Precondition(format!("There is already {CONTAINERS_PATH}")).into());
    }
    fs::create_dir_all(dataset.join("code")).context("Failed to create code/ directory")?;

    runner.run_checked(
        &format!(
            "datalad clone -d . --reckless=ephemeral {} {CONTAINERS_PATH}",
            shell_quote(&config.containers_dir.to_string_lossy())
        ),
        dataset,
    )?;
    for key in ["url", "datalad-url"] {
        runner.run_checked(
            &format!(
                "git config --file ./.gitmodules submodule.\"{CONTAINERS_PATH}\".{key} {CONTAINERS_URL}"
            ),
            dataset,
        )?;
    }
    runner.run_checked(
        "scripts/freeze_versions --save-dataset=../../ repronim-reproin",
        &dataset.join(CONTAINERS_PATH),
    )?;

    rewrite_cmdexec(runner, dataset, |orig| {
        with_bind_mounts(orig, &config.dicom_dir, &config.bids_dir)
    })?;
    runner.run_checked(
        "datalad save -m 'Saving tune ups to enable using the embedded container with reproin' .gitmodules .datalad/config",
        dataset,
    )?;
    info!("containers set up in {}", dataset.display());
    Ok(())
}

/// Bundle the development version of reproin and make the container use it.
pub fn devel_reproin(runner: &dyn CommandRunner, dataset: &Path) -> Result<()> {
    if !dataset.join(CONTAINERS_PATH).exists() {
        return Err(ReproinError::Precondition("Must have setup_containers already".into()).into());
    }

    runner.run_checked(
        &format!("datalad clone -d . {REPROIN_REPO} code/reproin"),
        dataset,
    )?;
    rewrite_cmdexec(runner, dataset, with_devel_reproin)?;
    runner.run_checked(
        "datalad save -m 'Bundle/use development version of reproin script for now inside the container' .gitmodules .datalad/config",
        dataset,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMDEXEC: &str = "{img_dspath}/scripts/singularity_cmd run {img} {cmd}";

    #[test]
    fn bind_mounts_are_inserted_before_image() {
        let out = with_bind_mounts(CMDEXEC, Path::new("/inbox/DICOM"), Path::new("/inbox/BIDS"));
        assert_eq!(
            out,
            "{img_dspath}/scripts/singularity_cmd run -B '/inbox/DICOM' -B '/inbox/BIDS' --env 'BIDS_DIR=/inbox/BIDS' {img} {cmd}"
        );
    }

    #[test]
    fn devel_reproin_swaps_entrypoint_and_uses_exec() {
        let out = with_devel_reproin(CMDEXEC);
        assert_eq!(
            out,
            "{img_dspath}/scripts/singularity_cmd exec -B {img_dspath}/code/reproin/bin/reproin:/usr/local/bin/reproin {img} /usr/local/bin/reproin {cmd}"
        );
    }
}
