use crate::driver::run;
use crate::error::{IoContext, Result};
use log::*;
use std::path::Path;
use std::process::{Command, Stdio};

/// Splits `https://host/repo.git@ref` into url and ref, defaulting to `HEAD`.
pub fn split_ref(remote: &str) -> (String, String) {
    match remote.split_once(".git@") {
        Some((url, reference)) => (format!("{}.git", url), reference.to_string()),
        None => (remote.to_string(), "HEAD".to_string()),
    }
}

fn git(target: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(target);
    cmd
}

fn init(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).context(format!("cannot create {:?}", target))?;
    run(git(target).arg("init"))
}

/// Shallow-fetches `remote` into `target` and checks it out. A failed fetch is
/// retried once from a fresh repository.
pub fn fetch(remote: &str, target: &Path) -> Result<()> {
    let (url, reference) = split_ref(remote);
    info!("Fetch {}@{} into {:?}", url, reference, target);

    if !target.join(".git").is_dir() {
        init(target)?;
    }
    let fetch_args = ["fetch", "--depth=1", "--update-shallow", "--update-head-ok", "--verbose"];
    if let Err(e) = run(git(target).args(&fetch_args).arg(&url).arg(&reference)) {
        warn!("RETRY {:?}: {}", target, e);
        if target.exists() {
            std::fs::remove_dir_all(target).context(format!("cannot remove {:?}", target))?;
        }
        init(target)?;
        run(git(target).args(&fetch_args).arg(&url).arg(&reference))?;
    }
    run(git(target)
        .arg("checkout")
        .arg("-f")
        .arg("-B")
        .arg(format!("Branch_{}", reference))
        .arg("FETCH_HEAD"))
}

/// Applies `patch` unless `git apply --check` says it no longer applies.
/// Returns whether the patch was applied.
pub fn apply_patch(patch: &Path, target: &Path) -> Result<bool> {
    let applicable = git(target)
        .arg("apply")
        .arg("--check")
        .arg(patch)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("cannot spawn git")?
        .success();
    if !applicable {
        info!("Patch {:?} has already been applied.", patch);
        return Ok(false);
    }
    run(git(target).arg("apply").arg(patch))?;
    info!("Patch {:?} applied successfully.", patch);
    Ok(true)
}
