use crate::checkout::Checkout;
use crate::env::{self, EnvVars};
use crate::error::{Error, IoContext, Result};
use crate::settings::{format_gn_args, GnArgs};
use crate::types::{Arch, HostOs, Platform};
use log::*;
use std::path::Path;
use std::process::{Command, Stdio};

/// The external side of a build: toolchain setup, project generation and
/// compilation.
pub trait Toolchain: Sync {
    fn provision(&self, platform: Platform, arch: Arch) -> Result<EnvVars>;
    fn generate(&self, project: &Path, args: &GnArgs, env: &EnvVars) -> Result<()>;
    fn compile(&self, project: &Path, env: &EnvVars) -> Result<()>;
}

pub const BUILD_TARGET: &str = "v8";

pub struct GnNinja<'a> {
    checkout: &'a Checkout,
    host: HostOs,
}

impl<'a> GnNinja<'a> {
    pub fn new(checkout: &'a Checkout, host: HostOs) -> Self {
        GnNinja { checkout, host }
    }
}

impl<'a> Toolchain for GnNinja<'a> {
    fn provision(&self, platform: Platform, arch: Arch) -> Result<EnvVars> {
        env::provision(self.checkout, &self.host, platform, arch)
    }

    fn generate(&self, project: &Path, args: &GnArgs, env: &EnvVars) -> Result<()> {
        let gn = self.checkout.bin_executable("gn", &self.host)?;
        let mut cmd = command(&gn, self.checkout.v8_dir(), env);
        cmd.arg("gen")
            .arg(project)
            .arg(format!("--args={}", format_gn_args(args)));
        run(&mut cmd)?;
        if !project.is_dir() {
            return Err(Error::MissingProject(project.to_path_buf()));
        }
        Ok(())
    }

    fn compile(&self, project: &Path, env: &EnvVars) -> Result<()> {
        let ninja = self.checkout.bin_executable("ninja", &self.host)?;
        let mut cmd = command(&ninja, self.checkout.v8_dir(), env);
        cmd.arg("-C").arg(project).arg(BUILD_TARGET);
        run(&mut cmd)
    }
}

/// A command that sees exactly `env`, nothing inherited from this process.
pub fn command<P: AsRef<std::ffi::OsStr>>(program: P, cwd: &Path, env: &EnvVars) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(cwd).env_clear().envs(env.iter());
    cmd
}

fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|x| x.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn run(cmd: &mut Command) -> Result<()> {
    let command = describe(cmd);
    debug!("running `{}`", command);
    let status = cmd.status().context(format!("cannot spawn `{}`", command))?;
    if !status.success() {
        return Err(Error::ToolFailed { command, status });
    }
    Ok(())
}

/// Like `run`, but returns stdout.
pub fn capture(cmd: &mut Command) -> Result<String> {
    let command = describe(cmd);
    debug!("running `{}`", command);
    let output = cmd
        .stderr(Stdio::inherit())
        .output()
        .context(format!("cannot spawn `{}`", command))?;
    if !output.status.success() {
        return Err(Error::ToolFailed { command, status: output.status });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Succeeds only if `program --version` can be executed.
pub fn probe(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
