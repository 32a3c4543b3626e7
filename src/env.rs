use crate::checkout::Checkout;
use crate::driver::{capture, command, run};
use crate::error::{Error, IoContext, Result};
use crate::types::{Arch, HostOs, Platform};
use hashbrown::HashMap;
use log::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Explicit environment handed to every external tool. The live process
/// environment is never modified.
pub type EnvVars = HashMap<String, String>;

pub const PYTHON: &str = "python3";

const VS_VERSION: &str = "2022";
const VS_EDITIONS: [&str; 2] = ["Professional", "Community"];

pub fn snapshot() -> EnvVars {
    std::env::vars().collect()
}

pub fn provision(checkout: &Checkout, host: &HostOs, platform: Platform, arch: Arch) -> Result<EnvVars> {
    match platform {
        Platform::Windows => setup_windows(checkout, host),
        Platform::Linux | Platform::Android => setup_linux(checkout, arch),
    }
}

pub fn sysroot_arch(arch: Arch) -> &'static str {
    match arch {
        Arch::X64 => "amd64",
        Arch::Arm64 => "arm64",
    }
}

fn python(checkout: &Checkout, dir: &str, env: &EnvVars) -> Command {
    command(PYTHON, &checkout.v8_dir().join(dir), env)
}

fn setup_linux(checkout: &Checkout, arch: Arch) -> Result<EnvVars> {
    let env = snapshot();
    run(python(checkout, "tools/clang/scripts", &env).arg("update.py"))?;
    run(python(checkout, "build/linux/sysroot_scripts", &env)
        .arg("install-sysroot.py")
        .arg(format!("--arch={}", sysroot_arch(arch))))?;
    Ok(env)
}

/// First Visual Studio edition installed under `program_files`.
pub fn find_msvc(program_files: &Path) -> Option<PathBuf> {
    VS_EDITIONS
        .iter()
        .map(|edition| {
            program_files
                .join("Microsoft Visual Studio")
                .join(VS_VERSION)
                .join(edition)
                .join("VC")
        })
        .find(|path| path.exists())
}

/// Folds the `KEY=VALUE` lines printed by `set` into `env`.
pub fn merge_set_output(env: &mut EnvVars, output: &str) {
    for line in output.lines() {
        if let Some((key, value)) = line.split_once('=') {
            if !key.is_empty() {
                env.insert(key.to_string(), value.to_string());
            }
        }
    }
}

fn vcvars_command(script: &Path, env: &EnvVars) -> Command {
    let cwd = script.parent().unwrap_or_else(|| Path::new("."));
    let mut cmd = command("cmd", cwd, env);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.raw_arg(format!("/S /C \"\"{}\" amd64 && set\"", script.display()));
    }
    #[cfg(not(windows))]
    cmd.arg("/C").arg(format!("\"{}\" amd64 && set", script.display()));
    cmd
}

fn setup_windows(checkout: &Checkout, host: &HostOs) -> Result<EnvVars> {
    let mut env = snapshot();

    let program_files = env
        .get("ProgramFiles")
        .cloned()
        .unwrap_or_else(|| "C:\\Program Files".to_string());
    let msvc = find_msvc(Path::new(&program_files)).ok_or_else(|| {
        Error::ToolchainDiscovery(format!(
            "Visual Studio {} was not found under {:?}",
            VS_VERSION, program_files
        ))
    })?;

    let script = msvc.join("Auxiliary").join("Build").join("vcvarsall.bat");
    let output = capture(&mut vcvars_command(&script, &env))?;
    merge_set_output(&mut env, &output);
    info!("\t- Visual Studio {} in {:?}", VS_VERSION, msvc);

    let toolset = env
        .get("VCToolsVersion")
        .cloned()
        .ok_or_else(|| Error::ToolchainDiscovery("MSVC toolset was not found".to_string()))?;
    info!("\t- C++ Toolset {}", toolset);

    env.insert("DEPOT_TOOLS_WIN_TOOLCHAIN".into(), "0".into());
    run(python(checkout, "build", &env).arg("vs_toolchain.py").arg("update"))?;

    let win_tools = checkout.v8_dir().join("buildtools").join("win");
    std::fs::create_dir_all(&win_tools).context(format!("cannot create {:?}", win_tools))?;
    let gn = checkout.bin_executable("gn", host)?;
    if let Some(name) = gn.file_name() {
        std::fs::copy(&gn, win_tools.join(name))
            .context(format!("cannot copy {:?} into {:?}", gn, win_tools))?;
    }

    run(python(checkout, "build/util", &env)
        .arg("lastchange.py")
        .arg("-o")
        .arg("LASTCHANGE"))?;
    Ok(env)
}
