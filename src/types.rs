use crate::error::{Error, Result};
use serde::*;
use std::fmt::{self, Display};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    Windows,
    Linux,
    Android,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Arch {
    #[serde(rename = "x64")]
    X64,
    Arm64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildConfig {
    Debug,
    Release,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::Linux, Platform::Android];

    pub fn name(self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::Linux => "Linux",
            Platform::Android => "Android",
        }
    }

    pub fn dir_name(self) -> String {
        self.name().to_lowercase()
    }

    /// Host OS a build for this platform has to run on.
    pub fn required_host(self) -> HostOs {
        match self {
            Platform::Windows => HostOs::Windows,
            Platform::Linux | Platform::Android => HostOs::Linux,
        }
    }
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::X64, Arch::Arm64];

    pub fn name(self) -> &'static str {
        match self {
            Arch::X64 => "x64",
            Arch::Arm64 => "Arm64",
        }
    }

    pub fn dir_name(self) -> String {
        self.name().to_lowercase()
    }
}

impl BuildConfig {
    pub const ALL: [BuildConfig; 2] = [BuildConfig::Debug, BuildConfig::Release];

    pub fn name(self) -> &'static str {
        match self {
            BuildConfig::Debug => "Debug",
            BuildConfig::Release => "Release",
        }
    }

    pub fn dir_name(self) -> String {
        self.name().to_lowercase()
    }
}

macro_rules! named_enum {
    ($ty:ident, $kind:literal) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                $ty::ALL
                    .iter()
                    .copied()
                    .find(|x| x.name().eq_ignore_ascii_case(s))
                    .ok_or_else(|| Error::Configuration {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_enum!(Platform, "platform");
named_enum!(Arch, "CPU architecture");
named_enum!(BuildConfig, "build configuration");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BuildRequest {
    pub platform: Platform,
    pub arch: Arch,
    pub config: BuildConfig,
}

impl BuildRequest {
    pub fn new(platform: Platform, arch: Arch, config: BuildConfig) -> Self {
        BuildRequest { platform, arch, config }
    }

    /// Cross product with platform outermost and configuration innermost.
    pub fn matrix(platforms: &[Platform], archs: &[Arch], configs: &[BuildConfig]) -> Vec<BuildRequest> {
        platforms
            .iter()
            .flat_map(|&p| {
                archs
                    .iter()
                    .flat_map(move |&a| configs.iter().map(move |&c| BuildRequest::new(p, a, c)))
            })
            .collect()
    }
}

impl Display for BuildRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.platform, self.arch, self.config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    Linux,
    Other(String),
}

impl HostOs {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => HostOs::Windows,
            "linux" => HostOs::Linux,
            other => HostOs::Other(other.to_string()),
        }
    }

    pub fn executable_suffix(&self) -> &'static str {
        match self {
            HostOs::Linux => "",
            _ => ".exe",
        }
    }
}

impl Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOs::Windows => f.write_str("Windows"),
            HostOs::Linux => f.write_str("Linux"),
            HostOs::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub build: Option<u32>,
    pub patch: Option<u32>,
}

impl Version {
    pub fn new(major: u32, minor: u32, build: Option<u32>, patch: Option<u32>) -> Self {
        Version { major, minor, build, patch }
    }

    /// Name of the last-known-good branch for this major.minor.
    pub fn lkgr_branch(&self) -> String {
        format!("{}.{}-lkgr", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = s
            .trim()
            .split('.')
            .map(|x| x.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::Version(s.to_string()))?;
        match parts.as_slice() {
            [major, minor] => Ok(Version::new(*major, *minor, None, None)),
            [major, minor, build] => Ok(Version::new(*major, *minor, Some(*build), None)),
            [major, minor, build, patch] => Ok(Version::new(*major, *minor, Some(*build), Some(*patch))),
            _ => Err(Error::Version(s.to_string())),
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(build) = self.build {
            write!(f, ".{}", build)?;
            if let Some(patch) = self.patch {
                write!(f, ".{}", patch)?;
            }
        }
        Ok(())
    }
}
