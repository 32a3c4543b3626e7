use crate::error::{Error, IoContext, Result};
use crate::types::{Arch, BuildConfig, BuildRequest, Platform};
use serde::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LibraryType {
    Shared,
    Static,
    Monolithic,
}

impl Default for LibraryType {
    fn default() -> Self {
        LibraryType::Shared
    }
}

impl FromStr for LibraryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(LibraryType::Shared),
            "static" => Ok(LibraryType::Static),
            "monolithic" => Ok(LibraryType::Monolithic),
            _ => Err(Error::Configuration { kind: "library type", value: s.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GnValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Display for GnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GnValue::Bool(b) => write!(f, "{}", b),
            GnValue::Int(i) => write!(f, "{}", i),
            GnValue::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<bool> for GnValue {
    fn from(b: bool) -> Self {
        GnValue::Bool(b)
    }
}

impl From<i64> for GnValue {
    fn from(i: i64) -> Self {
        GnValue::Int(i)
    }
}

impl From<&str> for GnValue {
    fn from(s: &str) -> Self {
        GnValue::Str(s.to_string())
    }
}

pub type GnArgs = BTreeMap<String, GnValue>;

/// Renders `key=value` pairs the way `gn gen --args=` expects them.
pub fn format_gn_args(args: &GnArgs) -> String {
    args.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompileDefinitions(BTreeSet<String>);

impl CompileDefinitions {
    pub fn insert<S: Into<String>>(&mut self, def: S) {
        self.0.insert(def.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, def: &str) -> bool {
        self.0.contains(def)
    }

    pub fn join(&self, sep: &str) -> String {
        self.0.iter().map(String::as_str).collect::<Vec<_>>().join(sep)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    library_type: Option<LibraryType>,
    #[serde(default)]
    args: GnArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSettings {
    pub library_type: LibraryType,
    defaults: GnArgs,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        ProjectSettings::new(LibraryType::default())
    }
}

impl ProjectSettings {
    pub fn new(library_type: LibraryType) -> Self {
        let mut settings = ProjectSettings {
            library_type,
            defaults: GnArgs::new(),
        };
        let args = &mut settings.defaults;
        args.insert("use_custom_libcxx".into(), false.into());

        args.insert("treat_warnings_as_errors".into(), false.into());
        args.insert("fatal_linker_warnings".into(), false.into());
        args.insert("v8_optimized_debug".into(), true.into());

        args.insert("v8_use_snapshot".into(), false.into());
        args.insert("v8_use_external_startup_data".into(), false.into());
        args.insert("v8_enable_verify_heap".into(), false.into());
        args.insert("v8_enable_fast_mksnapshot".into(), false.into());
        args.insert("v8_enable_fast_torque".into(), false.into());
        args.insert("v8_enable_pointer_compression".into(), true.into());
        args.insert("v8_enable_i18n_support".into(), false.into());
        settings.apply_linkage();
        settings
    }

    /// Reads a JSON settings file. `library_type`, when given, overrides the
    /// one stored in the file.
    pub fn load(path: &Path, library_type: Option<LibraryType>) -> Result<Self> {
        let mut content = std::fs::read(path)
            .context(format!("cannot read settings file {:?}", path))?;
        let file: SettingsFile = simd_json::serde::from_slice(content.as_mut_slice())?;
        let mut settings = ProjectSettings::new(library_type.or(file.library_type).unwrap_or_default());
        settings.override_args(file.args);
        Ok(settings)
    }

    /// Merges user-supplied flags over the defaults. Linkage flags always
    /// follow the library type.
    pub fn override_args(&mut self, args: GnArgs) {
        self.defaults.extend(args);
        self.apply_linkage();
    }

    fn apply_linkage(&mut self) {
        let lt = self.library_type;
        let args = &mut self.defaults;
        args.insert("is_component_build".into(), (lt == LibraryType::Shared).into());
        args.insert("v8_static_library".into(),
                    (lt == LibraryType::Static || lt == LibraryType::Monolithic).into());
        args.insert("v8_monolithic".into(), (lt == LibraryType::Monolithic).into());
    }

    pub fn defaults(&self) -> &GnArgs {
        &self.defaults
    }

    fn flag(&self, name: &str) -> bool {
        self.defaults.get(name) == Some(&GnValue::Bool(true))
    }

    pub fn build_args(&self, request: &BuildRequest) -> GnArgs {
        let mut args = self.defaults.clone();

        args.insert("is_clang".into(), (request.platform != Platform::Windows).into());
        args.insert("target_os".into(), target_os(request.platform).into());
        args.insert("target_cpu".into(), target_cpu(request.arch).into());

        args.insert("is_debug".into(), (request.config == BuildConfig::Debug).into());
        if request.config == BuildConfig::Release {
            args.insert("symbol_level".into(), 0i64.into());
        }
        args
    }

    pub fn compile_definitions(&self) -> CompileDefinitions {
        let mut defs = CompileDefinitions::default();
        if self.flag("v8_enable_pointer_compression") {
            defs.insert("V8_ENABLE_SANDBOX=1");
            defs.insert("V8_COMPRESS_POINTERS=1");
            defs.insert("V8_31BIT_SMIS_ON_64BIT_ARCH=1");
        }
        if self.flag("v8_enable_31bit_smis_on_64bit_arch") {
            defs.insert("V8_ENABLE_SANDBOX=1");
            defs.insert("V8_31BIT_SMIS_ON_64BIT_ARCH=1");
        }
        defs
    }
}

pub fn target_os(platform: Platform) -> &'static str {
    match platform {
        Platform::Windows => "win",
        Platform::Linux => "linux",
        Platform::Android => "android",
    }
}

pub fn target_cpu(arch: Arch) -> &'static str {
    match arch {
        Arch::X64 => "x64",
        Arch::Arm64 => "arm64",
    }
}
