use crate::error::{IoContext, Result};
use crate::settings::CompileDefinitions;
use crate::types::{Platform, Version};
use log::*;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

pub const VERSION_FILE: &str = "v8-version.txt";
pub const DEFINITIONS_FILE: &str = "definitions.txt";

const WINDOWS_LIBS: [&str; 4] = ["v8", "v8_libbase", "v8_libplatform", "zlib"];
const POSIX_LIBS: [&str; 4] = ["libv8", "libv8_libbase", "libv8_libplatform", "libchrome_zlib"];

/// Library base names and file extensions a build is expected to produce.
pub fn library_table(platform: Platform) -> (&'static [&'static str], &'static [&'static str]) {
    match platform {
        Platform::Windows => (&WINDOWS_LIBS[..], &["dll", "dll.lib"][..]),
        Platform::Linux => (&POSIX_LIBS[..], &["so"][..]),
        Platform::Android => (&POSIX_LIBS[..], &["cr.so"][..]),
    }
}

pub struct LibPatterns(Vec<Regex>);

impl LibPatterns {
    pub fn new(names: &[&str], extensions: &[&str]) -> Result<Self> {
        let extensions = extensions
            .iter()
            .map(|x| regex::escape(x))
            .collect::<Vec<_>>()
            .join("|");
        let patterns = names
            .iter()
            .map(|name| {
                Regex::new(&format!(
                    r"^{}(?:\.(?:{ext}))+(?:\.\d+)*(\.(?:{ext}))?$",
                    regex::escape(name),
                    ext = extensions
                ))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(LibPatterns(patterns))
    }

    pub fn for_platform(platform: Platform) -> Result<Self> {
        let (names, extensions) = library_table(platform);
        LibPatterns::new(names, extensions)
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.0.iter().any(|x| x.is_match(file_name))
    }
}

fn recreate_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        fs::remove_dir_all(dir).context(format!("cannot remove {:?}", dir))?;
    }
    fs::create_dir_all(dir).context(format!("cannot create {:?}", dir))
}

fn copy(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(|_| ())
        .context(format!("cannot copy {:?} to {:?}", from, to))
}

/// Copies the libraries found directly inside `src` into a fresh `dest`.
/// A missing `src` is reported but yields an empty export.
pub fn export_libs(src: &Path, dest: &Path, platform: Platform) -> Result<Vec<PathBuf>> {
    recreate_dir(dest)?;
    if !src.is_dir() {
        error!("Directory {:?} does not exist!", src);
        return Ok(Vec::new());
    }
    info!("Packaging v8 in {:?}", dest);

    let patterns = LibPatterns::for_platform(platform)?;
    let mut copied = Vec::new();
    for entry in fs::read_dir(src).context(format!("cannot read {:?}", src))? {
        let path = entry.context(format!("cannot read {:?}", src))?.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|x| x.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if patterns.matches(name) {
            debug!("\t{}", name);
            let target = dest.join(name);
            copy(&path, &target)?;
            copied.push(target);
        }
    }
    copied.sort();
    Ok(copied)
}

/// Mirrors every `.h` file below `src` into a fresh `dest`.
pub fn export_includes(src: &Path, dest: &Path) -> Result<usize> {
    recreate_dir(dest)?;
    mirror_headers(src, dest)
}

fn mirror_headers(src: &Path, dest: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(src).context(format!("cannot read {:?}", src))? {
        let path = entry.context(format!("cannot read {:?}", src))?.path();
        let name = match path.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        if path.is_dir() {
            count += mirror_headers(&path, &dest.join(&name))?;
        } else if path.extension().map_or(false, |x| x == "h") {
            fs::create_dir_all(dest).context(format!("cannot create {:?}", dest))?;
            copy(&path, &dest.join(&name))?;
            count += 1;
        }
    }
    Ok(count)
}

pub fn export_definitions(dir: &Path, defs: &CompileDefinitions) -> Result<PathBuf> {
    fs::create_dir_all(dir).context(format!("cannot create {:?}", dir))?;
    let file = dir.join(DEFINITIONS_FILE);
    fs::write(&file, defs.join(";")).context(format!("cannot write {:?}", file))?;
    Ok(file)
}

pub fn export_version(dir: &Path, version: &Version) -> Result<PathBuf> {
    fs::create_dir_all(dir).context(format!("cannot create {:?}", dir))?;
    let file = dir.join(VERSION_FILE);
    fs::write(&file, version.to_string()).context(format!("cannot write {:?}", file))?;
    Ok(file)
}
