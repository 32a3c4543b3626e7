use crate::error::{Error, IoContext, Result};
use crate::git;
use crate::types::{BuildRequest, HostOs, Version};
use log::*;
use regex::Regex;
use std::path::{Path, PathBuf};

pub const V8_REPOSITORY: &str = "https://chromium.googlesource.com/v8/v8.git";

/// A V8 source checkout plus the tool binaries and patches next to it.
#[derive(Debug)]
pub struct Checkout {
    v8_dir: PathBuf,
    bin_dir: PathBuf,
    patch_dir: PathBuf,
    pub version: Version,
}

impl Checkout {
    pub fn open(root: &Path) -> Result<Self> {
        let v8_dir = root.join("v8");
        if !v8_dir.is_dir() {
            return Err(Error::MissingCheckout(v8_dir));
        }
        let header = v8_dir.join("include").join("v8-version.h");
        let content = std::fs::read_to_string(&header)
            .context(format!("cannot read {:?}", header))?;
        let version = parse_version_header(&content, &header)?;
        Ok(Checkout {
            v8_dir,
            bin_dir: root.join("bin"),
            patch_dir: root.join("patches"),
            version,
        })
    }

    /// Fetches the last-known-good branch of `version` into `<root>/v8`.
    pub fn initialize(root: &Path, version: &Version) -> Result<Self> {
        let remote = format!("{}@{}", V8_REPOSITORY, version.lkgr_branch());
        git::fetch(&remote, &root.join("v8"))?;
        Checkout::open(root)
    }

    pub fn v8_dir(&self) -> &Path {
        &self.v8_dir
    }

    pub fn include_dir(&self) -> PathBuf {
        self.v8_dir.join("include")
    }

    pub fn project_dir(&self, request: &BuildRequest) -> PathBuf {
        self.v8_dir
            .join("out.gn")
            .join(request.platform.dir_name())
            .join(request.arch.dir_name())
            .join(request.config.dir_name())
    }

    pub fn bin_executable(&self, name: &str, host: &HostOs) -> Result<PathBuf> {
        let path = self.bin_dir.join(format!("{}{}", name, host.executable_suffix()));
        if !path.exists() {
            return Err(Error::ToolMissing { name: name.to_string(), path });
        }
        Ok(path)
    }

    /// Patch files for this version, from `patches/<major>` then
    /// `patches/<major>.<minor>`.
    pub fn patches(&self) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        for dir in &[
            self.patch_dir.join(self.version.major.to_string()),
            self.patch_dir.join(format!("{}.{}", self.version.major, self.version.minor)),
        ] {
            let mut found = Vec::new();
            collect_patches(dir, &mut found)?;
            found.sort();
            result.extend(found);
        }
        Ok(result)
    }

    pub fn apply_patches(&self) -> Result<usize> {
        let mut applied = 0;
        for patch in self.patches()? {
            if git::apply_patch(&patch, &self.v8_dir)? {
                applied += 1;
            }
        }
        info!("{} patch(es) applied to V8 v{}", applied, self.version);
        Ok(applied)
    }
}

fn collect_patches(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).context(format!("cannot read {:?}", dir))? {
        let path = entry.context(format!("cannot read {:?}", dir))?.path();
        if path.is_dir() {
            collect_patches(&path, out)?;
        } else if path.extension().map_or(false, |x| x == "patch") {
            out.push(path);
        }
    }
    Ok(())
}

pub fn parse_version_header(content: &str, path: &Path) -> Result<Version> {
    let field = |name: &'static str| -> Result<u32> {
        let re = Regex::new(&format!(r"{} (\d+)", name))?;
        re.captures(content)
            .and_then(|c| c[1].parse().ok())
            .ok_or_else(|| Error::VersionHeader { field: name, path: path.to_path_buf() })
    };
    Ok(Version::new(
        field("V8_MAJOR_VERSION")?,
        field("V8_MINOR_VERSION")?,
        Some(field("V8_BUILD_NUMBER")?),
        Some(field("V8_PATCH_LEVEL")?),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{Arch, BuildConfig, Platform};
    use std::fs;

    pub const HEADER: &str = "#define V8_MAJOR_VERSION 11\n\
                              #define V8_MINOR_VERSION 1\n\
                              #define V8_BUILD_NUMBER 277\n\
                              #define V8_PATCH_LEVEL 17\n";

    /// A minimal checkout with a version header and a couple of public headers.
    pub fn fake_root() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let include = root.path().join("v8/include");
        fs::create_dir_all(include.join("cppgc/internal")).unwrap();
        fs::write(include.join("v8-version.h"), HEADER).unwrap();
        fs::write(include.join("v8.h"), "// v8").unwrap();
        fs::write(include.join("cppgc/internal/api-constants.h"), "// cppgc").unwrap();
        fs::write(include.join("OWNERS"), "owners").unwrap();
        root
    }

    #[test]
    fn parses_version_header() {
        let v = parse_version_header(HEADER, Path::new("v8-version.h")).unwrap();
        assert_eq!(v.to_string(), "11.1.277.17");
        match parse_version_header("#define V8_MAJOR_VERSION 11", Path::new("h")) {
            Err(Error::VersionHeader { field, .. }) => assert_eq!(field, "V8_MINOR_VERSION"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn open_requires_checkout() {
        let empty = tempfile::tempdir().unwrap();
        assert!(matches!(Checkout::open(empty.path()), Err(Error::MissingCheckout(_))));

        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        assert_eq!(checkout.version, Version::new(11, 1, Some(277), Some(17)));
        let request = BuildRequest::new(Platform::Android, Arch::Arm64, BuildConfig::Release);
        assert_eq!(
            checkout.project_dir(&request),
            root.path().join("v8/out.gn/android/arm64/release")
        );
    }

    #[test]
    fn missing_tools_are_reported() {
        let root = fake_root();
        let checkout = Checkout::open(root.path()).unwrap();
        assert!(matches!(
            checkout.bin_executable("gn", &HostOs::Linux),
            Err(Error::ToolMissing { .. })
        ));
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::write(root.path().join("bin/gn.exe"), "").unwrap();
        assert_eq!(
            checkout.bin_executable("gn", &HostOs::Windows).unwrap(),
            root.path().join("bin/gn.exe")
        );
    }

    #[test]
    fn finds_patches_for_major_then_minor() {
        let root = fake_root();
        let patches = root.path().join("patches");
        fs::create_dir_all(patches.join("11/nested")).unwrap();
        fs::create_dir_all(patches.join("11.1")).unwrap();
        fs::create_dir_all(patches.join("12")).unwrap();
        fs::write(patches.join("11/b.patch"), "").unwrap();
        fs::write(patches.join("11/nested/a.patch"), "").unwrap();
        fs::write(patches.join("11/readme.md"), "").unwrap();
        fs::write(patches.join("11.1/c.patch"), "").unwrap();
        fs::write(patches.join("12/d.patch"), "").unwrap();

        let checkout = Checkout::open(root.path()).unwrap();
        let found = checkout.patches().unwrap();
        assert_eq!(
            found,
            vec![
                patches.join("11/b.patch"),
                patches.join("11/nested/a.patch"),
                patches.join("11.1/c.patch"),
            ]
        );
    }
}
