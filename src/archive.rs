use crate::error::{IoContext, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::*;
use rayon::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub const BUNDLE_EXTENSION: &str = "tar.gz";

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .context(format!("cannot read {:?}", dir))?
        .map(|x| x.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .context(format!("cannot read {:?}", dir))?;
    entries.sort();
    Ok(entries)
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for path in sorted_entries(dir)? {
        if path.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// `(platform, arch, arch_dir)` for every arch directory below `build_dir`.
fn pairs(build_dir: &Path) -> Result<Vec<(String, String, PathBuf)>> {
    let mut result = Vec::new();
    for platform in sorted_entries(build_dir)?.into_iter().filter(|x| x.is_dir()) {
        for arch in sorted_entries(&platform)?.into_iter().filter(|x| x.is_dir()) {
            let name = |p: &Path| p.file_name().map(|x| x.to_string_lossy().into_owned());
            if let (Some(p), Some(a)) = (name(&platform), name(&arch)) {
                result.push((p, a, arch));
            }
        }
    }
    Ok(result)
}

fn bundle(file: &Path, arch_dir: &Path, build_dir: &Path) -> Result<()> {
    let mut files = Vec::new();
    walk_files(arch_dir, &mut files)?;

    let out = File::create(file).context(format!("cannot create {:?}", file))?;
    let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
    for path in &files {
        // Entry names stay relative to the build root so extraction yields <platform>/<arch>/...
        let name = path.strip_prefix(build_dir).unwrap_or(path);
        builder
            .append_path_with_name(path, name)
            .context(format!("cannot add {:?} to {:?}", path, file))?;
    }
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .context(format!("cannot finish {:?}", file))?;
    info!("\t{:?} ({} files)", file, files.len());
    Ok(())
}

/// Writes one `<platform>-<arch>.tar.gz` per arch directory of `build_dir`
/// into a freshly recreated `archive_dir`.
pub fn archive(archive_dir: &Path, build_dir: &Path) -> Result<Vec<PathBuf>> {
    if archive_dir.is_dir() {
        fs::remove_dir_all(archive_dir).context(format!("cannot remove {:?}", archive_dir))?;
    }
    fs::create_dir_all(archive_dir).context(format!("cannot create {:?}", archive_dir))?;
    info!("Archiving libraries in {:?}", archive_dir);

    pairs(build_dir)?
        .par_iter()
        .map(|(platform, arch, dir)| {
            let file = archive_dir.join(format!("{}-{}.{}", platform, arch, BUNDLE_EXTENSION));
            bundle(&file, dir, build_dir).map(|_| file)
        })
        .collect()
}
