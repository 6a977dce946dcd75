//! Skill bundle installer.
//!
//! Bundles arrive as gzipped tarballs from the NeboLoop skill service.
//! Extraction refuses absolute paths and `..` components so a hostile
//! bundle cannot write outside its install directory.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use nebo_domain::error::{Error, Result};

/// Result of a bundle install.
#[derive(Debug)]
pub struct InstalledBundle {
    pub skill_dir: PathBuf,
    pub files: usize,
    pub manifest_found: bool,
}

/// Unpack a `.tar.gz` skill bundle into `{skills_root}/{name}/`.
///
/// An existing installation of the same name is replaced.
pub fn install_bundle(skills_root: &Path, name: &str, bundle: impl Read) -> Result<InstalledBundle> {
    if name.is_empty() || name.contains(['/', '\\', '.']) {
        return Err(Error::Other(format!("invalid skill bundle name: {name:?}")));
    }

    let target = skills_root.join(name);
    if target.exists() {
        std::fs::remove_dir_all(&target).map_err(Error::Io)?;
    }
    std::fs::create_dir_all(&target).map_err(Error::Io)?;

    let mut archive = Archive::new(GzDecoder::new(bundle));
    let mut files = 0usize;

    for entry in archive.entries().map_err(Error::Io)? {
        let mut entry = entry.map_err(Error::Io)?;
        let path = entry.path().map_err(Error::Io)?.into_owned();

        if !is_safe_relative(&path) {
            tracing::warn!(path = %path.display(), "skipping unsafe bundle entry");
            continue;
        }

        let dest = target.join(&path);
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(Error::Io)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        entry.unpack(&dest).map_err(Error::Io)?;
        files += 1;
    }

    let manifest_found = target.join("skill.toml").is_file();
    tracing::info!(
        skill = name,
        files,
        manifest_found,
        "skill bundle installed"
    );

    Ok(InstalledBundle {
        skill_dir: target,
        files,
        manifest_found,
    })
}

/// Only plain relative components are allowed.
fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}
