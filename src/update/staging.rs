//! Binary installation to its final destination
//!
//! The new binary is written to a staging file next to the destination and
//! renamed over it, so a failure at any step leaves the previous binary intact.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use super::error::InstallError;

/// Install `source` at `dest`, replacing any existing file.
///
/// Parent directories are created as needed. A symlinked `dest` is followed
/// and its target replaced. On Unix the installed file is made executable (755).
pub fn install_binary(source: &Path, dest: &Path) -> Result<(), InstallError> {
    info!("Installing {} to {}", source.display(), dest.display());

    let resolved = resolve_destination(dest)?;
    if resolved != dest {
        debug!("{} is a symlink, replacing {}", dest.display(), resolved.display());
    }
    let dest = resolved.as_path();

    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(parent).map_err(|source| InstallError::DirCreate {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut source_file = File::open(source).map_err(|e| InstallError::OpenSource {
        path: source.to_path_buf(),
        source: e,
    })?;

    let mut staged = stage_file(parent, dest)?;

    io::copy(&mut source_file, staged.as_file_mut())
        .and_then(|_| staged.as_file_mut().flush())
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|source| InstallError::Copy {
            path: dest.to_path_buf(),
            source,
        })?;

    set_executable(staged.path())?;

    // Dropping the NamedTempFile on error removes the staging file
    staged.persist(dest).map_err(|e| InstallError::Replace {
        path: dest.to_path_buf(),
        source: e.error,
    })?;

    info!("Installation successful: {}", dest.display());
    Ok(())
}

/// Follow a symlinked destination so the link keeps pointing at the new binary
fn resolve_destination(dest: &Path) -> Result<PathBuf, InstallError> {
    let is_link = fs::symlink_metadata(dest).is_ok_and(|meta| meta.file_type().is_symlink());
    if !is_link {
        return Ok(dest.to_path_buf());
    }

    let resolve_err = |source: io::Error| InstallError::ResolveLink {
        path: dest.to_path_buf(),
        source,
    };

    match fs::canonicalize(dest) {
        Ok(target) => Ok(target),
        // Dangling link: install where it points
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let target = fs::read_link(dest).map_err(resolve_err)?;
            Ok(match dest.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target,
            })
        }
        Err(e) => Err(resolve_err(e)),
    }
}

/// Create the staging file in the destination directory so the final rename
/// stays on one filesystem
fn stage_file(parent: &Path, dest: &Path) -> Result<NamedTempFile, InstallError> {
    let prefix = format!(
        ".{}.",
        dest.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "binary".to_string())
    );

    tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".new")
        .tempfile_in(parent)
        .map_err(|source| InstallError::CreateDest {
            path: dest.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| {
        InstallError::Chmod {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), InstallError> {
    Ok(())
}
