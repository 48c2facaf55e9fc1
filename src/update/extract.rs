//! Binary extraction from release archives
//!
//! Handles pulling the executable out of `.tar.gz` and `.zip` release assets.

use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::debug;
use tar::Archive;
use zip::ZipArchive;

use super::error::ExtractError;
use super::platform::PlatformKey;

/// Archive container formats found in release assets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Determine the format from an asset file name
    pub fn from_asset_name(name: &str) -> Result<Self, ExtractError> {
        if name.ends_with(".zip") {
            Ok(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") {
            Ok(ArchiveFormat::TarGz)
        } else {
            Err(ExtractError::UnsupportedFormat(name.to_string()))
        }
    }
}

/// Whether an archive entry holds the binary (bare or `.exe` name)
fn is_binary_entry(entry_name: &str, binary_name: &str) -> bool {
    let bare = entry_name.strip_suffix(".exe").unwrap_or(entry_name);
    bare.ends_with(binary_name)
}

/// Extract the binary from an in-memory archive into `dest_dir`.
///
/// The output file is named for the target platform (`sing-box` or
/// `sing-box.exe`) regardless of the entry name inside the archive.
pub fn extract_binary(
    format: ArchiveFormat,
    data: &[u8],
    dest_dir: &Path,
    binary_name: &str,
    platform: PlatformKey,
) -> Result<PathBuf, ExtractError> {
    let final_path = dest_dir.join(platform.executable_name(binary_name));

    match format {
        ArchiveFormat::Zip => extract_from_zip(data, binary_name, &final_path)?,
        ArchiveFormat::TarGz => extract_from_tar_gz(data, binary_name, &final_path)?,
    }

    if !platform.is_windows() {
        set_executable(&final_path)?;
    }

    debug!("Extracted {} to {}", binary_name, final_path.display());
    Ok(final_path)
}

/// Run [`extract_binary`] on the blocking pool
pub async fn extract_binary_async(
    format: ArchiveFormat,
    data: Vec<u8>,
    dest_dir: PathBuf,
    binary_name: String,
    platform: PlatformKey,
) -> Result<Result<PathBuf, ExtractError>, tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        extract_binary(format, &data, &dest_dir, &binary_name, platform)
    })
    .await
}

fn extract_from_zip(data: &[u8], binary_name: &str, final_path: &Path) -> Result<(), ExtractError> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| ExtractError::io("Failed to read ZIP archive", io::Error::other(e)))?;

    let mut scanned = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| {
            ExtractError::io(format!("Failed to read ZIP entry at index {i}"), io::Error::other(e))
        })?;

        let name = file.name().to_string();
        if !file.is_dir() && is_binary_entry(&name, binary_name) {
            debug!("Found {} in ZIP entry {}", binary_name, name);
            return write_entry(&mut file, final_path);
        }
        scanned.push(name);
    }

    Err(ExtractError::EntryNotFound {
        binary: binary_name.to_string(),
        entries: scanned,
    })
}

fn extract_from_tar_gz(
    data: &[u8],
    binary_name: &str,
    final_path: &Path,
) -> Result<(), ExtractError> {
    let mut archive = Archive::new(GzDecoder::new(data));
    let entries = archive
        .entries()
        .map_err(|e| ExtractError::io("Failed to read tar.gz archive", e))?;

    let mut scanned = Vec::new();

    for entry in entries {
        let mut entry = entry.map_err(|e| ExtractError::io("Failed to read tar entry", e))?;
        let name = entry
            .path()
            .map_err(|e| ExtractError::io("Invalid tar entry path", e))?
            .to_string_lossy()
            .into_owned();

        if entry.header().entry_type().is_file() && is_binary_entry(&name, binary_name) {
            debug!("Found {} in tar entry {}", binary_name, name);
            return write_entry(&mut entry, final_path);
        }
        scanned.push(name);
    }

    Err(ExtractError::EntryNotFound {
        binary: binary_name.to_string(),
        entries: scanned,
    })
}

fn write_entry(reader: &mut impl Read, final_path: &Path) -> Result<(), ExtractError> {
    let mut outfile = File::create(final_path).map_err(|e| {
        ExtractError::io(format!("Failed to create {}", final_path.display()), e)
    })?;

    io::copy(reader, &mut outfile).map_err(|e| {
        ExtractError::io(format!("Failed to write {}", final_path.display()), e)
    })?;

    outfile
        .sync_all()
        .map_err(|e| ExtractError::io(format!("Failed to flush {}", final_path.display()), e))
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), ExtractError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(|e| {
        ExtractError::io(format!("Failed to set permissions on {}", path.display()), e)
    })
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), ExtractError> {
    Ok(())
}
