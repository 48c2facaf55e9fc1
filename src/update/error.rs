//! Error types for the update pipeline

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::progress::UpdateStage;

/// Failure talking to the release host
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("server returned {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure unpacking a release archive
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("{binary} not found in archive (entries: {})", .entries.join(", "))]
    EntryNotFound {
        binary: String,
        entries: Vec<String>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        ExtractError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failure replacing the installed binary
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to resolve symlink {}: {source}", .path.display())]
    ResolveLink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {}: {source}", .path.display())]
    DirCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {}: {source}", .path.display())]
    OpenSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create {}: {source}{}", .path.display(), elevation_hint(.source))]
    CreateDest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to copy binary to {}: {source}", .path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to set permissions on {}: {source}", .path.display())]
    Chmod {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to replace {}: {source}{}", .path.display(), elevation_hint(.source))]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn elevation_hint(source: &io::Error) -> &'static str {
    if source.kind() == io::ErrorKind::PermissionDenied {
        " (may require administrator privileges)"
    } else {
        ""
    }
}

fn prerelease_policy(include_prerelease: &bool) -> &'static str {
    if *include_prerelease { "included" } else { "excluded" }
}

impl InstallError {
    /// Whether the destination refused writes for lack of privileges
    pub fn requires_elevation(&self) -> bool {
        match self {
            InstallError::CreateDest { source, .. } | InstallError::Replace { source, .. } => {
                source.kind() == io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }
}

/// Terminal failure of one update run
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("unsupported platform: {os} {arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("failed to fetch release list: {0}")]
    FeedUnavailable(#[source] FetchError),

    #[error("no qualifying release found (prereleases {})", prerelease_policy(.include_prerelease))]
    NoQualifyingRelease { include_prerelease: bool },

    #[error("no asset in release {tag} matches platform {target}")]
    NoMatchingAsset { tag: String, target: String },

    #[error("failed to download {asset}: {source}")]
    AssetUnavailable {
        asset: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] io::Error),

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("installation failed: {0}")]
    Install(#[from] InstallError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl UpdateError {
    /// Pipeline stage the failure belongs to
    pub fn stage(&self) -> UpdateStage {
        match self {
            UpdateError::UnsupportedPlatform { .. }
            | UpdateError::FeedUnavailable(_)
            | UpdateError::NoQualifyingRelease { .. } => UpdateStage::Resolving,
            UpdateError::NoMatchingAsset { .. } => UpdateStage::Matching,
            UpdateError::AssetUnavailable { .. } => UpdateStage::Fetching,
            UpdateError::TempDir(_) | UpdateError::Extract(_) | UpdateError::Task(_) => {
                UpdateStage::Extracting
            }
            UpdateError::Install(_) => UpdateStage::Installing,
        }
    }

    /// chmod failures and privileged destination writes
    pub fn is_permission_failure(&self) -> bool {
        match self {
            UpdateError::Install(InstallError::Chmod { .. }) => true,
            UpdateError::Install(e) => e.requires_elevation(),
            _ => false,
        }
    }
}
