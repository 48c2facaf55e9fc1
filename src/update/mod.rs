//! GitHub release download and binary replacement
//!
//! This module keeps a locally installed executable in sync with the newest
//! compatible upstream release.
//!
//! ## Module Organization
//!
//! - `platform` - Platform detection and the asset naming table
//! - `github` - Release list model, collaborator traits, release resolution
//! - `asset` - Platform asset selection
//! - `extract` - Binary extraction from ZIP and tar.gz archives
//! - `staging` - Staged, atomic replacement of the installed binary
//! - `progress` - Stage events and event sinks
//! - `core` - Pipeline orchestration

mod asset;
mod core;
mod error;
mod extract;
mod github;
mod platform;
mod progress;
mod staging;

// Re-export public API
pub use asset::match_asset;
pub use self::core::{CoreUpdater, UpdateOutcome, UpdateRequest, run_update};
pub use error::{ExtractError, FetchError, InstallError, UpdateError};
pub use extract::{ArchiveFormat, extract_binary, extract_binary_async};
pub use github::{
    Asset, AssetFetcher, GitHubReleases, Release, ReleaseFeed, ReleaseSource, resolve_release,
};
pub use platform::{Arch, Os, PLATFORM_RULES, PlatformKey, PlatformRule};
pub use progress::{ChannelSink, CollectingSink, EventSink, LogSink, UpdateEvent, UpdateStage};
pub use staging::install_binary;
