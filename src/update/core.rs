//! Update orchestration: resolve, match, fetch, extract, install

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use tempfile::TempDir;

use super::asset::match_asset;
use super::error::UpdateError;
use super::extract::{ArchiveFormat, extract_binary_async};
use super::github::{Asset, AssetFetcher, GitHubReleases, ReleaseSource, resolve_release};
use super::platform::PlatformKey;
use super::progress::{EventSink, LogSink, UpdateEvent, UpdateStage};
use super::staging::install_binary;
use crate::config::{CoreUpdateConfig, HttpConfig};

/// Inputs for one update run
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    /// When false the run stops before any network access
    pub enabled: bool,
    pub platform: PlatformKey,
    pub include_prerelease: bool,
    pub install_path: PathBuf,
    /// Binary name inside release archives (e.g. "sing-box")
    pub binary_name: String,
    /// Parent for the per-run temporary directory; system temp dir when `None`
    pub scratch_dir: Option<PathBuf>,
}

/// Successful result of an update run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Core updates are switched off
    Disabled,
    /// `asset` from release `tag` was installed at `path`
    Installed {
        tag: String,
        asset: String,
        path: PathBuf,
    },
}

/// Run the whole pipeline once.
///
/// The temporary extraction directory is created on entering the extract
/// stage and removed before this returns, whatever the outcome.
pub async fn run_update<S, F>(
    source: &S,
    fetcher: &F,
    request: &UpdateRequest,
    events: &dyn EventSink,
) -> Result<UpdateOutcome, UpdateError>
where
    S: ReleaseSource + Sync,
    F: AssetFetcher + Sync,
{
    if !request.enabled {
        return Ok(report_disabled(&request.binary_name, events));
    }

    let result = run_stages(source, fetcher, request, events).await;

    match &result {
        Ok(UpdateOutcome::Installed { tag, path, .. }) => {
            let message = format!(
                "{} {} installed at {}",
                request.binary_name,
                tag,
                path.display()
            );
            report(events, UpdateEvent::new(UpdateStage::Done, message));
        }
        Ok(UpdateOutcome::Disabled) => {}
        Err(e) => report(events, UpdateEvent::failed(e.stage(), e)),
    }

    result
}

/// Forward to the caller's sink and mirror to the log
fn report(events: &dyn EventSink, event: UpdateEvent) {
    debug!("update event: {event}");
    events.emit(event);
}

fn report_disabled(binary_name: &str, events: &dyn EventSink) -> UpdateOutcome {
    let message = format!("{binary_name} core update is disabled");
    report(events, UpdateEvent::new(UpdateStage::Disabled, message));
    UpdateOutcome::Disabled
}

async fn run_stages<S, F>(
    source: &S,
    fetcher: &F,
    request: &UpdateRequest,
    events: &dyn EventSink,
) -> Result<UpdateOutcome, UpdateError>
where
    S: ReleaseSource + Sync,
    F: AssetFetcher + Sync,
{
    let platform = request.platform;

    // Resolving
    let message = format!(
        "Fetching release list (prereleases {})",
        if request.include_prerelease { "included" } else { "excluded" }
    );
    report(events, UpdateEvent::new(UpdateStage::Resolving, message));
    let feed = source
        .fetch_releases()
        .await
        .map_err(UpdateError::FeedUnavailable)?;
    let release = resolve_release(&feed, request.include_prerelease).ok_or(
        UpdateError::NoQualifyingRelease {
            include_prerelease: request.include_prerelease,
        },
    )?;

    // Matching
    let message = format!(
        "Selected release {}, looking for a {} asset",
        release.tag_name, platform
    );
    report(events, UpdateEvent::new(UpdateStage::Matching, message));
    let asset = match_asset(&release.assets, platform).ok_or_else(|| {
        UpdateError::NoMatchingAsset {
            tag: release.tag_name.clone(),
            target: platform.target_token(),
        }
    })?;
    let format = ArchiveFormat::from_asset_name(&asset.name)?;

    // Fetching
    let message = format!("Downloading {} from {}", asset.name, asset.browser_download_url);
    report(events, UpdateEvent::new(UpdateStage::Fetching, message));
    let data = fetcher
        .fetch_asset(&asset.browser_download_url)
        .await
        .map_err(|source| UpdateError::AssetUnavailable {
            asset: asset.name.clone(),
            source,
        })?;
    debug!("Downloaded {} bytes for {}", data.len(), asset.name);

    // Extracting: the scratch directory lives only for the rest of this run
    let scratch = create_scratch_dir(request.scratch_dir.as_deref())?;
    let message = format!("Extracting {} to {}", asset.name, scratch.path().display());
    report(events, UpdateEvent::new(UpdateStage::Extracting, message));

    let installed = extract_and_install(format, data, &scratch, asset, request, events).await;
    remove_scratch_dir(scratch);

    installed.map(|path| UpdateOutcome::Installed {
        tag: release.tag_name.clone(),
        asset: asset.name.clone(),
        path,
    })
}

async fn extract_and_install(
    format: ArchiveFormat,
    data: Vec<u8>,
    scratch: &TempDir,
    asset: &Asset,
    request: &UpdateRequest,
    events: &dyn EventSink,
) -> Result<PathBuf, UpdateError> {
    let extracted = extract_binary_async(
        format,
        data,
        scratch.path().to_path_buf(),
        request.binary_name.clone(),
        request.platform,
    )
    .await??;
    debug!("Extracted {} from {}", extracted.display(), asset.name);

    // Installing
    let message = format!(
        "Installing {} to {}",
        extracted.display(),
        request.install_path.display()
    );
    report(events, UpdateEvent::new(UpdateStage::Installing, message));
    install_binary(&extracted, &request.install_path)?;

    Ok(request.install_path.clone())
}

fn create_scratch_dir(parent: Option<&Path>) -> Result<TempDir, UpdateError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("singbox-");

    match parent {
        Some(parent) => builder.tempdir_in(parent),
        None => builder.tempdir(),
    }
    .map_err(UpdateError::TempDir)
}

fn remove_scratch_dir(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    match scratch.close() {
        Ok(()) => debug!("Removed temporary directory {}", path.display()),
        Err(e) => warn!(
            "Failed to remove temporary directory {}: {}",
            path.display(),
            e
        ),
    }
}

/// Updates the configured binary from GitHub releases
pub struct CoreUpdater {
    releases: GitHubReleases,
    config: CoreUpdateConfig,
}

impl CoreUpdater {
    pub fn new(config: &CoreUpdateConfig, http: &HttpConfig) -> Result<Self, UpdateError> {
        let releases = GitHubReleases::new(
            &http.api_base,
            &config.repository,
            &http.user_agent,
            Duration::from_secs(http.timeout_secs),
        )
        .map_err(UpdateError::FeedUnavailable)?;

        Ok(Self {
            releases,
            config: config.clone(),
        })
    }

    /// Build the request for this host; `include_prerelease` overrides the config
    pub fn request(&self, include_prerelease: Option<bool>) -> Result<UpdateRequest, UpdateError> {
        Ok(UpdateRequest {
            enabled: self.config.enabled,
            platform: PlatformKey::detect()?,
            include_prerelease: include_prerelease.unwrap_or(self.config.check_prerelease),
            install_path: self.config.install_path.clone(),
            binary_name: self.config.binary_name.clone(),
            scratch_dir: None,
        })
    }

    /// Run one update, reporting stage events to the log
    pub async fn run(
        &self,
        include_prerelease: Option<bool>,
    ) -> Result<UpdateOutcome, UpdateError> {
        // Checked before platform detection so unsupported hosts can still opt out
        if !self.config.enabled {
            return Ok(report_disabled(&self.config.binary_name, &LogSink));
        }

        let request = self.request(include_prerelease)?;
        run_update(&self.releases, &self.releases, &request, &LogSink).await
    }
}
