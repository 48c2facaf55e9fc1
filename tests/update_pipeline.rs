use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;

use singbox_manager::update::{
    Arch, Asset, AssetFetcher, ChannelSink, CollectingSink, ExtractError, FetchError, Os,
    PlatformKey, Release, ReleaseFeed, ReleaseSource, UpdateError, UpdateOutcome, UpdateRequest,
    UpdateStage, run_update,
};

const LINUX_AMD64: PlatformKey = PlatformKey::new(Os::Linux, Arch::Amd64);
const WINDOWS_AMD64: PlatformKey = PlatformKey::new(Os::Windows, Arch::Amd64);

/// Serves a fixed feed, or a 503 when `feed` is `None`
struct FakeFeed {
    feed: Option<ReleaseFeed>,
    calls: AtomicUsize,
}

impl FakeFeed {
    fn new(feed: ReleaseFeed) -> Self {
        Self {
            feed: Some(feed),
            calls: AtomicUsize::new(0),
        }
    }

    fn unavailable() -> Self {
        Self {
            feed: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ReleaseSource for FakeFeed {
    async fn fetch_releases(&self) -> Result<ReleaseFeed, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.feed.clone().ok_or_else(|| FetchError::Status {
            url: "https://api.test/releases".to_string(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        })
    }
}

/// Serves asset bytes by URL; unknown URLs are 404
#[derive(Default)]
struct FakeAssets {
    files: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl FakeAssets {
    fn with(mut self, url: &str, data: Vec<u8>) -> Self {
        self.files.insert(url.to_string(), data);
        self
    }
}

impl AssetFetcher for FakeAssets {
    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.files.get(url).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: reqwest::StatusCode::NOT_FOUND,
        })
    }
}

fn release(tag: &str, prerelease: bool, assets: &[&str]) -> Release {
    Release {
        tag_name: tag.to_string(),
        prerelease,
        assets: assets
            .iter()
            .map(|name| Asset {
                name: name.to_string(),
                browser_download_url: asset_url(tag, name),
            })
            .collect(),
    }
}

fn asset_url(tag: &str, name: &str) -> String {
    format!("https://downloads.test/{tag}/{name}")
}

fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn zip_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

struct Harness {
    _root: TempDir,
    scratch: PathBuf,
    install_path: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let install_path = root.path().join("usr/local/bin/sing-box");
        Self {
            _root: root,
            scratch,
            install_path,
        }
    }

    fn request(&self, platform: PlatformKey, include_prerelease: bool) -> UpdateRequest {
        UpdateRequest {
            enabled: true,
            platform,
            include_prerelease,
            install_path: self.install_path.clone(),
            binary_name: "sing-box".to_string(),
            scratch_dir: Some(self.scratch.clone()),
        }
    }

    fn assert_scratch_empty(&self) {
        let leftovers: Vec<_> = fs::read_dir(&self.scratch).unwrap().collect();
        assert!(leftovers.is_empty(), "temporary directory left behind");
    }
}

#[cfg(unix)]
fn mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[tokio::test]
async fn installs_linux_tarball() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default().with(
        &asset_url("v2.0.0", "sing-box-linux-amd64.tar.gz"),
        tar_gz(&[
            ("sing-box-2.0.0-linux-amd64/LICENSE", b"license"),
            ("sing-box-2.0.0-linux-amd64/sing-box", b"new binary"),
        ]),
    );
    let events = CollectingSink::new();

    let outcome = run_update(&feed, &assets, &harness.request(LINUX_AMD64, false), &events)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Installed {
            tag: "v2.0.0".to_string(),
            asset: "sing-box-linux-amd64.tar.gz".to_string(),
            path: harness.install_path.clone(),
        }
    );
    assert_eq!(fs::read(&harness.install_path).unwrap(), b"new binary");
    #[cfg(unix)]
    assert_eq!(mode(&harness.install_path), 0o755);
    assert_eq!(
        events.stages(),
        vec![
            UpdateStage::Resolving,
            UpdateStage::Matching,
            UpdateStage::Fetching,
            UpdateStage::Extracting,
            UpdateStage::Installing,
            UpdateStage::Done,
        ]
    );
    harness.assert_scratch_empty();
}

#[tokio::test]
async fn stable_policy_skips_newer_prerelease() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![
        release("v2.1.0-beta", true, &["sing-box-linux-amd64.tar.gz"]),
        release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"]),
    ]);
    let assets = FakeAssets::default()
        .with(
            &asset_url("v2.1.0-beta", "sing-box-linux-amd64.tar.gz"),
            tar_gz(&[("sing-box", b"beta")]),
        )
        .with(
            &asset_url("v2.0.0", "sing-box-linux-amd64.tar.gz"),
            tar_gz(&[("sing-box", b"stable")]),
        );

    let outcome = run_update(
        &feed,
        &assets,
        &harness.request(LINUX_AMD64, false),
        &CollectingSink::new(),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Installed { ref tag, .. } if tag == "v2.0.0"));
    assert_eq!(fs::read(&harness.install_path).unwrap(), b"stable");

    let outcome = run_update(
        &feed,
        &assets,
        &harness.request(LINUX_AMD64, true),
        &CollectingSink::new(),
    )
    .await
    .unwrap();
    assert!(matches!(outcome, UpdateOutcome::Installed { ref tag, .. } if tag == "v2.1.0-beta"));
    assert_eq!(fs::read(&harness.install_path).unwrap(), b"beta");
}

#[tokio::test]
async fn unmatched_platform_leaves_existing_binary() {
    let harness = Harness::new();
    fs::create_dir_all(harness.install_path.parent().unwrap()).unwrap();
    fs::write(&harness.install_path, b"old binary").unwrap();

    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default();
    let events = CollectingSink::new();

    let err = run_update(&feed, &assets, &harness.request(WINDOWS_AMD64, false), &events)
        .await
        .unwrap_err();

    match &err {
        UpdateError::NoMatchingAsset { tag, target } => {
            assert_eq!(tag, "v2.0.0");
            assert_eq!(target, "windows-amd64");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), UpdateStage::Matching);
    assert_eq!(assets.calls.load(Ordering::SeqCst), 0);
    assert_eq!(fs::read(&harness.install_path).unwrap(), b"old binary");

    let recorded = events.events();
    let last = recorded.last().unwrap();
    assert_eq!(last.stage, UpdateStage::Failed);
    assert!(last.is_error);
    assert!(last.message.starts_with("[matching]"));
    harness.assert_scratch_empty();
}

#[tokio::test]
async fn missing_entry_stops_before_install_and_cleans_up() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default().with(
        &asset_url("v2.0.0", "sing-box-linux-amd64.tar.gz"),
        tar_gz(&[("README.md", b"readme"), ("LICENSE", b"license")]),
    );
    let events = CollectingSink::new();

    let err = run_update(&feed, &assets, &harness.request(LINUX_AMD64, false), &events)
        .await
        .unwrap_err();

    match err {
        UpdateError::Extract(ExtractError::EntryNotFound { binary, entries }) => {
            assert_eq!(binary, "sing-box");
            assert_eq!(entries, vec!["README.md".to_string(), "LICENSE".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!events.stages().contains(&UpdateStage::Installing));
    assert_eq!(events.stages().last(), Some(&UpdateStage::Failed));
    assert!(!harness.install_path.exists());
    harness.assert_scratch_empty();
}

#[tokio::test]
async fn windows_zip_installs_exe_entry() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release(
        "v2.0.0",
        false,
        &[
            "sing-box-windows-amd64.tar.gz",
            "sing-box-windows-amd64.zip",
        ],
    )]);
    let assets = FakeAssets::default().with(
        &asset_url("v2.0.0", "sing-box-windows-amd64.zip"),
        zip_archive(&[("sing-box-2.0.0-windows-amd64/sing-box.exe", b"MZ exe")]),
    );

    let outcome = run_update(
        &feed,
        &assets,
        &harness.request(WINDOWS_AMD64, false),
        &CollectingSink::new(),
    )
    .await
    .unwrap();

    assert!(matches!(
        outcome,
        UpdateOutcome::Installed { ref asset, .. } if asset == "sing-box-windows-amd64.zip"
    ));
    assert_eq!(fs::read(&harness.install_path).unwrap(), b"MZ exe");
    harness.assert_scratch_empty();
}

#[tokio::test]
async fn disabled_run_touches_nothing() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default();
    let events = CollectingSink::new();
    let mut request = harness.request(LINUX_AMD64, false);
    request.enabled = false;

    let outcome = run_update(&feed, &assets, &request, &events).await.unwrap();

    assert_eq!(outcome, UpdateOutcome::Disabled);
    assert_eq!(events.stages(), vec![UpdateStage::Disabled]);
    assert_eq!(feed.calls.load(Ordering::SeqCst), 0);
    assert_eq!(assets.calls.load(Ordering::SeqCst), 0);
    assert!(!harness.install_path.exists());
}

#[tokio::test]
async fn feed_failure_is_reported_as_resolving() {
    let harness = Harness::new();
    let events = CollectingSink::new();

    let err = run_update(
        &FakeFeed::unavailable(),
        &FakeAssets::default(),
        &harness.request(LINUX_AMD64, false),
        &events,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, UpdateError::FeedUnavailable(FetchError::Status { .. })));
    assert_eq!(err.stage(), UpdateStage::Resolving);
    assert_eq!(
        events.stages(),
        vec![UpdateStage::Resolving, UpdateStage::Failed]
    );
}

#[tokio::test]
async fn prerelease_only_feed_has_no_stable_release() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release("v2.1.0-rc.1", true, &["sing-box-linux-amd64.tar.gz"])]);

    let err = run_update(
        &feed,
        &FakeAssets::default(),
        &harness.request(LINUX_AMD64, false),
        &CollectingSink::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        UpdateError::NoQualifyingRelease {
            include_prerelease: false
        }
    ));
}

#[tokio::test]
async fn download_failure_allocates_no_scratch_dir() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);

    let err = run_update(
        &feed,
        &FakeAssets::default(),
        &harness.request(LINUX_AMD64, false),
        &CollectingSink::new(),
    )
    .await
    .unwrap_err();

    match &err {
        UpdateError::AssetUnavailable { asset, .. } => {
            assert_eq!(asset, "sing-box-linux-amd64.tar.gz")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.stage(), UpdateStage::Fetching);
    harness.assert_scratch_empty();
}

#[tokio::test]
async fn repeated_runs_converge_on_same_binary() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default().with(
        &asset_url("v2.0.0", "sing-box-linux-amd64.tar.gz"),
        tar_gz(&[("sing-box", b"same bytes")]),
    );
    let request = harness.request(LINUX_AMD64, false);

    for _ in 0..2 {
        run_update(&feed, &assets, &request, &CollectingSink::new())
            .await
            .unwrap();
        assert_eq!(fs::read(&harness.install_path).unwrap(), b"same bytes");
    }

    let entries: Vec<_> = fs::read_dir(harness.install_path.parent().unwrap())
        .unwrap()
        .collect();
    assert_eq!(entries.len(), 1);
    harness.assert_scratch_empty();
}

#[tokio::test]
async fn channel_sink_forwards_stage_events() {
    let harness = Harness::new();
    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default().with(
        &asset_url("v2.0.0", "sing-box-linux-amd64.tar.gz"),
        tar_gz(&[("sing-box", b"bin")]),
    );
    let (tx, mut rx) = mpsc::channel(16);

    run_update(
        &feed,
        &assets,
        &harness.request(LINUX_AMD64, false),
        &ChannelSink::new(tx),
    )
    .await
    .unwrap();

    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        stages.push(event.stage);
    }
    assert_eq!(stages.first(), Some(&UpdateStage::Resolving));
    assert_eq!(stages.last(), Some(&UpdateStage::Done));
}

#[tokio::test]
async fn install_failure_still_removes_scratch_dir() {
    let harness = Harness::new();
    // A non-empty directory cannot be replaced by a file
    fs::create_dir_all(&harness.install_path).unwrap();
    fs::write(harness.install_path.join("keep"), b"keep").unwrap();

    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default().with(
        &asset_url("v2.0.0", "sing-box-linux-amd64.tar.gz"),
        tar_gz(&[("sing-box", b"new binary")]),
    );
    let events = CollectingSink::new();

    let err = run_update(&feed, &assets, &harness.request(LINUX_AMD64, false), &events)
        .await
        .unwrap_err();

    assert!(matches!(err, UpdateError::Install(_)));
    assert_eq!(err.stage(), UpdateStage::Installing);
    assert!(events.stages().contains(&UpdateStage::Installing));
    assert_eq!(events.stages().last(), Some(&UpdateStage::Failed));
    assert_eq!(fs::read(harness.install_path.join("keep")).unwrap(), b"keep");
    harness.assert_scratch_empty();
}

#[cfg(unix)]
#[tokio::test]
async fn failed_install_keeps_existing_binary() {
    use std::os::unix::fs::PermissionsExt;

    let harness = Harness::new();
    let bin_dir = harness.install_path.parent().unwrap().to_path_buf();
    fs::create_dir_all(&bin_dir).unwrap();
    fs::write(&harness.install_path, b"old binary").unwrap();
    fs::set_permissions(&bin_dir, fs::Permissions::from_mode(0o555)).unwrap();

    // Permission bits do not bind root
    if fs::write(bin_dir.join(".writable"), b"").is_ok() {
        fs::set_permissions(&bin_dir, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let feed = FakeFeed::new(vec![release("v2.0.0", false, &["sing-box-linux-amd64.tar.gz"])]);
    let assets = FakeAssets::default().with(
        &asset_url("v2.0.0", "sing-box-linux-amd64.tar.gz"),
        tar_gz(&[("sing-box", b"new binary")]),
    );

    let result = run_update(
        &feed,
        &assets,
        &harness.request(LINUX_AMD64, false),
        &CollectingSink::new(),
    )
    .await;
    fs::set_permissions(&bin_dir, fs::Permissions::from_mode(0o755)).unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.stage(), UpdateStage::Installing);
    assert!(err.is_permission_failure());
    assert_eq!(fs::read(&harness.install_path).unwrap(), b"old binary");
    harness.assert_scratch_empty();
}
