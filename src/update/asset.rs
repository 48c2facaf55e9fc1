//! Platform asset selection

use super::github::Asset;
use super::platform::PlatformKey;

/// Return the first asset, in feed order, built for `platform`.
///
/// An asset qualifies when its name contains the `"{os}-{arch}"` token and ends
/// with one of the platform's candidate archive extensions.
pub fn match_asset(assets: &[Asset], platform: PlatformKey) -> Option<&Asset> {
    let target = platform.target_token();
    let extensions = platform.candidate_extensions();

    assets.iter().find(|asset| {
        asset.name.contains(&target)
            && extensions
                .iter()
                .any(|ext| has_extension(&asset.name, ext))
    })
}

fn has_extension(name: &str, ext: &str) -> bool {
    name.strip_suffix(ext)
        .is_some_and(|stem| stem.ends_with('.'))
}
