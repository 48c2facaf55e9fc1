//! GitHub release list interaction and release resolution

use std::future::Future;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use super::error::FetchError;

const GITHUB_ACCEPT: &str = "application/vnd.github+json";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// GitHub release metadata from API
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// GitHub release asset metadata
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

/// Releases as returned by the host, newest first
pub type ReleaseFeed = Vec<Release>;

/// Supplies the release list
pub trait ReleaseSource {
    /// Must return releases newest first
    fn fetch_releases(&self) -> impl Future<Output = Result<ReleaseFeed, FetchError>> + Send;
}

/// Downloads raw asset bytes
pub trait AssetFetcher {
    fn fetch_asset(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Pick the first release allowed by the prerelease policy.
///
/// Feed order decides ties; no version comparison happens here.
pub fn resolve_release(feed: &[Release], include_prerelease: bool) -> Option<&Release> {
    feed.iter()
        .find(|release| include_prerelease || !release.prerelease)
}

/// HTTP client for one GitHub repository's releases
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    client: reqwest::Client,
    api_base: String,
    repository: String,
}

impl GitHubReleases {
    /// `repository` is `owner/name`
    pub fn new(
        api_base: &str,
        repository: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Http {
                url: api_base.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
        })
    }

    pub fn releases_url(&self) -> String {
        format!("{}/repos/{}/releases", self.api_base, self.repository)
    }

    async fn get(&self, url: &str, accept: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        Ok(response)
    }
}

impl ReleaseSource for GitHubReleases {
    async fn fetch_releases(&self) -> Result<ReleaseFeed, FetchError> {
        let url = self.releases_url();
        debug!("Fetching release list from {}", url);

        let body = self
            .get(&url, GITHUB_ACCEPT)
            .await?
            .text()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;
        let feed: ReleaseFeed =
            serde_json::from_str(&body).map_err(|source| FetchError::Decode {
                url: url.clone(),
                source,
            })?;

        debug!("Release list contains {} releases", feed.len());
        Ok(feed)
    }
}

impl AssetFetcher for GitHubReleases {
    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url, "application/octet-stream").await?;
        let bytes = response.bytes().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool) -> Release {
        Release {
            tag_name: tag.to_string(),
            prerelease,
            assets: Vec::new(),
        }
    }

    #[test]
    fn skips_prereleases_by_default() {
        let feed = vec![release("v2.1.0-beta", true), release("v2.0.0", false)];
        let picked = resolve_release(&feed, false).unwrap();
        assert_eq!(picked.tag_name, "v2.0.0");
    }

    #[test]
    fn includes_prereleases_when_asked() {
        let feed = vec![release("v2.1.0-beta", true), release("v2.0.0", false)];
        let picked = resolve_release(&feed, true).unwrap();
        assert_eq!(picked.tag_name, "v2.1.0-beta");
    }

    #[test]
    fn feed_order_wins_over_version_order() {
        let feed = vec![release("v1.0.0", false), release("v9.0.0", false)];
        assert_eq!(resolve_release(&feed, false).unwrap().tag_name, "v1.0.0");
    }

    #[test]
    fn only_prereleases_is_not_found() {
        let feed = vec![release("v2.1.0-beta", true), release("v2.1.0-rc.1", true)];
        assert!(resolve_release(&feed, false).is_none());
        assert!(resolve_release(&[], true).is_none());
    }

    #[test]
    fn parses_release_list_json() {
        let json = r#"[
            {
                "url": "https://api.github.com/repos/SagerNet/sing-box/releases/1",
                "tag_name": "v1.12.0",
                "prerelease": false,
                "assets": [
                    {
                        "name": "sing-box-1.12.0-linux-amd64.tar.gz",
                        "browser_download_url": "https://example.com/a.tar.gz",
                        "size": 1024
                    }
                ]
            }
        ]"#;
        let feed: ReleaseFeed = serde_json::from_str(json).unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].assets[0].name, "sing-box-1.12.0-linux-amd64.tar.gz");
    }

    #[test]
    fn releases_url_trims_trailing_slash() {
        let source = GitHubReleases::new(
            "https://api.github.com/",
            "SagerNet/sing-box",
            "test-agent",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            source.releases_url(),
            "https://api.github.com/repos/SagerNet/sing-box/releases"
        );
    }
}
