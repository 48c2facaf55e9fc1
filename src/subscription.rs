//! Mirroring remote sing-box configuration documents to local files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use log::{error, info};
use reqwest::Client;

use crate::config::{HttpConfig, Subscription};

/// Result of syncing one subscription
#[derive(Debug)]
pub struct SubscriptionReport {
    pub name: String,
    pub save_path: PathBuf,
    /// Bytes written on success
    pub result: Result<usize>,
}

impl SubscriptionReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Build the HTTP client shared by all subscription downloads
pub fn http_client(http: &HttpConfig) -> Result<Client> {
    Client::builder()
        .user_agent(&http.user_agent)
        .timeout(Duration::from_secs(http.timeout_secs))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

/// Download every subscription concurrently and write it to its save path.
///
/// Each entry gets its own report; one failure does not affect the others.
pub async fn sync_subscriptions(
    client: &Client,
    subscriptions: &[Subscription],
) -> Vec<SubscriptionReport> {
    if subscriptions.is_empty() {
        info!("No subscriptions configured");
        return Vec::new();
    }

    let reports = join_all(subscriptions.iter().map(|sub| async move {
        let result = sync_one(client, sub).await;
        match &result {
            Ok(bytes) => info!(
                "Subscription {} updated: {} bytes written to {}",
                sub.name,
                bytes,
                sub.save_path.display()
            ),
            Err(e) => error!("Subscription {} failed: {:#}", sub.name, e),
        }
        SubscriptionReport {
            name: sub.name.clone(),
            save_path: sub.save_path.clone(),
            result,
        }
    }))
    .await;

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    info!(
        "Subscriptions synced: {} ok, {} failed",
        reports.len() - failed,
        failed
    );
    reports
}

async fn sync_one(client: &Client, sub: &Subscription) -> Result<usize> {
    info!("Downloading subscription {} from {}", sub.name, sub.url);

    let response = client
        .get(&sub.url)
        .send()
        .await
        .with_context(|| format!("Request to {} failed", sub.url))?
        .error_for_status()
        .with_context(|| format!("Server rejected request to {}", sub.url))?;

    let body = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read response body from {}", sub.url))?;

    write_document(&sub.save_path, &body).await?;
    Ok(body.len())
}

async fn write_document(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
