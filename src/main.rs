mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use singbox_manager::config::ManagerConfig;
use singbox_manager::subscription::{http_client, sync_subscriptions};
use singbox_manager::update::{CoreUpdater, PlatformKey, UpdateOutcome};

fn main() {
    env_logger::Builder::new()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    match rt.block_on(real_main()) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether every requested task succeeded
async fn real_main() -> Result<bool> {
    let args = cli::Args::parse();
    let cmd = args.sub.unwrap_or(cli::Cmd::Run);

    if let cli::Cmd::Platform = cmd {
        return print_platform();
    }

    let cfg_path = match args.config {
        Some(path) => path,
        None => ManagerConfig::default_path()?,
    };
    let cfg = ManagerConfig::load_or_create(&cfg_path)?;

    match cmd {
        cli::Cmd::Run => {
            let subs_ok = run_subscriptions(&cfg).await;
            let core_ok = run_core_update(&cfg, None).await;
            Ok(subs_ok && core_ok)
        }
        cli::Cmd::Core { prerelease } => {
            Ok(run_core_update(&cfg, prerelease.then_some(true)).await)
        }
        cli::Cmd::Subscriptions => Ok(run_subscriptions(&cfg).await),
        cli::Cmd::Platform => print_platform(),
    }
}

fn print_platform() -> Result<bool> {
    let platform = PlatformKey::detect().context("Failed to detect platform")?;
    println!("{}", platform.target_token());
    println!("{}", platform.candidate_extensions().join(" "));
    Ok(true)
}

async fn run_subscriptions(cfg: &ManagerConfig) -> bool {
    let client = match http_client(&cfg.http) {
        Ok(client) => client,
        Err(e) => {
            error!("Subscription sync setup failed: {e:#}");
            return false;
        }
    };

    let reports = sync_subscriptions(&client, &cfg.subscriptions).await;
    reports.iter().all(|r| r.is_ok())
}

async fn run_core_update(cfg: &ManagerConfig, include_prerelease: Option<bool>) -> bool {
    let updater = match CoreUpdater::new(&cfg.core_update, &cfg.http) {
        Ok(updater) => updater,
        Err(e) => {
            error!("Core update setup failed: {e}");
            return false;
        }
    };

    match updater.run(include_prerelease).await {
        Ok(UpdateOutcome::Disabled) => {
            info!("Core update skipped: disabled in config");
            true
        }
        Ok(UpdateOutcome::Installed { tag, asset, path }) => {
            info!("Core updated to {} ({}) at {}", tag, asset, path.display());
            true
        }
        Err(e) => {
            if e.is_permission_failure() {
                warn!(
                    "Core update needs write access to {}",
                    cfg.core_update.install_path.display()
                );
            }
            error!("Core update failed: {e}");
            false
        }
    }
}
