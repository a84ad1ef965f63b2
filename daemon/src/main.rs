use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use openterface_types::{HalStatus, SdCardDirection, SystemInfo};
use openterface_usb::hal::integration::HalIntegrationManager;
use openterface_usb::hal::{Collaborators, HardwareAbstractionLayer};
use serde::Serialize;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};
use std::sync::Arc;
use tokio::signal;

use crate::cli::Cli;
use crate::managers::Managers;
use crate::primary_worker::run_hal_worker;
use crate::settings::SettingsHandle;
use crate::shutdown::Shutdown;

mod cli;
mod managers;
mod primary_worker;
mod settings;
mod shutdown;

#[cfg(test)]
mod testing;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What `--once` prints.
#[derive(Serialize)]
struct Snapshot {
    system: SystemInfo,
    status: HalStatus,
    serial: String,
    sd_card: Option<SdCardDirection>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    CombinedLogger::init(vec![TermLogger::new(
        args.log_level.into(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .context("Could not configure the logger")?;

    info!("Starting Openterface Daemon v{}", VERSION);
    let settings = SettingsHandle::load(args.config).await?;

    let config = settings.get_hal_config().await;
    let hal = HardwareAbstractionLayer::new(Collaborators::system(), config);
    let integration = Arc::new(HalIntegrationManager::new(Arc::new(hal)));
    let managers = Managers::register(&integration);

    if args.once {
        let scanner = integration.clone();
        let (system, status) = tokio::task::spawn_blocking(move || {
            scanner.rescan();
            let status = scanner.hal().refresh_status();
            (scanner.hal().get_system_info(), status)
        })
        .await
        .context("Detection pass failed")?;

        let snapshot = Snapshot {
            system,
            status,
            serial: managers.serial.status_text(),
            sd_card: managers.serial.sd_direction(),
        };
        println!("{}", serde_json::to_string_pretty(&snapshot)?);

        let releaser = integration.clone();
        let release = tokio::task::spawn_blocking(move || releaser.hal().deinitialize_hardware());
        if let Err(error) = release.await {
            warn!("Hardware release task failed: {}", error);
        }
        return Ok(());
    }

    let mut shutdown = Shutdown::new();
    let worker_handle = tokio::spawn(run_hal_worker(
        integration,
        managers,
        settings,
        shutdown.clone(),
    ));

    tokio::spawn(await_ctrl_c(shutdown.clone()));

    shutdown.recv().await;
    info!("Shutting down daemon");

    if let Err(error) = worker_handle.await {
        warn!("HAL worker stopped abnormally: {}", error);
    }
    Ok(())
}

async fn await_ctrl_c(shutdown: Shutdown) {
    if signal::ctrl_c().await.is_ok() {
        shutdown.trigger();
    }
}
