//! RadPlanBio Client - Main Entry Point
//!
//! Desktop client shell for the RadPlanBio platform. Runs session cycles
//! until one of them terminates the process.

use std::path::{Path, PathBuf};

use tracing::info;

use rpb_client::{
    config::DEFAULT_CONFIG_FILE,
    logging,
    shell::ConsoleShell,
    supervisor,
    updater::{DetachedLauncher, HostPlatform, UpdaterLayout},
    upgrade::UpgradeCoordinator,
    ClientApp, HttpBackends,
};

const CONFIG_ENV: &str = "RPB_CONFIG";

fn main() -> anyhow::Result<()> {
    let work_dir = std::env::current_dir()?;

    // Initialize logging
    let log_file = logging::init(&work_dir);
    info!("RadPlanBio client starting, logging to {:?}", log_file);

    let config_path = resolve_config_path(&work_dir);
    info!("Using configuration {:?}", config_path);

    // Single-threaded: sessions never overlap and the UI owns the thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let coordinator = UpgradeCoordinator::new(
        config_path.clone(),
        UpdaterLayout::default(),
        HostPlatform::current(),
        Box::new(DetachedLauncher),
    );
    let mut app = ClientApp::new(
        config_path,
        coordinator,
        Box::new(HttpBackends),
        ConsoleShell::new(),
    );

    let exit_code = runtime.block_on(supervisor::run(&mut app));
    drop(app);
    drop(runtime);

    info!("RadPlanBio client exiting with code {}", exit_code);
    std::process::exit(exit_code);
}

fn resolve_config_path(work_dir: &Path) -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }

    let local = work_dir.join(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|dir| dir.join("RadPlanBio").join(DEFAULT_CONFIG_FILE))
        .filter(|path| path.exists())
        .unwrap_or(local)
}
