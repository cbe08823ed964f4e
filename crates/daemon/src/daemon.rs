//! Daemon startup and main loop for the transcode queue
//!
//! Runs the startup checks, starts the supervisor driver and serves the HTTP
//! API until shutdown.

use crate::config::Config;
use crate::server::{create_router, run_server, ServerError};
use crate::startup::{
    ensure_directories, remove_stale_temp_files, run_startup_checks, StartupError,
};
use crate::supervisor::{Supervisor, SupervisorConfig, SupervisorError};
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Server error
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    supervisor: Supervisor,
}

impl Daemon {
    /// Initialize the daemon with an existing configuration
    ///
    /// Creates the working directories and verifies that the encoder launches.
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        let version = run_startup_checks(&config)?;
        info!(
            encoder = %config.encoder.command.join(" "),
            version = %version,
            "Encoder available"
        );
        Ok(Self::assemble(config))
    }

    /// Initialize the daemon without the encoder preflight
    ///
    /// The working directories are still created and stale staging files removed.
    pub fn new_without_checks(config: Config) -> Result<Self, DaemonError> {
        ensure_directories(&config.paths)?;
        remove_stale_temp_files(&config.paths.temp_dir);
        Ok(Self::assemble(config))
    }

    fn assemble(config: Config) -> Self {
        let supervisor = Supervisor::new(SupervisorConfig::from_config(&config));
        Self { config, supervisor }
    }

    /// Handle to the supervisor
    pub fn supervisor(&self) -> Supervisor {
        self.supervisor.clone()
    }

    /// Run the daemon until `shutdown` resolves
    ///
    /// Spawns the supervisor driver loop and serves HTTP on `server.bind`.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let driver = self.supervisor.spawn();
        let router = create_router(self.supervisor.clone());

        let result = run_server(&self.config.server.bind, router, shutdown).await;

        // Settle the current job so its staging file is removed before the driver goes.
        match self.supervisor.stop().await {
            Ok(id) => info!(job_id = id, "Stopped running job for shutdown"),
            Err(SupervisorError::NoActiveJob) => {}
            Err(e) => warn!(error = %e, "Failed to stop running job"),
        }
        driver.abort();
        info!("Daemon stopped");
        result.map_err(DaemonError::from)
    }
}
