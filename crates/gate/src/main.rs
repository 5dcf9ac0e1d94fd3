//! Gateway entry point.
//!
//! Parses the CLI, loads and validates the TOML configuration, installs
//! logging, builds the runtime, and runs the gateway until a termination
//! signal arrives.

mod cli;
mod config;
mod logging;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gate_server::{GatewayServer, InMemoryDirectory, ServiceDirectory};
use tracing::{error, info};

use crate::cli::CliArgs;
use crate::config::AppConfig;

/// Loaded configuration plus the path it came from.
struct Application {
    config: AppConfig,
    config_path: PathBuf,
}

impl Application {
    /// Loads the configuration file and applies CLI overrides.
    async fn load(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config).await?;

        if let Some(listen) = args.listen {
            config.server.listen_addr = listen.to_string();
        }
        if args.debug {
            config.logging.level = "debug".to_string();
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if let Some(strategy) = args.strategy {
            config.routing.default_strategy = strategy;
        }

        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

        Ok(Self {
            config,
            config_path: args.config,
        })
    }

    /// Seeds the in-process directory from `[[routing.instances]]`.
    fn directory(&self) -> Option<Arc<dyn ServiceDirectory>> {
        let instances = self.config.service_instances();
        if instances.is_empty() {
            return None;
        }
        let directory = InMemoryDirectory::new();
        for instance in instances {
            directory.register(&self.config.routing.service_name, instance);
        }
        Some(Arc::new(directory))
    }

    async fn run(self) -> anyhow::Result<()> {
        let gateway_config = self.config.to_gateway_config()?;
        let server = Arc::new(GatewayServer::new(gateway_config, self.directory()));

        info!("📂 Config: {}", self.config_path.display());
        info!("📋 Configuration Summary:");
        info!("  🌐 Listen address: {}", self.config.server.listen_addr);
        info!(
            "  🧭 Login strategy: {} | Service: {}",
            self.config.routing.default_strategy, self.config.routing.service_name
        );
        info!(
            "  🗺️ Static nodes: {} | Directory instances: {}",
            self.config.routing.static_nodes.len(),
            self.config.routing.instances.len()
        );
        info!(
            "  ⏱️ Reader idle: {}s | Writer idle: {}s | Max missed: {}",
            self.config.heartbeat.reader_idle_secs,
            self.config.heartbeat.writer_idle_secs,
            self.config.heartbeat.max_missed
        );
        info!(
            "  🪣 Rate limit: {} burst, {}/s",
            self.config.rate_limit.capacity, self.config.rate_limit.refill_per_second
        );

        let mut server_handle = {
            let server = server.clone();
            tokio::spawn(async move { server.start().await })
        };

        info!("🛑 Press Ctrl+C to gracefully shutdown");

        tokio::select! {
            result = &mut server_handle => {
                // the server only returns on its own when it failed to start
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e).context("gateway stopped"),
                    Err(e) => Err(e).context("gateway task panicked"),
                };
            }
            signal = signals::wait_for_shutdown_signal() => {
                signal.context("installing signal handlers")?;
            }
        }

        info!("🛑 Shutdown signal received, initiating graceful shutdown...");
        server.shutdown();
        match server_handle.await {
            Ok(Ok(())) => info!("✅ Gateway shutdown complete"),
            Ok(Err(e)) => error!("❌ Gateway error during shutdown: {}", e),
            Err(e) => error!("❌ Gateway task failed: {}", e),
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // The worker count comes from the config file, so load it on a
    // throwaway runtime first.
    let app = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(Application::load(args))?;

    logging::setup_logging(&app.config.logging)?;
    display_banner();

    let io_threads = app.config.server.io_threads();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(io_threads)
        .thread_name("gate-io")
        .enable_all()
        .build()?;
    info!("🧵 Runtime started with {} io threads", io_threads);

    runtime.block_on(app.run())
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║              🚪 GATE SERVER              ║");
    info!("║                  v{:<8}               ║", version);
    info!("╚══════════════════════════════════════════╝");
}
