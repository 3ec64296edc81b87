//! Host binary for the plugin event bus.
//!
//! Loads the host configuration, enables the configured built-in plugins on
//! top of one event bus, runs demo traffic through them and shuts everything
//! down again, either right away or on Ctrl+C.

mod cli;
mod config;
mod demo;
mod logging;
mod plugins;
mod signals;

use anyhow::anyhow;
use cli::CliArgs;
use config::AppConfig;
use plugin_event_bus::create_event_bus;
use plugins::PluginHost;
use signals::wait_for_shutdown;
use tracing::{error, info, warn};

pub struct Application {
    config: AppConfig,
    wait: bool,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config
            .apply_cli(&args)
            .map_err(|e| anyhow!("Invalid command line: {}", e))?;
        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        logging::setup_logging(&config.logging)?;
        display_banner();
        info!("🔧 Logging initialized with level: {}", config.logging.level);
        info!("📂 Config: {}", args.config_path.display());

        Ok(Self {
            config,
            wait: args.wait,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🖥️ Platform: {}", self.config.host.platform);
        info!("  🔌 Plugins: {}", self.config.host.plugins.join(", "));
        info!(
            "  🐌 Slow handler threshold: {}ms",
            self.config.bus.slow_handler_threshold_ms
        );

        let (bus, synthesizer) = create_event_bus(self.config.bus.clone());
        let mut host = PluginHost::new(bus.clone(), self.config.host.platform);
        for (name, factory) in demo::builtin_plugins() {
            host.add_factory(name, factory);
        }

        let enabled = host.enable_all(&self.config.host.plugins).await;
        info!("✅ {} plugins enabled", enabled.len());
        info!(
            "📊 Host state: {}",
            serde_json::to_string(&host.summary().await)?
        );

        let report = demo::run_demo(&host).await?;
        info!("📊 Demo report: {}", serde_json::to_string(&report)?);

        for issue in bus.validate() {
            warn!("⚠️ {}", issue);
        }

        if self.wait {
            let loaded = host.loaded_plugins().await;
            let received = wait_for_shutdown(self.config.host.platform, &loaded).await?;
            info!("🛑 Disabling plugins after {}", received);
        }

        host.shutdown_all().await;

        info!("📊 Final Statistics:");
        info!("  - Plugin instances created: {}", host.registry().len());
        info!("  - Event classes synthesized: {}", synthesizer.synthesis_count());
        info!("  - Bus: {}", serde_json::to_string(&bus.stats())?);
        info!("👋 Plugin host stopped");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║          🔌 PLUGIN EVENT BUS HOST         ║");
    info!("║                  v{}                  ║", version);
    info!("╚══════════════════════════════════════════╝");
}
