//! Shutdown signals for the plugin host.

use plugin_event_bus::HostPlatform;
use std::fmt;
use tokio::signal;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Blocks until the host is asked to stop, then reports which plugin host is
/// going down.
///
/// `loaded` lists the plugins that are still enabled; they are disabled by
/// the caller once this returns.
pub async fn wait_for_shutdown(
    platform: HostPlatform,
    loaded: &[String],
) -> anyhow::Result<ShutdownSignal> {
    info!(
        "🛑 {} plugin host is serving {} plugins, press Ctrl+C to stop",
        platform,
        loaded.len()
    );
    let received = next_signal().await?;
    info!(
        "📡 Received {}, stopping {} plugin host ({})",
        received,
        platform,
        loaded.join(", ")
    );
    Ok(received)
}

#[cfg(unix)]
async fn next_signal() -> anyhow::Result<ShutdownSignal> {
    use signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let received = tokio::select! {
        _ = sigint.recv() => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
    };
    Ok(received)
}

#[cfg(not(unix))]
async fn next_signal() -> anyhow::Result<ShutdownSignal> {
    signal::ctrl_c().await?;
    Ok(ShutdownSignal::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_display_their_unix_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
