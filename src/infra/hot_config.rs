//! Usage: Hot-reloadable subset of the gateway settings, published to sessions via `watch`.

use std::path::Path;
use tokio::sync::watch;

use super::settings::{self, GatewaySettings};

/// Values sessions read at their start (byte ceiling) or on demand (failure propagation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HotSettings {
    pub max_cumulative_request_bytes: u64,
    pub propagate_helper_failures: bool,
}

impl From<&GatewaySettings> for HotSettings {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            max_cumulative_request_bytes: settings.max_cumulative_request_bytes,
            propagate_helper_failures: settings.propagate_helper_failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HotConfig {
    tx: watch::Sender<HotSettings>,
}

impl HotConfig {
    pub fn new(initial: HotSettings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> HotSettings {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HotSettings> {
        self.tx.subscribe()
    }

    pub fn publish(&self, next: HotSettings) {
        let previous = self.tx.send_replace(next);
        if previous != next {
            tracing::info!(
                max_cumulative_request_bytes = next.max_cumulative_request_bytes,
                propagate_helper_failures = next.propagate_helper_failures,
                "hot config updated"
            );
        }
    }

    /// Re-read the settings file and publish its hot subset. On error the current values stay.
    pub fn reload_from(&self, path: &Path) -> Result<HotSettings, String> {
        let settings = settings::read(path)?;
        let next = HotSettings::from(&settings);
        self.publish(next);
        Ok(next)
    }
}
