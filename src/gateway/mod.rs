//! Usage: Workload gateway core (admission, session orchestration, worker routing, dial-back).
//!
//! Transports hand each RPC to `WorkloadGateway` as a stream of decoded messages plus a sender
//! for replies; errors come back as `GatewayError` and are turned into a wire status with
//! `GatewayError::to_rpc_status` at the transport boundary.

pub mod admission;
mod bypass;
mod dial_back;
pub mod errors;
pub mod helper;
pub mod messages;
pub mod protocol;
mod routing;
mod session;
pub mod streams;
pub mod types;

pub use bypass::{AlreadyConnected, BypassBuffer, YieldOutcome};
pub use routing::{WorkerBinding, WorkerRoutingTable};

use futures_core::Stream;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::infra::hot_config::{HotConfig, HotSettings};
use crate::infra::settings::GatewaySettings;
use admission::{AdmissionController, DrainController, DrainSnapshot, HealthSignal, LoadSnapshot};
use errors::{GatewayError, TransportError};
use helper::JobHelperLauncher;
use messages::{DialBackInbound, DialBackOutbound, InboundMessage, OutboundMessage};

pub(in crate::gateway) struct GatewayShared {
    settings: GatewaySettings,
    hot_config: HotConfig,
    admission: Arc<AdmissionController>,
    drain: Arc<DrainController>,
    routing: Arc<WorkerRoutingTable>,
    launcher: Arc<dyn JobHelperLauncher>,
}

/// One gateway instance per process. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct WorkloadGateway {
    shared: Arc<GatewayShared>,
}

impl WorkloadGateway {
    pub fn new(settings: GatewaySettings, launcher: Arc<dyn JobHelperLauncher>) -> Self {
        let hot_config = HotConfig::new(HotSettings::from(&settings));
        Self::with_hot_config(settings, hot_config, launcher)
    }

    pub fn with_hot_config(
        settings: GatewaySettings,
        hot_config: HotConfig,
        launcher: Arc<dyn JobHelperLauncher>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::new(
            settings.initial_max_concurrent_requests,
            settings.enforce_concurrent_request_limit,
        ));
        tracing::info!(
            proxy_mode = settings.proxy_mode,
            max_concurrent_requests = settings.initial_max_concurrent_requests,
            enforce_concurrent_request_limit = settings.enforce_concurrent_request_limit,
            "workload gateway created"
        );
        Self {
            shared: Arc::new(GatewayShared {
                settings,
                hot_config,
                admission,
                drain: Arc::new(DrainController::new()),
                routing: Arc::new(WorkerRoutingTable::new()),
                launcher,
            }),
        }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.shared.settings
    }

    pub fn hot_config(&self) -> &HotConfig {
        &self.shared.hot_config
    }

    /// Bounded reply channel sized from settings, for transports wiring up an RPC.
    pub fn reply_channel<T>(&self) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
        mpsc::channel(self.shared.settings.response_channel_capacity.max(1))
    }

    /// Serves one primary invocation until the session completes or fails.
    pub async fn invoke_workload<S>(
        &self,
        inbound: S,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Result<(), GatewayError>
    where
        S: Stream<Item = Result<InboundMessage, TransportError>> + Send + Unpin + 'static,
    {
        session::run_session(Arc::clone(&self.shared), inbound, outbound).await
    }

    /// Serves one worker dial-back exchange. Failures never affect the owning session.
    pub async fn invoke_proxy_dial_back<S>(
        &self,
        inbound: S,
        outbound: mpsc::Sender<DialBackOutbound>,
    ) -> Result<(), GatewayError>
    where
        S: Stream<Item = Result<DialBackInbound, TransportError>> + Send + Unpin + 'static,
    {
        dial_back::run_dial_back(Arc::clone(&self.shared), inbound, outbound).await
    }

    pub async fn drain(&self) {
        self.shared.drain.drain().await;
    }

    pub async fn pause(&self, reason: impl Into<String>) -> Result<(), GatewayError> {
        self.shared.admission.pause(reason).await
    }

    pub fn resume(&self) {
        self.shared.admission.resume();
    }

    pub fn watch_health(&self, health: watch::Receiver<HealthSignal>) -> tokio::task::JoinHandle<()> {
        self.shared.admission.watch_health(health)
    }

    pub fn subscribe_concurrency(&self) -> watch::Receiver<usize> {
        self.shared.admission.subscribe_concurrency()
    }

    pub fn load_snapshot(&self) -> LoadSnapshot {
        self.shared.admission.snapshot()
    }

    pub fn drain_snapshot(&self) -> DrainSnapshot {
        self.shared.drain.snapshot()
    }

    pub fn is_draining(&self) -> bool {
        self.shared.drain.is_draining()
    }

    pub fn linked_worker_count(&self) -> usize {
        self.shared.routing.len()
    }
}
