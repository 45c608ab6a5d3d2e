#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use confidential_gateway::gateway::errors::{GatewayError, TransportError};
use confidential_gateway::gateway::helper::{
    HelperConnection, HelperExit, HelperRequest, HelperResponse, JobHelper, JobHelperLauncher,
};
use confidential_gateway::gateway::messages::{
    DialBackInbound, DialBackOutbound, InboundMessage, OutboundMessage, RequestChunk,
    TraceContext, WorkloadDescriptor, WorkloadParameters,
};
use confidential_gateway::gateway::streams::MessageStream;
use confidential_gateway::{GatewaySettings, WorkloadGateway};

pub const STEP: Duration = Duration::from_secs(2);

pub struct FakeHelper {
    requests: mpsc::UnboundedSender<HelperRequest>,
    responses: Mutex<Option<mpsc::Sender<HelperResponse>>>,
    exit: watch::Sender<Option<HelperExit>>,
    used: AtomicBool,
    exit_on_teardown: bool,
    teardowns: AtomicUsize,
}

impl FakeHelper {
    pub fn exit(&self, status: i32) {
        self.responses.lock().unwrap().take();
        let used = self.used.load(Ordering::SeqCst);
        self.exit.send_replace(Some(HelperExit {
            status: Some(status),
            used,
        }));
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHelper for FakeHelper {
    async fn invoke_workload_request(&self, request: HelperRequest) -> Result<(), GatewayError> {
        self.used.store(true, Ordering::SeqCst);
        self.requests
            .send(request)
            .map_err(|_| GatewayError::HelperUnavailable("helper gone".to_string()))
    }

    async fn wait_for_warmup_complete(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn wait_for_exit(&self, return_if_not_used: bool) -> HelperExit {
        if return_if_not_used && !self.used.load(Ordering::SeqCst) {
            return HelperExit {
                status: None,
                used: false,
            };
        }
        let mut rx = self.exit.subscribe();
        let result = match rx.wait_for(|exit| exit.is_some()).await {
            Ok(exit) => exit.unwrap_or(HelperExit {
                status: None,
                used: true,
            }),
            Err(_) => HelperExit {
                status: None,
                used: true,
            },
        };
        result
    }

    async fn teardown(&self) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        if self.exit_on_teardown {
            self.exit(143);
        }
    }
}

/// Test-side handle for one launched helper.
pub struct HelperControl {
    pub helper: Arc<FakeHelper>,
    pub requests: mpsc::UnboundedReceiver<HelperRequest>,
}

impl HelperControl {
    pub async fn respond(&self, response: HelperResponse) {
        let sender = self
            .helper
            .responses
            .lock()
            .unwrap()
            .clone()
            .expect("helper still running");
        sender.send(response).await.expect("session reads responses");
    }

    pub async fn next_request(&mut self) -> HelperRequest {
        tokio::time::timeout(STEP, self.requests.recv())
            .await
            .expect("helper request in time")
            .expect("request channel open")
    }

    pub fn exit(&self, status: i32) {
        self.helper.exit(status);
    }
}

pub struct FakeLauncher {
    launched: mpsc::UnboundedSender<HelperControl>,
    exit_on_teardown: bool,
}

#[async_trait]
impl JobHelperLauncher for FakeLauncher {
    async fn launch(&self, _session_id: &str) -> Result<HelperConnection, GatewayError> {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (responses_tx, responses_rx) = mpsc::channel(16);
        let (exit_tx, _exit_rx) = watch::channel(None);
        let helper = Arc::new(FakeHelper {
            requests: requests_tx,
            responses: Mutex::new(Some(responses_tx)),
            exit: exit_tx,
            used: AtomicBool::new(false),
            exit_on_teardown: self.exit_on_teardown,
            teardowns: AtomicUsize::new(0),
        });
        let _ = self.launched.send(HelperControl {
            helper: Arc::clone(&helper),
            requests: requests_rx,
        });
        Ok(HelperConnection {
            handle: helper,
            responses: responses_rx,
        })
    }
}

pub struct Harness {
    pub gateway: WorkloadGateway,
    launched: mpsc::UnboundedReceiver<HelperControl>,
}

impl Harness {
    pub fn new(settings: GatewaySettings) -> Self {
        Self::with_teardown_behavior(settings, true)
    }

    pub fn with_teardown_behavior(settings: GatewaySettings, exit_on_teardown: bool) -> Self {
        let (launched_tx, launched) = mpsc::unbounded_channel();
        let launcher = Arc::new(FakeLauncher {
            launched: launched_tx,
            exit_on_teardown,
        });
        Self {
            gateway: WorkloadGateway::new(settings, launcher),
            launched,
        }
    }

    pub async fn next_helper(&mut self) -> HelperControl {
        tokio::time::timeout(STEP, self.launched.recv())
            .await
            .expect("helper launched in time")
            .expect("launcher alive")
    }

    pub async fn wait_for_concurrency(&self, expected: usize) {
        let mut rx = self.gateway.subscribe_concurrency();
        tokio::time::timeout(STEP, rx.wait_for(|count| *count == expected))
            .await
            .expect("concurrency reached expected value")
            .expect("admission alive");
    }
}

pub fn spawn_session(
    gateway: &WorkloadGateway,
    inbound: MessageStream<InboundMessage>,
    outbound: mpsc::Sender<OutboundMessage>,
) -> JoinHandle<Result<(), GatewayError>> {
    let gateway = gateway.clone();
    tokio::spawn(async move { gateway.invoke_workload(inbound, outbound).await })
}

pub fn spawn_dial_back(
    gateway: &WorkloadGateway,
    inbound: MessageStream<DialBackInbound>,
    outbound: mpsc::Sender<DialBackOutbound>,
) -> JoinHandle<Result<(), GatewayError>> {
    let gateway = gateway.clone();
    tokio::spawn(async move { gateway.invoke_proxy_dial_back(inbound, outbound).await })
}

pub async fn join<T>(handle: JoinHandle<T>) -> T {
    tokio::time::timeout(STEP, handle)
        .await
        .expect("task finished in time")
        .expect("task did not panic")
}

pub type InboundSender<T> = mpsc::Sender<Result<T, TransportError>>;

pub fn inbound_stream<T>() -> (InboundSender<T>, MessageStream<T>) {
    MessageStream::channel(16)
}

pub async fn recv_in_time<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(STEP, rx.recv())
        .await
        .expect("message in time")
        .expect("channel open")
}

pub fn parameters(request_bypassed: bool, request_nack: bool) -> InboundMessage {
    InboundMessage::Parameters(WorkloadParameters {
        request_id: "req-1".to_string(),
        one_time_token: Bytes::from_static(b"ott"),
        decryption_key: Bytes::from_static(b"wrapped"),
        tenant_info: Some("tenant-a".to_string()),
        workload: WorkloadDescriptor {
            kind: "inference".to_string(),
            parameters: Default::default(),
        },
        request_bypassed,
        request_nack,
        trace_context: TraceContext {
            trace_id: "trace-1".to_string(),
            span_id: "span-1".to_string(),
        },
    })
}

pub fn chunk(payload: &'static [u8], is_final: bool) -> InboundMessage {
    InboundMessage::RequestChunk(RequestChunk {
        encrypted_payload: Bytes::from_static(payload),
        is_final,
    })
}

pub fn proxy_settings() -> GatewaySettings {
    GatewaySettings {
        proxy_mode: true,
        initial_max_concurrent_requests: 4,
        ..GatewaySettings::default()
    }
}
