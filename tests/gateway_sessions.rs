mod support;

use bytes::Bytes;
use std::time::Duration;

use confidential_gateway::gateway::errors::{DialBackViolation, GatewayError, InboundViolation};
use confidential_gateway::gateway::helper::{
    FindWorkerQuery, HelperRequest, HelperResponse, RequestBypassMode,
};
use confidential_gateway::gateway::messages::{
    Capabilities, ComputeToProxyMessage, DialBackClose, DialBackInbound, DialBackOutbound,
    InboundMessage, OutboundMessage, ProxyInitiate, ProxyToComputeMessage, ResponseBypassMode,
    TerminationNotice, TraceContext, WorkloadDescriptor,
};
use confidential_gateway::gateway::types::{RpcStatusCode, WorkerId};
use confidential_gateway::infra::hot_config::HotSettings;
use confidential_gateway::{GatewaySettings, TransportError};
use support::*;

fn find_worker(worker_id: &str) -> HelperResponse {
    HelperResponse::FindWorker(FindWorkerQuery {
        worker_id: WorkerId::from(worker_id),
        service_name: "tie".to_string(),
        routing_parameters: Default::default(),
        response_bypass_mode: ResponseBypassMode::None,
        span_id: "span-2".to_string(),
    })
}

fn response_chunk(payload: &'static [u8], is_final: bool) -> HelperResponse {
    HelperResponse::ResponseChunk {
        payload: Bytes::from_static(payload),
        is_final,
    }
}

fn expected_response(payload: &'static [u8], is_final: bool) -> OutboundMessage {
    OutboundMessage::ResponseChunk {
        encrypted_payload: Bytes::from_static(payload),
        is_final,
    }
}

#[tokio::test]
async fn session_relays_request_and_response_then_completes_on_helper_exit() {
    let mut harness = Harness::new(GatewaySettings::default());
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let mut helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    assert_eq!(
        recv_in_time(&mut out_rx).await,
        OutboundMessage::SetupAck {
            capabilities: Capabilities::default()
        }
    );

    in_tx.send(Ok(parameters(false, false))).await.unwrap();
    let HelperRequest::Parameters(params) = helper.next_request().await else {
        panic!("expected parameters first");
    };
    assert_eq!(params.bypass_mode, RequestBypassMode::None);
    assert_eq!(params.wrapped_key, Bytes::from_static(b"wrapped"));
    assert_eq!(params.trace_context.trace_id, "trace-1");

    in_tx.send(Ok(chunk(b"payload", true))).await.unwrap();
    assert_eq!(
        helper.next_request().await,
        HelperRequest::RequestChunk {
            payload: Bytes::from_static(b"payload"),
            is_final: true,
        }
    );
    drop(in_tx);

    helper.respond(response_chunk(b"result", true)).await;
    assert_eq!(recv_in_time(&mut out_rx).await, expected_response(b"result", true));
    assert_eq!(harness.gateway.load_snapshot().concurrent_requests, 1);

    helper.exit(0);
    join(session).await.unwrap();
    assert_eq!(harness.gateway.load_snapshot().concurrent_requests, 0);
    assert_eq!(harness.gateway.drain_snapshot().active_requests, 0);
    assert_eq!(helper.helper.teardown_count(), 0);
}

#[tokio::test]
async fn second_session_is_rejected_while_slot_is_taken() {
    let mut harness = Harness::new(GatewaySettings::default());
    let (_in_tx, in_rx) = inbound_stream();
    let (out_tx, _out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let helper = harness.next_helper().await;

    let (_other_tx, other_rx) = inbound_stream::<InboundMessage>();
    let (other_out, _other_out_rx) = harness.gateway.reply_channel();
    let err = harness
        .gateway
        .invoke_workload(other_rx, other_out)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::MaxConcurrentRequestsExceeded { max: 1 }));
    assert_eq!(err.status_code(), RpcStatusCode::ResourceExhausted);
    assert_eq!(harness.gateway.load_snapshot().exceeded_count, 1);

    helper.exit(0);
    join(session).await.unwrap();
    assert_eq!(harness.gateway.load_snapshot().concurrent_requests, 0);
}

#[tokio::test]
async fn out_of_order_message_fails_the_session() {
    let mut harness = Harness::new(GatewaySettings::default());
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, _out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let _helper = harness.next_helper().await;

    in_tx.send(Ok(parameters(false, false))).await.unwrap();
    let err = join(session).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::InboundProtocol(InboundViolation::ParametersBeforeSetup)
    ));
    assert_eq!(err.to_rpc_status().code, RpcStatusCode::FailedPrecondition);

    // The helper never received anything, so its slot comes back without waiting.
    harness.wait_for_concurrency(0).await;
}

#[tokio::test]
async fn caller_cancellation_keeps_slot_until_helper_exits() {
    let mut harness = Harness::with_teardown_behavior(GatewaySettings::default(), false);
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let mut helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;
    in_tx.send(Ok(parameters(false, false))).await.unwrap();
    helper.next_request().await;

    in_tx.send(Err(TransportError::Cancelled)).await.unwrap();
    let err = join(session).await.unwrap_err();
    assert!(err.is_client_cancellation());
    assert_eq!(err.error_code(), "GW_REQUEST_ABORTED");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.gateway.load_snapshot().concurrent_requests, 1);
    assert_eq!(helper.helper.teardown_count(), 1);

    helper.exit(137);
    harness.wait_for_concurrency(0).await;
}

#[tokio::test(start_paused = true)]
async fn idle_session_times_out() {
    let settings = GatewaySettings {
        idle_timeout_seconds: 1,
        ..GatewaySettings::default()
    };
    let mut harness = Harness::new(settings);
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let _helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;

    let err = session.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::IdleTimeoutExceeded(timeout) if timeout == Duration::from_secs(1)));
    assert_eq!(err.status_code(), RpcStatusCode::DeadlineExceeded);
    harness.wait_for_concurrency(0).await;
}

#[tokio::test]
async fn termination_notice_tears_down_the_helper() {
    let mut harness = Harness::new(GatewaySettings::default());
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let mut helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;
    in_tx.send(Ok(parameters(false, false))).await.unwrap();
    helper.next_request().await;
    in_tx
        .send(Ok(InboundMessage::Terminate(TerminationNotice {
            code: 1,
            reason: Some("client gave up".to_string()),
        })))
        .await
        .unwrap();

    join(session).await.unwrap();
    assert_eq!(helper.helper.teardown_count(), 1);
    assert_eq!(harness.gateway.load_snapshot().concurrent_requests, 0);
}

#[tokio::test]
async fn cumulative_request_bytes_are_capped() {
    let settings = GatewaySettings {
        max_cumulative_request_bytes: 8,
        ..GatewaySettings::default()
    };
    let mut harness = Harness::new(settings);
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let mut helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;
    in_tx.send(Ok(parameters(false, false))).await.unwrap();
    helper.next_request().await;
    in_tx.send(Ok(chunk(b"12345", false))).await.unwrap();
    in_tx.send(Ok(chunk(b"67890", true))).await.unwrap();

    let err = join(session).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::MaxCumulativeRequestBytesExceeded {
            limit: 8,
            received: 10
        }
    ));
    harness.wait_for_concurrency(0).await;
}

#[tokio::test]
async fn helper_failure_reports_follow_hot_config() {
    let mut harness = Harness::new(GatewaySettings::default());
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;

    helper
        .respond(HelperResponse::FailureReport {
            reason: "ignored".to_string(),
        })
        .await;
    helper.respond(response_chunk(b"still-going", false)).await;
    assert_eq!(
        recv_in_time(&mut out_rx).await,
        expected_response(b"still-going", false)
    );

    harness.gateway.hot_config().publish(HotSettings {
        propagate_helper_failures: true,
        ..HotSettings::default()
    });
    helper
        .respond(HelperResponse::FailureReport {
            reason: "boom".to_string(),
        })
        .await;

    let err = join(session).await.unwrap_err();
    assert!(matches!(err, GatewayError::HelperFailure(reason) if reason == "boom"));
    harness.wait_for_concurrency(0).await;
}

#[tokio::test]
async fn find_worker_is_rejected_without_proxy_mode() {
    let mut harness = Harness::new(GatewaySettings::default());
    let (_in_tx, in_rx) = inbound_stream();
    let (out_tx, _out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let helper = harness.next_helper().await;

    helper.respond(find_worker("w-1")).await;
    let err = join(session).await.unwrap_err();
    assert!(matches!(err, GatewayError::UnexpectedFindWorker));
    assert_eq!(harness.gateway.linked_worker_count(), 0);
}

#[tokio::test]
async fn proxy_requires_request_bypass_when_enforced() {
    let settings = GatewaySettings {
        enforce_request_bypass: true,
        ..proxy_settings()
    };
    let mut harness = Harness::new(settings);
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let _helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    assert_eq!(
        recv_in_time(&mut out_rx).await,
        OutboundMessage::SetupAck {
            capabilities: Capabilities {
                proxy: true,
                request_bypass: true,
            }
        }
    );
    in_tx.send(Ok(parameters(false, false))).await.unwrap();
    let err = join(session).await.unwrap_err();
    assert!(matches!(err, GatewayError::RequestBypassRequired));
}

#[tokio::test]
async fn bypassed_request_and_helper_traffic_reach_the_dialed_back_worker() {
    let mut harness = Harness::new(proxy_settings());
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let mut helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;
    in_tx.send(Ok(parameters(true, false))).await.unwrap();
    let HelperRequest::Parameters(params) = helper.next_request().await else {
        panic!("expected parameters first");
    };
    assert_eq!(params.bypass_mode, RequestBypassMode::Bypass);
    // Auth token for the worker; held until the worker dials back.
    in_tx.send(Ok(chunk(b"auth-token", false))).await.unwrap();

    helper.respond(find_worker("w-1")).await;
    assert_eq!(
        recv_in_time(&mut out_rx).await,
        OutboundMessage::InvokeProxyInitiate(ProxyInitiate {
            task_id: WorkerId::from("w-1"),
            workload: WorkloadDescriptor {
                kind: "tie".to_string(),
                parameters: Default::default(),
            },
            trace_context: TraceContext {
                trace_id: "trace-1".to_string(),
                span_id: "span-2".to_string(),
            },
            response_bypass_mode: ResponseBypassMode::None,
            forward_bypassed_request_chunks: true,
        })
    );
    assert_eq!(harness.gateway.linked_worker_count(), 1);

    helper
        .respond(HelperResponse::WorkerMessage {
            worker_id: WorkerId::from("w-1"),
            message: ProxyToComputeMessage::DecryptionKey {
                key: Bytes::from_static(b"key"),
            },
        })
        .await;
    // Responses are handled in order, so the key is queued once this arrives.
    helper.respond(response_chunk(b"partial", false)).await;
    assert_eq!(
        recv_in_time(&mut out_rx).await,
        expected_response(b"partial", false)
    );

    let (db_tx, db_rx) = inbound_stream();
    let (db_out_tx, mut db_out_rx) = harness.gateway.reply_channel();
    let exchange = spawn_dial_back(&harness.gateway, db_rx, db_out_tx);
    db_tx
        .send(Ok(DialBackInbound::Initiate {
            task_id: WorkerId::from("w-1"),
        }))
        .await
        .unwrap();

    assert_eq!(
        recv_in_time(&mut db_out_rx).await,
        DialBackOutbound::ProxyToCompute(ProxyToComputeMessage::DecryptionKey {
            key: Bytes::from_static(b"key"),
        })
    );
    assert_eq!(
        recv_in_time(&mut db_out_rx).await,
        DialBackOutbound::ProxyToCompute(ProxyToComputeMessage::RequestChunk {
            encrypted_payload: Bytes::from_static(b"auth-token"),
            is_final: false,
        })
    );

    let attestation = ComputeToProxyMessage::Attestation {
        bundle: Bytes::from_static(b"quote"),
    };
    db_tx
        .send(Ok(DialBackInbound::ComputeToProxy(attestation.clone())))
        .await
        .unwrap();
    assert_eq!(
        helper.next_request().await,
        HelperRequest::WorkerMessage {
            worker_id: WorkerId::from("w-1"),
            message: attestation,
        }
    );

    drop(in_tx);
    helper
        .respond(HelperResponse::WorkerRequestsComplete {
            worker_id: WorkerId::from("w-1"),
        })
        .await;
    assert_eq!(recv_in_time(&mut db_out_rx).await, DialBackOutbound::Close);

    db_tx
        .send(Ok(DialBackInbound::Close(DialBackClose::default())))
        .await
        .unwrap();
    assert_eq!(
        helper.next_request().await,
        HelperRequest::WorkerClosed {
            worker_id: WorkerId::from("w-1"),
            close: DialBackClose::default(),
        }
    );
    drop(db_tx);
    assert_eq!(
        helper.next_request().await,
        HelperRequest::WorkerEndOfStream {
            worker_id: WorkerId::from("w-1"),
        }
    );
    join(exchange).await.unwrap();
    assert_eq!(harness.gateway.linked_worker_count(), 0);

    helper.respond(response_chunk(b"done", true)).await;
    assert_eq!(recv_in_time(&mut out_rx).await, expected_response(b"done", true));
    helper.exit(0);
    join(session).await.unwrap();
    assert_eq!(harness.gateway.load_snapshot().concurrent_requests, 0);
}

#[tokio::test]
async fn only_the_first_worker_receives_the_bypassed_request() {
    let mut harness = Harness::new(proxy_settings());
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let mut helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;
    in_tx.send(Ok(parameters(true, true))).await.unwrap();
    helper.next_request().await;

    let mut forwarded = Vec::new();
    for worker in ["w-1", "w-2"] {
        helper.respond(find_worker(worker)).await;
        let OutboundMessage::InvokeProxyInitiate(initiate) = recv_in_time(&mut out_rx).await else {
            panic!("expected proxy initiate");
        };
        forwarded.push(initiate.forward_bypassed_request_chunks);
    }
    assert_eq!(forwarded, vec![true, false]);
    assert_eq!(harness.gateway.linked_worker_count(), 2);

    helper.exit(0);
    join(session).await.unwrap();
    assert_eq!(harness.gateway.linked_worker_count(), 0);
}

#[tokio::test]
async fn dial_back_violation_fails_only_the_exchange() {
    let mut harness = Harness::new(proxy_settings());
    let (in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let mut helper = harness.next_helper().await;

    in_tx.send(Ok(InboundMessage::Setup)).await.unwrap();
    recv_in_time(&mut out_rx).await;
    helper.respond(find_worker("w-2")).await;
    recv_in_time(&mut out_rx).await;

    let (db_tx, db_rx) = inbound_stream();
    let (db_out_tx, _db_out_rx) = harness.gateway.reply_channel();
    let exchange = spawn_dial_back(&harness.gateway, db_rx, db_out_tx);
    db_tx
        .send(Ok(DialBackInbound::Initiate {
            task_id: WorkerId::from("w-2"),
        }))
        .await
        .unwrap();
    db_tx
        .send(Ok(DialBackInbound::Close(DialBackClose::default())))
        .await
        .unwrap();
    db_tx
        .send(Ok(DialBackInbound::ComputeToProxy(
            ComputeToProxyMessage::ResponseChunk {
                encrypted_payload: Bytes::from_static(b"late"),
                is_final: true,
            },
        )))
        .await
        .unwrap();

    let err = join(exchange).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::DialBackProtocol(DialBackViolation::MessageAfterClose)
    ));
    assert!(matches!(
        helper.next_request().await,
        HelperRequest::WorkerClosed { .. }
    ));
    assert_eq!(
        recv_in_time(&mut out_rx).await,
        OutboundMessage::ProxyWorkerError {
            task_id: WorkerId::from("w-2")
        }
    );
    assert_eq!(harness.gateway.linked_worker_count(), 0);

    helper.respond(response_chunk(b"ok", true)).await;
    assert_eq!(recv_in_time(&mut out_rx).await, expected_response(b"ok", true));
    helper.exit(0);
    join(session).await.unwrap();
}

#[tokio::test]
async fn worker_error_unlinks_and_notifies_the_caller() {
    let mut harness = Harness::new(proxy_settings());
    let (_in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let helper = harness.next_helper().await;

    helper.respond(find_worker("w-3")).await;
    recv_in_time(&mut out_rx).await;
    helper
        .respond(HelperResponse::WorkerError {
            worker_id: WorkerId::from("w-3"),
        })
        .await;
    assert_eq!(
        recv_in_time(&mut out_rx).await,
        OutboundMessage::ProxyWorkerError {
            task_id: WorkerId::from("w-3")
        }
    );
    assert_eq!(harness.gateway.linked_worker_count(), 0);

    let (db_tx, db_rx) = inbound_stream();
    let (db_out_tx, _db_out_rx) = harness.gateway.reply_channel();
    let exchange = spawn_dial_back(&harness.gateway, db_rx, db_out_tx);
    db_tx
        .send(Ok(DialBackInbound::Initiate {
            task_id: WorkerId::from("w-3"),
        }))
        .await
        .unwrap();
    let err = join(exchange).await.unwrap_err();
    assert!(matches!(err, GatewayError::UnknownWorkerId(id) if id.as_str() == "w-3"));

    helper.exit(0);
    join(session).await.unwrap();
}

#[tokio::test]
async fn dial_back_for_unknown_worker_is_not_found() {
    let harness = Harness::new(proxy_settings());
    let (db_tx, db_rx) = inbound_stream();
    let (db_out_tx, _db_out_rx) = harness.gateway.reply_channel();
    let exchange = spawn_dial_back(&harness.gateway, db_rx, db_out_tx);
    db_tx
        .send(Ok(DialBackInbound::Initiate {
            task_id: WorkerId::from("nope"),
        }))
        .await
        .unwrap();

    let err = join(exchange).await.unwrap_err();
    assert_eq!(err.status_code(), RpcStatusCode::NotFound);
    assert_eq!(err.error_code(), "GW_UNKNOWN_WORKER_ID");
}

#[tokio::test]
async fn dial_back_is_refused_without_proxy_mode() {
    let harness = Harness::new(GatewaySettings::default());
    let (_db_tx, db_rx) = inbound_stream::<DialBackInbound>();
    let (db_out_tx, _db_out_rx) = harness.gateway.reply_channel();
    let err = harness
        .gateway
        .invoke_proxy_dial_back(db_rx, db_out_tx)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::WorkerNotProxyCapable));
}

#[tokio::test]
async fn drain_rejects_new_sessions_and_waits_for_active_ones() {
    let mut harness = Harness::new(proxy_settings());
    let (_in_tx, in_rx) = inbound_stream();
    let (out_tx, _out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let helper = harness.next_helper().await;

    let gateway = harness.gateway.clone();
    let drain = tokio::spawn(async move { gateway.drain().await });
    tokio::time::timeout(STEP, async {
        while !harness.gateway.is_draining() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("drain started");

    let (_other_tx, other_rx) = inbound_stream::<InboundMessage>();
    let (other_out, _other_out_rx) = harness.gateway.reply_channel();
    let err = harness
        .gateway
        .invoke_workload(other_rx, other_out)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Draining));
    assert!(!drain.is_finished());

    helper.exit(0);
    join(session).await.unwrap();
    join(drain).await;
    let snapshot = harness.gateway.drain_snapshot();
    assert_eq!(snapshot.active_requests, 0);
    assert_eq!(snapshot.active_at_drain_start, 1);
}

#[tokio::test]
async fn aborted_session_still_unlinks_its_workers() {
    let mut harness = Harness::new(proxy_settings());
    let (_in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let helper = harness.next_helper().await;

    helper.respond(find_worker("w-abort")).await;
    recv_in_time(&mut out_rx).await;
    assert_eq!(harness.gateway.linked_worker_count(), 1);

    session.abort();
    assert!(session.await.unwrap_err().is_cancelled());
    assert_eq!(harness.gateway.linked_worker_count(), 0);
    harness.wait_for_concurrency(0).await;

    let (db_tx, db_rx) = inbound_stream();
    let (db_out_tx, _db_out_rx) = harness.gateway.reply_channel();
    let exchange = spawn_dial_back(&harness.gateway, db_rx, db_out_tx);
    db_tx
        .send(Ok(DialBackInbound::Initiate {
            task_id: WorkerId::from("w-abort"),
        }))
        .await
        .unwrap();
    assert!(matches!(
        join(exchange).await,
        Err(GatewayError::UnknownWorkerId(_))
    ));
}

#[tokio::test]
async fn duplicate_dial_back_leaves_the_live_exchange_alone() {
    let mut harness = Harness::new(proxy_settings());
    let (_in_tx, in_rx) = inbound_stream();
    let (out_tx, mut out_rx) = harness.gateway.reply_channel();
    let session = spawn_session(&harness.gateway, in_rx, out_tx);
    let helper = harness.next_helper().await;

    helper.respond(find_worker("w-dup")).await;
    recv_in_time(&mut out_rx).await;

    let (live_tx, live_rx) = inbound_stream();
    let (live_out_tx, mut live_out_rx) = harness.gateway.reply_channel();
    let _live = spawn_dial_back(&harness.gateway, live_rx, live_out_tx);
    live_tx
        .send(Ok(DialBackInbound::Initiate {
            task_id: WorkerId::from("w-dup"),
        }))
        .await
        .unwrap();
    // A queued key shows up once the live exchange has claimed the worker.
    helper
        .respond(HelperResponse::WorkerMessage {
            worker_id: WorkerId::from("w-dup"),
            message: ProxyToComputeMessage::DecryptionKey {
                key: Bytes::from_static(b"k1"),
            },
        })
        .await;
    recv_in_time(&mut live_out_rx).await;

    let (dup_tx, dup_rx) = inbound_stream();
    let (dup_out_tx, _dup_out_rx) = harness.gateway.reply_channel();
    let duplicate = spawn_dial_back(&harness.gateway, dup_rx, dup_out_tx);
    dup_tx
        .send(Ok(DialBackInbound::Initiate {
            task_id: WorkerId::from("w-dup"),
        }))
        .await
        .unwrap();
    let err = join(duplicate).await.unwrap_err();
    assert!(matches!(err, GatewayError::WorkerAlreadyConnected(ref id) if id.as_str() == "w-dup"));
    assert_eq!(err.error_code(), "GW_WORKER_ALREADY_CONNECTED");

    assert_eq!(harness.gateway.linked_worker_count(), 1);
    assert!(out_rx.try_recv().is_err());

    helper
        .respond(HelperResponse::WorkerMessage {
            worker_id: WorkerId::from("w-dup"),
            message: ProxyToComputeMessage::DecryptionKey {
                key: Bytes::from_static(b"k2"),
            },
        })
        .await;
    assert_eq!(
        recv_in_time(&mut live_out_rx).await,
        DialBackOutbound::ProxyToCompute(ProxyToComputeMessage::DecryptionKey {
            key: Bytes::from_static(b"k2"),
        })
    );

    helper.exit(0);
    join(session).await.unwrap();
    assert_eq!(harness.gateway.linked_worker_count(), 0);
}

#[tokio::test]
async fn worker_error_does_not_unlink_another_sessions_binding() {
    let mut harness = Harness::new(proxy_settings());
    let (_first_in, first_rx) = inbound_stream();
    let (first_out_tx, mut first_out) = harness.gateway.reply_channel();
    let first = spawn_session(&harness.gateway, first_rx, first_out_tx);
    let first_helper = harness.next_helper().await;

    let (_second_in, second_rx) = inbound_stream();
    let (second_out_tx, mut second_out) = harness.gateway.reply_channel();
    let second = spawn_session(&harness.gateway, second_rx, second_out_tx);
    let second_helper = harness.next_helper().await;

    first_helper.respond(find_worker("w-shared")).await;
    recv_in_time(&mut first_out).await;
    // Relinking the same id hands the worker to the second session.
    second_helper.respond(find_worker("w-shared")).await;
    recv_in_time(&mut second_out).await;

    first_helper
        .respond(HelperResponse::WorkerError {
            worker_id: WorkerId::from("w-shared"),
        })
        .await;
    assert_eq!(
        recv_in_time(&mut first_out).await,
        OutboundMessage::ProxyWorkerError {
            task_id: WorkerId::from("w-shared")
        }
    );
    assert_eq!(harness.gateway.linked_worker_count(), 1);

    first_helper.exit(0);
    join(first).await.unwrap();
    assert_eq!(harness.gateway.linked_worker_count(), 1);

    second_helper.exit(0);
    join(second).await.unwrap();
    assert_eq!(harness.gateway.linked_worker_count(), 0);
}
