
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use fixtures::{Harness, direct_paths, flow_f1, spawn_topology_engine};
use futures::future::join_all;
use tower::{Service, ServiceBuilder, timeout::TimeoutLayer};

use crate::{
    orchestration::{
        api::{CommandData, Destination, Envelope, InfoData, Message, PathRequest, PathResponse},
        config::{DEFAULT_REMOVAL_TRANSACTION_TIMEOUT_MS, OrchestratorConfig},
        error::{ErrorData, ErrorType, OrchestrationError},
        infrastructure::{
            flow::{Flow, FlowPathPair, FlowState, FlowUpdateType},
            rules::{OutputVlanType, Rule, RuleCommand},
        },
        init_orchestrator, init_orchestrator_over_bus,
        services::resources::{FORWARD_FLOW_COOKIE_MASK, REVERSE_FLOW_COOKIE_MASK},
    },
    transport::loopback::BusLoopback,
};

#[tokio::test]
async fn integration_unknown_flow_is_not_found() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();

    assert_error!(harness, CommandData::FlowStatus { flow_id: "F9".into() }, ErrorType::NotFound);
    assert_error!(harness, CommandData::FlowGet { flow_id: "F9".into() }, ErrorType::NotFound);
    assert_error!(harness, CommandData::FlowPath { flow_id: "F9".into() }, ErrorType::NotFound);
    assert_error!(harness, CommandData::FlowDelete { flow_id: "F9".into() }, ErrorType::NotFound);
    let mut update = flow_f1();
    update.flow_id = "F9".into();
    assert_error!(harness, CommandData::FlowUpdate(update), ErrorType::NotFound);

    assert!(harness.cache_updates.try_recv().is_err());
    assert!(harness.speaker.try_recv().is_err());
    assert_eq!(
        harness.request(CommandData::FlowsGet { filter: None }).await,
        Message::Info(InfoData::Flows { flows: vec![] })
    );
}

#[tokio::test]
async fn integration_create_existing_leaves_record_unchanged() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());

    let mut other = flow_f1();
    other.bandwidth = 1;
    other.destination_port = 7;
    assert_error!(harness, CommandData::FlowCreate(other), ErrorType::AlreadyExists);

    let Message::Info(InfoData::Flow(stored)) =
        harness.request(CommandData::FlowGet { flow_id: "F1".into() }).await
    else {
        panic!("Expected Flow");
    };
    assert_eq!(stored.bandwidth, created.bandwidth);
    assert_eq!(stored.destination_port, created.destination_port);
    assert_eq!(stored.cookie, created.cookie);
    // Only the first create was announced
    assert!(harness.cache_updates.try_recv().is_ok());
    assert!(harness.cache_updates.try_recv().is_err());
}

#[tokio::test]
async fn integration_cache_update_precedes_reply() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());

    assert_eq!(harness.bus.published(), vec![Destination::CacheUpdate, Destination::Northbound]);
    let update = harness.cache_updates.try_recv().unwrap();
    let Message::Info(InfoData::CacheUpdate(update)) = update.message else {
        panic!("Expected CacheUpdate");
    };
    assert_eq!(update.operation, FlowUpdateType::Create);
    assert_eq!(update.forward, created);
    assert_eq!(update.reverse.source_switch, created.destination_switch);
    assert!(harness.cache_updates.try_recv().is_err());
}

#[tokio::test]
async fn integration_flow_lifecycle_scenario() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();

    let created = create!(harness, flow_f1());
    assert_eq!(status!(harness, "F1"), FlowState::Allocated);

    let rule = RuleCommand::new(
        &created,
        created.source_switch.clone(),
        Rule::InstallIngressFlow {
            input_port: 1,
            output_port: 48,
            input_vlan: 1,
            transit_vlan: created.transit_vlan,
            output_vlan_type: OutputVlanType::Replace,
            bandwidth: created.bandwidth,
            meter_id: created.meter_id,
        },
    );
    let pushed = harness.engine_rule(rule).await;
    let t1 = pushed.transaction_id;
    assert_ne!(t1, 0);
    assert_eq!(status!(harness, "F1"), FlowState::InProgress);

    harness.speaker_echo(pushed).await;
    assert_eq!(status!(harness, "F1"), FlowState::Up);

    assert_error!(harness, CommandData::FlowCreate(flow_f1()), ErrorType::AlreadyExists);
    assert_eq!(status!(harness, "F1"), FlowState::Up);
}

#[tokio::test]
async fn integration_stale_confirmation_is_noop() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());

    let rule = RuleCommand::new(&created, created.source_switch.clone(), Rule::RemoveFlow { meter_id: None });
    let first = harness.engine_rule(rule.clone()).await;
    let second = harness.engine_rule(rule).await;
    assert_ne!(first.transaction_id, second.transaction_id);

    // The first transaction was superseded by the second
    harness.speaker_echo(first.clone()).await;
    assert_eq!(status!(harness, "F1"), FlowState::InProgress);
    harness
        .router
        .call(Envelope::info(
            Destination::TransactionTracker,
            None,
            InfoData::RuleConfirmation { flow_id: "F1".into(), transaction_id: 12345 },
        ))
        .await
        .unwrap();
    assert_eq!(status!(harness, "F1"), FlowState::InProgress);

    harness.speaker_echo(second.clone()).await;
    assert_eq!(status!(harness, "F1"), FlowState::Up);
    // Duplicates of a completed confirmation change nothing
    harness.speaker_echo(second).await;
    assert_eq!(status!(harness, "F1"), FlowState::Up);
}

#[tokio::test]
async fn integration_update_preserves_rule_identifiers() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());

    let mut payload = flow_f1();
    payload.bandwidth = 20000;
    payload.description = "updated".into();
    payload.cookie = 0xdead;
    payload.meter_id = 99;
    payload.transit_vlan = 999;
    let Message::Info(InfoData::Flow(updated)) = harness.request(CommandData::FlowUpdate(payload)).await
    else {
        panic!("Expected Flow");
    };

    assert_eq!(updated.cookie, created.cookie);
    assert_eq!(updated.meter_id, created.meter_id);
    assert_eq!(updated.transit_vlan, created.transit_vlan);
    assert_eq!(updated.bandwidth, 20000);
    assert_eq!(updated.description, "updated");

    let _create = harness.cache_updates.try_recv().unwrap();
    let Message::Info(InfoData::CacheUpdate(update)) = harness.cache_updates.try_recv().unwrap().message
    else {
        panic!("Expected CacheUpdate");
    };
    assert_eq!(update.operation, FlowUpdateType::Update);
    assert_eq!(
        update.reverse.cookie & !REVERSE_FLOW_COOKIE_MASK,
        update.forward.cookie & !FORWARD_FLOW_COOKIE_MASK
    );
}

#[tokio::test]
async fn integration_update_repushes_rules_of_one_switch_flow() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let flow = Flow::new("F2", 5000, "", "sw-a", 1, 10, "sw-a", 2, 20);
    create!(harness, flow.clone());
    assert!(harness.drain_speaker().is_empty());

    let mut payload = flow;
    payload.destination_vlan = 30;
    harness.request(CommandData::FlowUpdate(payload)).await;
    let rules = harness.drain_speaker();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].transaction_id, rules[1].transaction_id);
    assert_eq!(status!(harness, "F2"), FlowState::InProgress);

    harness.speaker_echo(rules[0].clone()).await;
    assert_eq!(status!(harness, "F2"), FlowState::InProgress);
    harness.speaker_echo(rules[1].clone()).await;
    assert_eq!(status!(harness, "F2"), FlowState::Up);
}

#[tokio::test]
async fn integration_delete_then_not_found_with_removal_outstanding() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());

    let Message::Info(InfoData::Flow(removed)) =
        harness.request(CommandData::FlowDelete { flow_id: "F1".into() }).await
    else {
        panic!("Expected Flow");
    };
    assert_eq!(removed.cookie, created.cookie);

    assert_error!(harness, CommandData::FlowStatus { flow_id: "F1".into() }, ErrorType::NotFound);
    assert_error!(harness, CommandData::FlowGet { flow_id: "F1".into() }, ErrorType::NotFound);

    let removals = harness.drain_speaker();
    assert_eq!(removals.len(), 4);
    assert!(removals.iter().all(|rule| matches!(rule.rule, Rule::RemoveFlow { .. })));
    assert!(removals.iter().all(|rule| rule.transaction_id == removals[0].transaction_id));

    // Late removal confirmations find their transaction and leave the flow absent
    for rule in removals {
        harness.speaker_echo(rule).await;
    }
    assert_error!(harness, CommandData::FlowStatus { flow_id: "F1".into() }, ErrorType::NotFound);

    // The identifiers went back to the pool
    let recreated = create!(harness, flow_f1());
    assert_eq!(recreated.cookie, created.cookie);
}

#[tokio::test]
async fn integration_identifiers_reused_while_removal_outstanding() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());
    harness.request(CommandData::FlowDelete { flow_id: "F1".into() }).await;
    let removals = harness.drain_speaker();

    let mut other = flow_f1();
    other.flow_id = "F2".into();
    let reused = create!(harness, other);
    assert_eq!(reused.cookie, created.cookie);
    assert_eq!(reused.meter_id, created.meter_id);

    // Confirming the old removal does not touch the flow now owning the cookie
    for rule in removals {
        harness.speaker_echo(rule).await;
    }
    assert_eq!(status!(harness, "F2"), FlowState::Allocated);
}

#[tokio::test]
async fn integration_speaker_rejection_takes_flow_down() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());
    let rule = RuleCommand::new(&created, created.source_switch.clone(), Rule::RemoveFlow { meter_id: None });
    harness.engine_rule(rule).await;

    let rejection = ErrorData::new(ErrorType::RequestInvalid, "switch rejected the rule", "F1");
    harness
        .router
        .call(Envelope::error(Destination::TransactionTracker, Some("nb-42".into()), rejection.clone()))
        .await
        .unwrap();
    let forwarded = harness.northbound.recv().await.unwrap();
    assert_eq!(forwarded.correlation_id.as_deref(), Some("nb-42"));
    assert_eq!(forwarded.message, Message::Error(rejection));

    assert_eq!(status!(harness, "F1"), FlowState::Down);
    assert!(matches!(
        harness.request(CommandData::FlowGet { flow_id: "F1".into() }).await,
        Message::Info(InfoData::Flow(_))
    ));
}

#[tokio::test]
async fn integration_speaker_rejection_of_up_flow() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());
    let rule = RuleCommand::new(&created, created.source_switch.clone(), Rule::RemoveFlow { meter_id: None });
    let pushed = harness.engine_rule(rule).await;
    harness.speaker_echo(pushed).await;
    assert_eq!(status!(harness, "F1"), FlowState::Up);

    // Uncorrelated errors are not forwarded
    harness
        .router
        .call(Envelope::error(
            Destination::TransactionTracker,
            None,
            ErrorData::new(ErrorType::RequestInvalid, "meter conflict", "F1"),
        ))
        .await
        .unwrap();
    assert!(harness.northbound.try_recv().is_err());
    assert_eq!(status!(harness, "F1"), FlowState::Down);
}

#[tokio::test]
async fn integration_creation_failure_removes_flow() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    create!(harness, flow_f1());

    let failure = ErrorData::new(ErrorType::CreationFailure, "persistence failed", "F1");
    harness
        .router
        .call(Envelope::error(Destination::Orchestrator, Some("nb-1".into()), failure.clone()))
        .await
        .unwrap();
    assert_eq!(harness.northbound.recv().await.unwrap().message, Message::Error(failure));

    assert_error!(harness, CommandData::FlowStatus { flow_id: "F1".into() }, ErrorType::NotFound);
    // The rollback freed the identifier
    create!(harness, flow_f1());
}

#[tokio::test]
async fn integration_creation_failure_of_confirmed_flow_takes_it_down() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let created = create!(harness, flow_f1());
    let rule = RuleCommand::new(&created, created.source_switch.clone(), Rule::RemoveFlow { meter_id: None });
    let pushed = harness.engine_rule(rule).await;
    harness.speaker_echo(pushed).await;
    assert_eq!(status!(harness, "F1"), FlowState::Up);

    harness
        .router
        .call(Envelope::error(
            Destination::Orchestrator,
            None,
            ErrorData::new(ErrorType::CreationFailure, "persistence failed", "F1"),
        ))
        .await
        .unwrap();
    assert_eq!(status!(harness, "F1"), FlowState::Down);
    let Message::Info(InfoData::Flow(kept)) =
        harness.request(CommandData::FlowGet { flow_id: "F1".into() }).await
    else {
        panic!("Expected Flow");
    };
    assert_eq!(kept.cookie, created.cookie);
    // Its identifiers are still held
    let mut other = flow_f1();
    other.flow_id = "F2".into();
    assert_ne!(create!(harness, other).cookie, created.cookie);
}

#[tokio::test]
async fn integration_update_path_failure_takes_flow_down() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let calls = Arc::new(AtomicUsize::new(0));
    let routes_once = tower::service_fn(move |request: PathRequest| {
        let calls = calls.clone();
        async move {
            let PathRequest::Compute(flow) = request;
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(PathResponse::Paths(direct_paths(&flow)))
            } else {
                Err(OrchestrationError::PathComputationFailed(flow.flow_id, "no route".into()))
            }
        }
    });
    let bus = BusLoopback::new();
    let mut northbound = bus.subscribe(Destination::Northbound);
    let (mut router, _, _) = init_orchestrator(OrchestratorConfig::default(), bus, routes_once);

    let created = roundtrip(&mut router, &mut northbound, CommandData::FlowCreate(flow_f1())).await;
    assert!(matches!(created, Message::Info(InfoData::Flow(_))));
    let mut moved = flow_f1();
    moved.destination_switch = "00:00:00:00:00:00:00:0c".into();
    let Message::Error(error) = roundtrip(&mut router, &mut northbound, CommandData::FlowUpdate(moved)).await
    else {
        panic!("Expected Error");
    };
    assert_eq!(error.error_type, ErrorType::UpdateFailure);
    assert_eq!(
        roundtrip(&mut router, &mut northbound, CommandData::FlowStatus { flow_id: "F1".into() }).await,
        Message::Info(InfoData::FlowStatus { flow_id: "F1".into(), state: FlowState::Down })
    );
}

/// Sends a northbound command through `router` and returns the reply read from `northbound`.
async fn roundtrip<R>(
    router: &mut R,
    northbound: &mut tokio::sync::mpsc::UnboundedReceiver<Envelope>,
    command: CommandData,
) -> Message
where
    R: Service<Envelope, Response = (), Error = OrchestrationError>,
{
    router.call(Envelope::command(Destination::Orchestrator, Some("nb-1".into()), command)).await.unwrap();
    northbound.recv().await.unwrap().message
}

#[tokio::test]
async fn integration_update_failure_takes_flow_down() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    create!(harness, flow_f1());

    harness
        .router
        .call(Envelope::error(
            Destination::Orchestrator,
            None,
            ErrorData::new(ErrorType::UpdateFailure, "persistence failed", "F1"),
        ))
        .await
        .unwrap();
    assert_eq!(status!(harness, "F1"), FlowState::Down);
}

#[tokio::test]
async fn integration_deletion_failure_keeps_flow_absent() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    create!(harness, flow_f1());
    harness.request(CommandData::FlowDelete { flow_id: "F1".into() }).await;

    harness
        .router
        .call(Envelope::error(
            Destination::Orchestrator,
            None,
            ErrorData::new(ErrorType::DeletionFailure, "persistence failed", "F1"),
        ))
        .await
        .unwrap();
    assert_error!(harness, CommandData::FlowStatus { flow_id: "F1".into() }, ErrorType::NotFound);
}

#[tokio::test]
async fn integration_delete_unknown_flow() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    assert_error!(harness, CommandData::FlowDelete { flow_id: "F9".into() }, ErrorType::NotFound);
    assert!(harness.bus.published().iter().all(|destination| *destination == Destination::Northbound));
}

#[tokio::test]
async fn integration_path_engine_over_bus() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let bus = BusLoopback::new().with_wire_check(true);
    let mut northbound = bus.subscribe(Destination::Northbound);
    let (router, _, pending) = init_orchestrator_over_bus(OrchestratorConfig::default(), bus.clone());
    let engine = spawn_topology_engine(&bus, router.clone());

    let mut requester = router.clone();
    let flow = flow_f1();
    requester
        .call(Envelope::command(Destination::Orchestrator, Some("nb-1".into()), CommandData::FlowCreate(flow.clone())))
        .await
        .unwrap();
    let Message::Info(InfoData::Flow(created)) = northbound.recv().await.unwrap().message else {
        panic!("Expected Flow");
    };
    assert_eq!(created.flow_path, direct_paths(&flow).forward);
    assert!(pending.is_empty());

    let mut unroutable = flow;
    unroutable.flow_id = "F2".into();
    unroutable.description = "unroutable".into();
    requester
        .call(Envelope::command(Destination::Orchestrator, Some("nb-2".into()), CommandData::FlowCreate(unroutable)))
        .await
        .unwrap();
    let Message::Error(error) = northbound.recv().await.unwrap().message else {
        panic!("Expected Error");
    };
    assert_eq!(error.error_type, ErrorType::CreationFailure);
    assert_eq!(error.description, "F2");
    engine.abort();
}

#[tokio::test(start_paused = true)]
async fn integration_unanswered_path_request() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let bus = BusLoopback::new();
    let mut northbound = bus.subscribe(Destination::Northbound);
    let config = OrchestratorConfig::default().with_path_timeout_ms(50);
    let (mut router, _, pending) = init_orchestrator_over_bus(config, bus.clone());

    router
        .call(Envelope::command(Destination::Orchestrator, Some("nb-1".into()), CommandData::FlowCreate(flow_f1())))
        .await
        .unwrap();
    let Message::Error(error) = northbound.recv().await.unwrap().message else {
        panic!("Expected Error");
    };
    assert_eq!(error.error_type, ErrorType::CreationFailure);
    assert!(pending.is_empty());

    // Without a path timeout the request waits until the caller gives up
    let (router, _, pending) =
        init_orchestrator_over_bus(OrchestratorConfig::default().with_path_timeout_ms(0), bus);
    let mut bounded =
        ServiceBuilder::new().layer(TimeoutLayer::new(Duration::from_millis(100))).service(router);
    let result = bounded
        .call(Envelope::command(Destination::Orchestrator, Some("nb-2".into()), CommandData::FlowCreate(flow_f1())))
        .await;
    assert!(result.is_err());
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn integration_install_on_create_pushes_rules() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::with_config(OrchestratorConfig::default().with_install_on_create(true));
    let flow = Flow::new("F3", 1000, "", "sw-a", 1, 0, "sw-a", 2, 100);
    let created = create!(harness, flow);

    let rules = harness.drain_speaker();
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().all(|rule| rule.transaction_id == rules[0].transaction_id));
    assert_eq!(rules[0].cookie, created.cookie);
    assert_eq!(
        rules[0].rule,
        Rule::InstallOneSwitchFlow {
            input_port: 1,
            output_port: 2,
            input_vlan: 0,
            output_vlan: 100,
            output_vlan_type: OutputVlanType::Push,
            bandwidth: 1000,
            meter_id: created.meter_id,
        }
    );
    assert_eq!(rules[1].switch_id, "sw-a");
    assert_eq!(status!(harness, "F3"), FlowState::InProgress);
}

#[tokio::test(start_paused = true)]
async fn integration_stale_transaction_expiry() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::with_config(
        OrchestratorConfig::default().with_stale_transaction_timeout_ms(1000).with_sweep_interval_ms(100),
    );
    let created = create!(harness, flow_f1());
    let rule = RuleCommand::new(&created, created.source_switch.clone(), Rule::RemoveFlow { meter_id: None });
    harness.engine_rule(rule).await;

    let sweeper = harness.sweeper.take().unwrap().spawn(Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(status!(harness, "F1"), FlowState::InProgress);
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(status!(harness, "F1"), FlowState::Down);
    sweeper.abort();
}

#[tokio::test]
async fn integration_expiry_disabled() {
    let harness = Harness::with_config(OrchestratorConfig::default().with_removal_transaction_timeout_ms(0));
    assert!(harness.sweeper.is_none());
}

#[tokio::test(start_paused = true)]
async fn integration_unanswered_removal_is_forgotten() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let mut harness = Harness::new();
    let mut sweeper = harness.sweeper.take().unwrap();
    create!(harness, flow_f1());
    harness.request(CommandData::FlowDelete { flow_id: "F1".into() }).await;
    let removals = harness.drain_speaker();
    assert!(!removals.is_empty());

    tokio::time::sleep(Duration::from_millis(DEFAULT_REMOVAL_TRANSACTION_TIMEOUT_MS / 2)).await;
    assert!(sweeper.sweep_once().await.unwrap().is_empty());
    tokio::time::sleep(Duration::from_millis(DEFAULT_REMOVAL_TRANSACTION_TIMEOUT_MS / 2)).await;
    assert_eq!(sweeper.sweep_once().await.unwrap(), vec!["F1".to_string()]);

    // A late answer to the forgotten removal leaves a re-created flow alone
    create!(harness, flow_f1());
    for rule in removals {
        harness.speaker_echo(rule).await;
    }
    assert_eq!(status!(harness, "F1"), FlowState::Allocated);
}

#[tokio::test]
async fn integration_concurrent_lifecycles_stress() {
    #[cfg(feature = "flowmgr_tracing")]
    crate::flowmgr_tracing::init();
    let harness = Harness::new();
    let flows_count = 64;

    let tasks = (0..flows_count).map(|index| {
        let mut router = harness.router.clone();
        async move {
            let flow_id = format!("flow-{index}");
            let flow = Flow::new(flow_id.clone(), 1000, "", "sw-a", index, 0, "sw-b", index, 0);
            for command in [
                CommandData::FlowCreate(flow.clone()),
                CommandData::FlowCreate(flow.clone()),
                CommandData::FlowStatus { flow_id: flow_id.clone() },
                CommandData::FlowUpdate(flow),
                CommandData::FlowPath { flow_id: flow_id.clone() },
            ] {
                router
                    .call(Envelope::command(Destination::Orchestrator, Some(flow_id.clone()), command))
                    .await
                    .unwrap();
            }
            if index % 2 == 0 {
                router
                    .call(Envelope::command(
                        Destination::Orchestrator,
                        Some(flow_id.clone()),
                        CommandData::FlowDelete { flow_id },
                    ))
                    .await
                    .unwrap();
            }
        }
    });
    join_all(tasks).await;

    let mut harness = harness;
    let mut already_exists = 0;
    while let Ok(reply) = harness.northbound.try_recv() {
        match reply.message {
            Message::Error(error) => {
                assert_eq!(error.error_type, ErrorType::AlreadyExists);
                already_exists += 1;
            }
            _ => {}
        }
    }
    assert_eq!(already_exists, flows_count);

    let Message::Info(InfoData::Flows { flows }) = harness.request(CommandData::FlowsGet { filter: None }).await
    else {
        panic!("Expected Flows");
    };
    assert_eq!(flows.len(), flows_count as usize / 2);
    let distinct: std::collections::HashSet<_> = flows.iter().map(|flow| flow.cookie).collect();
    assert_eq!(distinct.len(), flows.len());
}
