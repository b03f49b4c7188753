//! Simulated collaborators of the orchestrator on the loopback bus.
use flowmgr_core::{
    orchestration::{
        api::{CommandData, Destination, Envelope, InfoData, Message},
        error::{ErrorData, ErrorType},
        infrastructure::{
            flow::{Flow, FlowPair, FlowPathPair, FlowUpdateType, PathInfoData, PathNode},
            rules::install_rules,
        },
    },
    transport::loopback::BusLoopback,
};
use tokio::task::JoinHandle;
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, warn};

/// Description marking flows the simulated topology engine refuses to route.
pub const UNROUTABLE: &str = "unroutable";

/// Port used on every inter-switch link of the simulated topology.
const ISL_PORT: u32 = 48;

fn direct_paths(flow: &Flow) -> FlowPathPair {
    if flow.is_one_switch() {
        return FlowPathPair::default();
    }
    let forward = PathInfoData::new(
        1,
        vec![
            PathNode::new(flow.source_switch.clone(), ISL_PORT, 0),
            PathNode::new(flow.destination_switch.clone(), ISL_PORT, 1),
        ],
    );
    let reverse = forward.reversed();
    FlowPathPair { forward, reverse }
}

fn publish(bus: &BusLoopback, envelope: Envelope) {
    if let Err(_error) = bus.publish(envelope) {
        #[cfg(feature = "flowmgr_tracing")]
        warn!("[sim] Publish failed: {}", _error);
    }
}

/// Topology engine answering path requests and installing the rules of created flows.
///
/// Every pair of switches is assumed directly linked.
pub fn spawn_topology_engine(bus: BusLoopback) -> JoinHandle<()> {
    let mut requests = bus.subscribe(Destination::TopologyEngine);
    let mut cache_updates = bus.subscribe(Destination::CacheUpdate);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(request) = requests.recv() => {
                    let Message::Command(CommandData::PathRequest(flow)) = request.message else {
                        continue;
                    };
                    let reply = if flow.description == UNROUTABLE {
                        Envelope::error(
                            Destination::Orchestrator,
                            request.correlation_id,
                            ErrorData::new(ErrorType::CreationFailure, "no path between endpoints", flow.flow_id),
                        )
                    } else {
                        Envelope::info(
                            Destination::Orchestrator,
                            request.correlation_id,
                            InfoData::Path(direct_paths(&flow)),
                        )
                    };
                    publish(&bus, reply);
                }
                Some(update) = cache_updates.recv() => {
                    let Message::Info(InfoData::CacheUpdate(update)) = update.message else {
                        continue;
                    };
                    if update.operation != FlowUpdateType::Create {
                        continue;
                    }
                    let pair = FlowPair::new(update.forward, update.reverse);
                    for rule in install_rules(&pair) {
                        #[cfg(feature = "flowmgr_tracing")]
                        debug!("[sim] Engine rule: flow_id: {}, switch_id: {}", rule.flow_id, rule.switch_id);
                        publish(&bus, Envelope::command(Destination::Orchestrator, None, CommandData::Rule(rule)));
                    }
                }
                else => break,
            }
        }
    })
}

/// Speaker applying every rule it receives and echoing it to the transaction tracker.
///
/// A silent speaker swallows the rules, leaving their transactions outstanding.
pub fn spawn_speaker(bus: BusLoopback, silent: bool) -> JoinHandle<()> {
    let mut rules = bus.subscribe(Destination::Speaker);
    tokio::spawn(async move {
        while let Some(envelope) = rules.recv().await {
            let Message::Command(CommandData::Rule(rule)) = envelope.message else {
                continue;
            };
            if silent {
                continue;
            }
            publish(
                &bus,
                Envelope::command(Destination::TransactionTracker, envelope.correlation_id, CommandData::Rule(rule)),
            );
        }
    })
}
