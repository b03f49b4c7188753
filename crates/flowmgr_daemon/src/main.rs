use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use flowmgr_client::{DEFAULT_REQUEST_TIMEOUT_MS, NorthboundClient};
use flowmgr_core::{
    orchestration::{
        api::Destination,
        config::{
            DEFAULT_PATH_TIMEOUT_MS, DEFAULT_REMOVAL_TRANSACTION_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_MS,
            OrchestratorConfig,
        },
        infrastructure::flow::{Flow, FlowState},
        init_orchestrator_over_bus,
    },
    transport::loopback::BusLoopback,
};
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};
use tower::Service;
#[cfg(feature = "flowmgr_tracing")]
use tracing::{info, warn};

mod sim;

#[derive(Parser, Debug)]
#[command(name = "flowmgr_daemon")]
#[command(about = "Flow lifecycle orchestrator over a simulated network")]
struct FlowmgrDaemonArgs {
    /// Push install rules right after a create
    #[arg(long, default_value_t = false)]
    install_on_create: bool,

    /// Keep the installed rules untouched on update
    #[arg(long, default_value_t = false)]
    no_reinstall_on_update: bool,

    /// Reject malformed flow payloads
    #[arg(long, default_value_t = false)]
    payload_validation: bool,

    /// Path engine reply timeout in milliseconds, 0 to wait forever
    #[arg(long, default_value_t = DEFAULT_PATH_TIMEOUT_MS)]
    path_timeout_ms: u64,

    /// Age in milliseconds after which an unconfirmed transaction takes its flow down, 0 to disable
    #[arg(long, default_value_t = 0)]
    stale_transaction_timeout_ms: u64,

    /// Age in milliseconds after which an unanswered removal of a deleted flow is forgotten, 0 to keep it
    #[arg(long, default_value_t = DEFAULT_REMOVAL_TRANSACTION_TIMEOUT_MS)]
    removal_transaction_timeout_ms: u64,

    /// Period of the stale transaction sweep in milliseconds
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    sweep_interval_ms: u64,

    /// Number of flows provisioned by the demo scenario
    #[arg(short, long, default_value_t = 4)]
    flows: u32,

    /// Simulate a speaker that never applies rules
    #[arg(long, default_value_t = false)]
    silent_speaker: bool,

    /// Round-trip every envelope through the JSON wire form
    #[arg(long, default_value_t = false)]
    wire_check: bool,

    /// Keep serving after the demo scenario until interrupted
    #[arg(short, long, default_value_t = false)]
    serve: bool,
}

impl FlowmgrDaemonArgs {
    fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_install_on_create(self.install_on_create)
            .with_reinstall_on_update(!self.no_reinstall_on_update)
            .with_payload_validation(self.payload_validation)
            .with_path_timeout_ms(self.path_timeout_ms)
            .with_stale_transaction_timeout_ms(self.stale_transaction_timeout_ms)
            .with_removal_transaction_timeout_ms(self.removal_transaction_timeout_ms)
            .with_sweep_interval_ms(self.sweep_interval_ms)
    }
}

/// Polls the status of `flow_id` until it leaves the transient states.
async fn settle(
    client: &mut NorthboundClient<BusLoopback>,
    flow_id: &str,
    deadline: Duration,
) -> anyhow::Result<FlowState> {
    let start = tokio::time::Instant::now();
    loop {
        let state = client.status(flow_id).await?;
        if matches!(state, FlowState::Up | FlowState::Down) || start.elapsed() >= deadline {
            return Ok(state);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn run_scenario(
    client: &mut NorthboundClient<BusLoopback>,
    flows: u32,
    deadline: Duration,
) -> anyhow::Result<()> {
    for index in 0..flows {
        let flow = Flow::new(
            format!("flow-{index}"),
            10_000,
            "demo flow",
            format!("00:00:00:00:00:00:00:{:02x}", index % 4 + 1),
            index + 1,
            100 + index as u16,
            format!("00:00:00:00:00:00:00:{:02x}", (index + 1) % 4 + 1),
            index + 1,
            200 + index as u16,
        );
        let created = client.create(flow).await.context("flow creation")?;
        println!(
            "created {}: cookie {:#x}, meter {}, transit vlan {}",
            created.flow_id, created.cookie, created.meter_id, created.transit_vlan
        );
    }

    for index in 0..flows {
        let flow_id = format!("flow-{index}");
        let state = settle(client, &flow_id, deadline).await?;
        println!("{flow_id}: {state}");
    }

    let unroutable = Flow::new("flow-unroutable", 1, sim::UNROUTABLE, "sw-x", 1, 0, "sw-y", 1, 0);
    match client.create(unroutable).await {
        Err(error) => println!("unroutable flow rejected: {error}"),
        Ok(flow) => bail!("unroutable flow {} was created", flow.flow_id),
    }

    if let Some(mut flow) = client.dump(None).await?.into_iter().next() {
        flow.bandwidth *= 2;
        let updated = client.update(flow).await.context("flow update")?;
        let state = settle(client, &updated.flow_id, deadline).await?;
        println!("updated {}: bandwidth {}, {}", updated.flow_id, updated.bandwidth, state);

        let deleted = client.delete(updated.flow_id).await.context("flow deletion")?;
        println!("deleted {}", deleted.flow_id);
    }

    println!("{} flows remaining", client.dump(None).await?.len());
    Ok(())
}

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(feature = "flowmgr_tracing")]
    flowmgr_core::flowmgr_tracing::init();

    let args = FlowmgrDaemonArgs::parse();
    let config = args.config();

    let bus = BusLoopback::new().with_wire_check(args.wire_check);
    let inbound = UnboundedReceiverStream::new(bus.subscribe(Destination::Orchestrator))
        .merge(UnboundedReceiverStream::new(bus.subscribe(Destination::TransactionTracker)));
    let (router, sweeper, _) = init_orchestrator_over_bus(config, bus.clone());

    let _engine = sim::spawn_topology_engine(bus.clone());
    let _speaker = sim::spawn_speaker(bus.clone(), args.silent_speaker);
    let _sweeper = sweeper.map(|sweeper| sweeper.spawn(config.sweep_interval()));

    // Handlers suspend on path replies delivered through this same loop
    let _router = tokio::spawn(async move {
        tokio::pin!(inbound);
        while let Some(envelope) = inbound.next().await {
            let mut router = router.clone();
            tokio::spawn(async move {
                if let Err(_error) = router.call(envelope).await {
                    #[cfg(feature = "flowmgr_tracing")]
                    warn!("[daemon] Envelope dropped: {}", _error);
                }
            });
        }
    });

    let mut client = NorthboundClient::new(bus.clone(), DEFAULT_REQUEST_TIMEOUT_MS);
    let _listener = client.spawn_listener(bus.subscribe(Destination::Northbound));

    #[cfg(feature = "flowmgr_tracing")]
    info!("[daemon] Orchestrator started: config: {:?}", config);

    let deadline = config
        .stale_transaction_timeout()
        .map_or(Duration::from_secs(2), |timeout| timeout + config.sweep_interval() * 2);
    run_scenario(&mut client, args.flows, deadline).await?;

    if args.serve {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
