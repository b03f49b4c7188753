//! Router.
//!
//! Entry point of every inbound envelope. Replies awaited by a suspended
//! handler are handed back first, whatever their destination. The rest is
//! dispatched by destination and payload kind:
//!
//! | Destination          | Payload            | Handler                          |
//! |----------------------|--------------------|----------------------------------|
//! | `Orchestrator`       | `Command(Rule)`    | rule stage, from the topology engine |
//! | `Orchestrator`       | other `Command`    | Flow Command Handler, reply published |
//! | `Orchestrator`       | `Error`            | topology engine error handler    |
//! | `Orchestrator`       | `Info`             | dropped, nobody awaits it        |
//! | `TransactionTracker` | any                | Speaker Response Handler         |
//!
//! A handler failure is returned to the caller; when the failing envelope
//! carried a correlation id the requester also receives the mapped error.
use std::{future::Future, pin::Pin, task::Poll};

use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, warn};

use crate::{
    orchestration::{
        api::{CommandData, Destination, Envelope, Message, RuleRequest, RuleResponse},
        error::{ErrorData, OrchestrationError},
    },
    transport::pending::PendingReplies,
};

#[derive(Debug, Clone)]
pub struct Router<H, D, E, K, B> {
    /// Replies awaited by suspended handlers
    pending: PendingReplies,
    /// Flow Command Handler
    command: H,
    /// Rule stage
    dispatch: D,
    /// Topology engine error handler
    engine: E,
    /// Speaker Response Handler
    speaker: K,
    /// Outbound bus
    bus: B,
}

impl<H, D, E, K, B> Router<H, D, E, K, B> {
    pub fn new(pending: PendingReplies, command: H, dispatch: D, engine: E, speaker: K, bus: B) -> Self {
        Self { pending, command, dispatch, engine, speaker, bus }
    }
}

impl<H, D, E, K, B> Router<H, D, E, K, B>
where
    H: Service<Envelope, Response = Envelope, Error = OrchestrationError> + Clone + Send + 'static,
    H::Future: Send,
    D: Service<RuleRequest, Response = RuleResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    D::Future: Send,
    E: Service<Envelope, Response = Option<Envelope>, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    E::Future: Send,
    K: Service<Envelope, Response = Option<Envelope>, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    K::Future: Send,
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    async fn publish(&mut self, envelope: Option<Envelope>) -> Result<(), OrchestrationError> {
        match envelope {
            Some(envelope) => self.bus.ready().await?.call(envelope).await,
            None => Ok(()),
        }
    }

    async fn route(&mut self, envelope: Envelope) -> Result<(), OrchestrationError> {
        let Envelope { correlation_id, timestamp, destination, message } = envelope;
        match (destination, message) {
            (Destination::Orchestrator, Message::Command(CommandData::Rule(rule))) => {
                self.dispatch.ready().await?.call(RuleRequest::Forward { rule, correlation_id }).await?;
                Ok(())
            }
            (Destination::Orchestrator, message @ Message::Command(_)) => {
                let envelope = Envelope { correlation_id, timestamp, destination, message };
                let reply = self.command.ready().await?.call(envelope).await?;
                self.publish(Some(reply)).await
            }
            (Destination::Orchestrator, message @ Message::Error(_)) => {
                let envelope = Envelope { correlation_id, timestamp, destination, message };
                let forward = self.engine.ready().await?.call(envelope).await?;
                self.publish(forward).await
            }
            (Destination::Orchestrator, Message::Info(_info)) => {
                #[cfg(feature = "flowmgr_tracing")]
                debug!("[router] Unawaited info dropped: {:?}", _info);
                Ok(())
            }
            (Destination::TransactionTracker, message) => {
                let envelope = Envelope { correlation_id, timestamp, destination, message };
                let forward = self.speaker.ready().await?.call(envelope).await?;
                self.publish(forward).await
            }
            (destination, _) => {
                Err(OrchestrationError::UnroutableEnvelope(format!("{destination:?}")))
            }
        }
    }
}

impl<H, D, E, K, B> Service<Envelope> for Router<H, D, E, K, B>
where
    H: Service<Envelope, Response = Envelope, Error = OrchestrationError> + Clone + Send + 'static,
    H::Future: Send,
    D: Service<RuleRequest, Response = RuleResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    D::Future: Send,
    E: Service<Envelope, Response = Option<Envelope>, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    E::Future: Send,
    K: Service<Envelope, Response = Option<Envelope>, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    K::Future: Send,
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    type Response = ();
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        let mut this = self.clone();
        Box::pin(async move {
            let envelope = if this.pending.is_awaited(&envelope) {
                match this.pending.complete(envelope) {
                    Ok(()) => return Ok(()),
                    // The waiter gave up in between, route it as any other envelope
                    Err(envelope) => envelope,
                }
            } else {
                envelope
            };

            let correlation_id = envelope.correlation_id.clone();
            match this.route(envelope).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    #[cfg(feature = "flowmgr_tracing")]
                    warn!("[router] Failed: correlation_id: {:?}, error: {}", correlation_id, error);
                    if correlation_id.is_some() {
                        let notice = Envelope::error(
                            Destination::Northbound,
                            correlation_id,
                            ErrorData::from(&error),
                        );
                        this.publish(Some(notice)).await?;
                    }
                    Err(error)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{
        orchestration::{
            RouterDefaultStack,
            api::InfoData,
            error::ErrorType,
            infrastructure::{
                flow::{Flow, FlowState},
                rules::{Rule, RuleCommand},
            },
            init_orchestrator,
        },
        transport::{loopback::BusLoopback, nop::PathNop},
    };

    fn router_on(bus: &BusLoopback) -> RouterDefaultStack<BusLoopback, PathNop> {
        init_orchestrator(
            Default::default(),
            bus.clone(),
            PathNop,
        )
        .0
    }

    async fn northbound_reply(northbound: &mut UnboundedReceiver<Envelope>) -> Message {
        northbound.recv().await.unwrap().message
    }

    fn command(command: CommandData) -> Envelope {
        Envelope::command(Destination::Orchestrator, Some("nb-1".into()), command)
    }

    #[tokio::test]
    async fn unit_router_replies_to_northbound_commands() {
        #[cfg(feature = "flowmgr_tracing")]
        crate::flowmgr_tracing::init();
        let bus = BusLoopback::new();
        let mut northbound = bus.subscribe(Destination::Northbound);
        let mut router = router_on(&bus);

        let flow = Flow::new("F1", 10000, "", "sw-a", 1, 1, "sw-a", 2, 2);
        router.call(command(CommandData::FlowCreate(flow))).await.unwrap();
        assert!(matches!(northbound_reply(&mut northbound).await, Message::Info(InfoData::Flow(_))));

        router.call(command(CommandData::FlowStatus { flow_id: "F9".into() })).await.unwrap();
        let Message::Error(error) = northbound_reply(&mut northbound).await else {
            panic!("Expected Error");
        };
        assert_eq!(error.error_type, ErrorType::NotFound);
    }

    #[tokio::test]
    async fn unit_router_forwards_engine_rules_to_speaker() {
        let bus = BusLoopback::new();
        let mut northbound = bus.subscribe(Destination::Northbound);
        let mut speaker = bus.subscribe(Destination::Speaker);
        let mut router = router_on(&bus);

        let flow = Flow::new("F1", 10000, "", "sw-a", 1, 1, "sw-a", 2, 2);
        router.call(command(CommandData::FlowCreate(flow.clone()))).await.unwrap();
        let Message::Info(InfoData::Flow(created)) = northbound_reply(&mut northbound).await else {
            panic!("Expected Flow");
        };

        let rule = RuleCommand::new(&created, "sw-a", Rule::RemoveFlow { meter_id: None });
        router
            .call(Envelope::command(Destination::Orchestrator, None, CommandData::Rule(rule)))
            .await
            .unwrap();
        let Message::Command(CommandData::Rule(sent)) = speaker.recv().await.unwrap().message else {
            panic!("Expected Rule");
        };
        assert_ne!(sent.transaction_id, 0);

        router.call(command(CommandData::FlowStatus { flow_id: "F1".into() })).await.unwrap();
        assert_eq!(
            northbound_reply(&mut northbound).await,
            Message::Info(InfoData::FlowStatus { flow_id: "F1".into(), state: FlowState::InProgress })
        );

        // The speaker echoes the applied rule to the transaction tracker
        router
            .call(Envelope::command(Destination::TransactionTracker, None, CommandData::Rule(sent)))
            .await
            .unwrap();
        router.call(command(CommandData::FlowStatus { flow_id: "F1".into() })).await.unwrap();
        assert_eq!(
            northbound_reply(&mut northbound).await,
            Message::Info(InfoData::FlowStatus { flow_id: "F1".into(), state: FlowState::Up })
        );
    }

    #[tokio::test]
    async fn unit_router_hands_awaited_replies_back() {
        let bus = BusLoopback::new();
        let (mut router, _, pending) = init_orchestrator(
            Default::default(),
            bus.clone(),
            PathNop,
        );
        let reply = pending.register("path-1".into());
        let envelope = Envelope::info(
            Destination::Orchestrator,
            Some("path-1".into()),
            InfoData::FlowDown { flow_id: "F1".into() },
        );
        router.call(envelope.clone()).await.unwrap();
        assert_eq!(reply.await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn unit_router_rejects_outbound_destinations() {
        let bus = BusLoopback::new();
        let mut northbound = bus.subscribe(Destination::Northbound);
        let mut router = router_on(&bus);
        let envelope = Envelope::command(
            Destination::Speaker,
            Some("nb-3".into()),
            CommandData::FlowGet { flow_id: "F1".into() },
        );
        assert!(matches!(
            router.call(envelope).await.unwrap_err(),
            OrchestrationError::UnroutableEnvelope(_)
        ));
        let Message::Error(error) = northbound_reply(&mut northbound).await else {
            panic!("Expected Error");
        };
        assert_eq!(error.error_type, ErrorType::InternalError);
    }
}
