//! The two outbound event-bus contracts (§6): the wire-dispatch bus that
//! carries FlowMods out to switches, and the app bus that carries
//! `flow.added` / `flow.removed` / `flow.error` notifications. Both are
//! non-blocking enqueue (§5); this subsystem only produces onto them, a
//! wire dispatcher and whatever consumes app notifications are external.
//!
//! Modeled as plain `tokio::sync::mpsc` channels, the way a `futures::mpsc`
//! bus threads through `firezone-firezone`'s gateway/relay event loops.

use tokio::sync::mpsc;

use crate::dpid::Dpid;
use crate::model::{FlowCommand, FlowDescription, FlowsRequest};
use crate::ofp::OfFlowMod;

/// `kytos/flow_manager.messages.out.ofpt_flow_mod` (§6): one FlowMod
/// addressed to a switch, carrying the xid this subsystem assigned so a
/// later `ofpt_error` can be correlated back to it (§4.F item 5).
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundFlowMod {
    pub destination: Dpid,
    pub xid: u32,
    pub message: OfFlowMod,
}

/// `kytos/flow_manager.flow.added` / `…flow.removed` / `…flow.error` (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    FlowAdded {
        dpid: Dpid,
        flow: FlowDescription,
    },
    FlowRemoved {
        dpid: Dpid,
        flow: FlowDescription,
    },
    FlowError {
        dpid: Dpid,
        error_command: FlowCommand,
        error_type: u16,
        error_code: u16,
    },
}

/// Everything the orchestrator needs to publish to the outside world.
/// Abstracted as a trait so tests can observe what would have gone out
/// without standing up real channels.
pub trait EventBus: Send + Sync {
    fn send_flow_mod(&self, msg: OutboundFlowMod);
    fn publish_app_event(&self, event: AppEvent);
}

/// Default bus: an unbounded `mpsc` pair per contract, matching §5's "the
/// outbound event bus ... is non-blocking enqueue" (an unbounded sender
/// never awaits).
pub struct ChannelEventBus {
    flow_mod_tx: mpsc::UnboundedSender<OutboundFlowMod>,
    app_event_tx: mpsc::UnboundedSender<AppEvent>,
}

impl ChannelEventBus {
    pub fn new() -> (
        Self,
        mpsc::UnboundedReceiver<OutboundFlowMod>,
        mpsc::UnboundedReceiver<AppEvent>,
    ) {
        let (flow_mod_tx, flow_mod_rx) = mpsc::unbounded_channel();
        let (app_event_tx, app_event_rx) = mpsc::unbounded_channel();
        (
            Self {
                flow_mod_tx,
                app_event_tx,
            },
            flow_mod_rx,
            app_event_rx,
        )
    }
}

impl EventBus for ChannelEventBus {
    fn send_flow_mod(&self, msg: OutboundFlowMod) {
        // The receiving half (the wire dispatcher) is external; if nobody is
        // listening there is nothing useful to do but note it, same as any
        // other non-blocking enqueue onto a bus nobody drains.
        if self.flow_mod_tx.send(msg).is_err() {
            tracing::debug!("flow_mod bus has no receiver, dropping message");
        }
    }

    fn publish_app_event(&self, event: AppEvent) {
        if self.app_event_tx.send(event).is_err() {
            tracing::debug!("app event bus has no receiver, dropping event");
        }
    }
}

/// `.*.of_core.*.ofpt_error` (§6): a switch-reported error, already
/// resolved to its source switch and decoded enough to drive §4.F item 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlowErrorEvent {
    pub xid: u32,
    pub source_dpid: Dpid,
    pub error_type: u16,
    pub error_code: u16,
}

/// The OpenFlow 1.0/1.3 `OFPET_BAD_ACTION` / `OFPBAC_BAD_OUT_PORT` pairing
/// this subsystem specifically reacts to (§4.F item 5, §8 scenario 6).
pub const OFPET_BAD_ACTION: u16 = 2;
pub const OFPBAC_BAD_OUT_PORT: u16 = 4;

impl OpenFlowErrorEvent {
    pub fn is_bad_out_port(&self) -> bool {
        self.error_type == OFPET_BAD_ACTION && self.error_code == OFPBAC_BAD_OUT_PORT
    }
}

/// `kytos.flow_manager.flows.install` / `.delete` (§6): the same
/// `{dpid, flow_dict}` shape as the admin API's body, arriving over the
/// inbound event bus instead of HTTP (§4.F item 6).
#[derive(Debug, Clone)]
pub enum FlowRequestEvent {
    Install { dpid: Dpid, flow_dict: FlowsRequest },
    Delete { dpid: Dpid, flow_dict: FlowsRequest },
}
