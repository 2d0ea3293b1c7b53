//! Switch state as this subsystem reads it (§3, §5). The controller
//! framework that owns switches, negotiates their OpenFlow version and
//! maintains their live flow table is an external collaborator (§1); this
//! module defines the read-only seam (`SwitchRegistry`) the orchestrator
//! needs, plus an in-memory adapter so the crate is runnable standalone.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::dpid::Dpid;
use crate::ofp::{FlowEntry, OfVersion};

/// `ofp_port_config` bits this subsystem ever sets (§8 scenario 6).
pub const OFPPC_NO_FWD: u32 = 1 << 5;

#[derive(Debug, Clone, Default)]
pub struct Interface {
    pub port_no: u32,
    pub config: u32,
}

impl Interface {
    pub fn new(port_no: u32) -> Self {
        Self { port_no, config: 0 }
    }

    pub fn set_no_fwd(&mut self) {
        self.config |= OFPPC_NO_FWD;
    }
}

/// Routing handle for the outbound event bus; stands in for the real
/// connection object the wire dispatcher would use (§1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub dpid: Dpid,
}

/// A switch as the orchestrator observes it: negotiated version, enabled
/// flag, its live flow table (as last reported via `flow_stats`) and its
/// interfaces.
#[derive(Debug, Clone)]
pub struct SwitchState {
    pub dpid: Dpid,
    pub version: OfVersion,
    pub enabled: bool,
    pub connection: Connection,
    pub flows: Vec<FlowEntry>,
    pub interfaces: HashMap<u32, Interface>,
}

impl SwitchState {
    pub fn new(dpid: Dpid, version: OfVersion) -> Self {
        Self {
            dpid,
            version,
            enabled: true,
            connection: Connection { dpid },
            flows: Vec::new(),
            interfaces: HashMap::new(),
        }
    }
}

pub type SwitchHandle = Arc<RwLock<SwitchState>>;

/// Read-only (from this subsystem's perspective) view onto the switch
/// population the controller framework owns (§3: "Switches are owned by
/// the controller framework; this subsystem only reads them").
pub trait SwitchRegistry: Send + Sync {
    fn get(&self, dpid: Dpid) -> Option<SwitchHandle>;
    fn all(&self) -> Vec<SwitchHandle>;

    /// The one mutation this subsystem performs on switch state directly:
    /// marking an interface `OFPPC_NO_FWD` after a bad-out-port error (§4.F
    /// item 5, §8 scenario 6).
    fn set_interface_no_fwd(&self, dpid: Dpid, port_no: u32);
}

/// Default in-memory adapter. A real deployment wires the orchestrator to
/// whatever registry the controller framework actually exposes; this one
/// exists so the crate builds and tests run without that framework.
#[derive(Debug, Default)]
pub struct InMemorySwitchRegistry {
    switches: RwLock<HashMap<Dpid, SwitchHandle>>,
}

impl InMemorySwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, state: SwitchState) -> SwitchHandle {
        let dpid = state.dpid;
        let handle: SwitchHandle = Arc::new(RwLock::new(state));
        self.switches.write().expect("lock poisoned").insert(dpid, handle.clone());
        handle
    }
}

impl SwitchRegistry for InMemorySwitchRegistry {
    fn get(&self, dpid: Dpid) -> Option<SwitchHandle> {
        self.switches.read().expect("lock poisoned").get(&dpid).cloned()
    }

    fn all(&self) -> Vec<SwitchHandle> {
        self.switches.read().expect("lock poisoned").values().cloned().collect()
    }

    fn set_interface_no_fwd(&self, dpid: Dpid, port_no: u32) {
        let switches = self.switches.read().expect("lock poisoned");
        let Some(handle) = switches.get(&dpid) else {
            return;
        };
        let mut switch = handle.write().expect("lock poisoned");
        switch
            .interfaces
            .entry(port_no)
            .or_insert_with(|| Interface::new(port_no))
            .set_no_fwd();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_interface_no_fwd_creates_interface_if_absent() {
        let registry = InMemorySwitchRegistry::new();
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        registry.register(SwitchState::new(dpid, OfVersion::V13));

        registry.set_interface_no_fwd(dpid, 3);

        let handle = registry.get(dpid).unwrap();
        let switch = handle.read().unwrap();
        assert_eq!(switch.interfaces[&3].config & OFPPC_NO_FWD, OFPPC_NO_FWD);
    }
}
