//! The flow controller (§4.F): translates admin requests and switch events
//! into FlowMods, dispatches them over the outbound event bus, persists the
//! authoritative intent, resends it on handshake, and reconciles it against
//! a switch's live flow table.
//!
//! Mutations to the in-flight record and the resent-set are serialized by
//! one coarse `tokio::sync::Mutex` (§5), held across the full
//! deep-copy-mutate-persist sequence of an intent merge so two concurrent
//! dispatches for the same DPID can never both observe the pre-merge state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{matches_any, Settings};
use crate::dpid::Dpid;
use crate::error::FlowManagerError;
use crate::events::{AppEvent, EventBus, FlowRequestEvent, OpenFlowErrorEvent, OutboundFlowMod};
use crate::model::{Action, FlowCommand, FlowDescription, FlowsRequest, PortRef};
use crate::ofp::{factory, FlowEntry, OfVersion};
use crate::store::{DpidIntent, FlowListEntry, IntentStore};
use crate::switch::{SwitchHandle, SwitchRegistry};

/// One entry of the in-flight record (§3): the flow and command a FlowMod
/// with a given xid was derived from, kept around so a later `ofpt_error`
/// can be correlated back to what we sent.
#[derive(Debug, Clone)]
struct InFlightEntry {
    flow: FlowDescription,
    command: FlowCommand,
}

/// Ordered, bounded `xid → (flow, command)` mapping with FIFO eviction
/// (§3, §9): a lookup index plus the insertion order it evicts from.
struct InFlightRecord {
    order: VecDeque<u32>,
    entries: HashMap<u32, InFlightEntry>,
    capacity: usize,
}

impl InFlightRecord {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            entries: HashMap::new(),
            capacity,
        }
    }

    fn insert(&mut self, xid: u32, entry: InFlightEntry) {
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(xid);
        self.entries.insert(xid, entry);
    }

    fn get(&self, xid: u32) -> Option<InFlightEntry> {
        self.entries.get(&xid).cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Mutex-protected fields (§5): the in-flight record, and the set of DPIDs
/// already replayed since process start.
struct ControllerState {
    flow_mods_sent: InFlightRecord,
    resent_flows: HashSet<Dpid>,
}

/// The orchestrator (§4.F). One instance per process, shared behind an
/// `Arc` between the admin API facade and whatever delivers switch events.
pub struct FlowController {
    switches: Arc<dyn SwitchRegistry>,
    bus: Arc<dyn EventBus>,
    store: IntentStore,
    settings: Settings,
    next_xid: AtomicU32,
    state: Mutex<ControllerState>,
}

impl FlowController {
    pub fn new(switches: Arc<dyn SwitchRegistry>, bus: Arc<dyn EventBus>, store: IntentStore, settings: Settings) -> Self {
        let capacity = settings.flows_dict_max_size;
        Self {
            switches,
            bus,
            store,
            settings,
            next_xid: AtomicU32::new(1),
            state: Mutex::new(ControllerState {
                flow_mods_sent: InFlightRecord::new(capacity),
                resent_flows: HashSet::new(),
            }),
        }
    }

    /// `list(dpid?)` (§4.F item 1): flows drawn straight from `switch.flows`
    /// via the version-appropriate serializer's `to_dict`.
    pub async fn list(&self, dpid: Option<Dpid>) -> Result<HashMap<Dpid, Vec<FlowDescription>>, FlowManagerError> {
        let targets = self.resolve_targets(dpid, false)?;

        let mut out = HashMap::new();
        for handle in targets {
            let switch = handle.read().expect("lock poisoned");
            let serializer = factory::serializer_for(switch.version);
            let flows = switch.flows.iter().map(|e| serializer.to_dict(e)).collect();
            out.insert(switch.dpid, flows);
        }
        Ok(out)
    }

    /// `apply(command, flows_doc, dpid?)` (§4.F item 2). `add` against a
    /// single disabled switch is rejected; against the implicit "all
    /// switches" target, disabled switches are simply not in scope.
    pub async fn apply(&self, command: FlowCommand, flows_doc: &FlowsRequest, dpid: Option<Dpid>) -> Result<(), FlowManagerError> {
        if flows_doc.flows.is_empty() {
            return Err(FlowManagerError::BadRequest(
                "flows must be a non-empty sequence".to_string(),
            ));
        }

        let filter_enabled = dpid.is_none() && command == FlowCommand::Add;
        let targets = self.resolve_targets(dpid, filter_enabled)?;

        for handle in targets {
            let (target_dpid, version, enabled) = {
                let switch = handle.read().expect("lock poisoned");
                (switch.dpid, switch.version, switch.enabled)
            };

            if command == FlowCommand::Add && !enabled {
                return Err(FlowManagerError::SwitchDisabled(target_dpid));
            }

            for flow in &flows_doc.flows {
                self.dispatch_and_store(target_dpid, version, flow.clone(), command).await;
            }
        }

        Ok(())
    }

    /// `on_handshake_completed` (§4.F item 3, §8 scenario 4): replays stored
    /// intent for a DPID exactly once per process lifetime.
    pub async fn on_handshake_completed(&self, switch: SwitchHandle) {
        let (dpid, version) = {
            let s = switch.read().expect("lock poisoned");
            (s.dpid, s.version)
        };

        let intent = self.store.cached().await;
        let Some(dpid_intent) = intent.get(&dpid).cloned() else {
            return;
        };
        if dpid_intent.flow_list.is_empty() {
            return;
        }

        {
            let mut state = self.state.lock().await;
            if !state.resent_flows.insert(dpid) {
                return;
            }
        }

        for entry in &dpid_intent.flow_list {
            self.resend_entry(dpid, version, entry.flow.clone(), entry.command).await;
        }
    }

    /// `on_flow_stats` (§4.F item 4): gated by `ENABLE_CONSISTENCY_CHECK`
    /// (§9's resolved open question), runs the storehouse pass then the
    /// switch pass for the reporting switch.
    pub async fn on_flow_stats(&self, switch: SwitchHandle) {
        if !self.settings.enable_consistency_check {
            return;
        }

        let (dpid, version, installed) = {
            let s = switch.read().expect("lock poisoned");
            (s.dpid, s.version, s.flows.clone())
        };
        let serializer = factory::serializer_for(version);
        let intent = self.store.cached().await;
        let dpid_intent = intent.get(&dpid);

        // Storehouse pass: flows the switch has that intent doesn't expect.
        for installed_entry in &installed {
            let cookie = installed_entry.cookie() as i64;
            let table_id = i64::from(installed_entry.table_id());
            if matches_any(&self.settings.cookie_ignored_range, cookie)
                || matches_any(&self.settings.table_id_ignored_range, table_id)
            {
                continue;
            }

            let known = dpid_intent.is_some_and(|di| {
                di.flow_list
                    .iter()
                    .any(|e| serializer.from_dict(&e.flow) == *installed_entry)
            });
            if !known {
                let flow_desc = serializer.to_dict(installed_entry);
                self.dispatch_and_store(dpid, version, flow_desc, FlowCommand::DeleteStrict).await;
            }
        }

        // Switch pass: stored intent that the switch doesn't (or shouldn't) reflect.
        if let Some(dpid_intent) = dpid_intent {
            for entry in &dpid_intent.flow_list {
                let present = installed.iter().any(|e| serializer.from_dict(&entry.flow) == *e);
                if !present && entry.command == FlowCommand::Add {
                    self.dispatch_and_store(dpid, version, entry.flow.clone(), FlowCommand::Add).await;
                } else if present && entry.command.is_delete() {
                    self.dispatch_and_store(dpid, version, entry.flow.clone(), FlowCommand::DeleteStrict).await;
                }
            }
        }
    }

    /// `on_openflow_error` (§4.F item 5, §8 scenario 6). A missing xid means
    /// the error doesn't correlate to a FlowMod we originated; ignored.
    pub async fn on_openflow_error(&self, event: OpenFlowErrorEvent) {
        let entry = {
            let state = self.state.lock().await;
            state.flow_mods_sent.get(event.xid)
        };
        let Some(entry) = entry else {
            return;
        };

        if event.is_bad_out_port() {
            if let Some(port) = output_port(&entry.flow) {
                self.switches.set_interface_no_fwd(event.source_dpid, port);
            }
        }

        self.bus.publish_app_event(AppEvent::FlowError {
            dpid: event.source_dpid,
            error_command: entry.command,
            error_type: event.error_type,
            error_code: event.error_code,
        });
    }

    /// `on_event_request` (§4.F item 6): `flows.install`/`flows.delete` from
    /// the inbound event bus, routed onto the same `apply` path as the HTTP
    /// facade.
    pub async fn on_event_request(&self, event: FlowRequestEvent) -> Result<(), FlowManagerError> {
        match event {
            FlowRequestEvent::Install { dpid, flow_dict } => self.apply(FlowCommand::Add, &flow_dict, Some(dpid)).await,
            FlowRequestEvent::Delete { dpid, flow_dict } => self.apply(FlowCommand::Delete, &flow_dict, Some(dpid)).await,
        }
    }

    fn resolve_targets(&self, dpid: Option<Dpid>, filter_enabled: bool) -> Result<Vec<SwitchHandle>, FlowManagerError> {
        match dpid {
            Some(d) => {
                let handle = self.switches.get(d).ok_or(FlowManagerError::NotFound(d))?;
                Ok(vec![handle])
            }
            None => {
                let all = self.switches.all();
                if filter_enabled {
                    Ok(all
                        .into_iter()
                        .filter(|h| h.read().expect("lock poisoned").enabled)
                        .collect())
                } else {
                    Ok(all)
                }
            }
        }
    }

    /// The full per-flow dispatch procedure (§4.F): build, emit, record,
    /// notify, then merge the flow into stored intent and persist.
    async fn dispatch_and_store(&self, dpid: Dpid, version: OfVersion, flow: FlowDescription, command: FlowCommand) {
        self.emit(dpid, version, flow.clone(), command).await;
        self.merge_and_persist(dpid, version, flow, command).await;
    }

    /// Steps 1-5 of the dispatch procedure without the intent merge (step
    /// 6): used for handshake replay, where the flow is already recorded in
    /// stored intent verbatim and re-merging it would be a pure no-op.
    async fn resend_entry(&self, dpid: Dpid, version: OfVersion, flow: FlowDescription, command: FlowCommand) {
        self.emit(dpid, version, flow, command).await;
    }

    async fn emit(&self, dpid: Dpid, version: OfVersion, flow: FlowDescription, command: FlowCommand) {
        let serializer = factory::serializer_for(version);
        let flow_mod = match command {
            FlowCommand::Add => serializer.as_add_flow_mod(&flow),
            FlowCommand::Delete => serializer.as_delete_flow_mod(&flow),
            FlowCommand::DeleteStrict => serializer.as_strict_delete_flow_mod(&flow),
        };

        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.bus.send_flow_mod(OutboundFlowMod {
            destination: dpid,
            xid,
            message: flow_mod,
        });

        {
            let mut state = self.state.lock().await;
            state.flow_mods_sent.insert(
                xid,
                InFlightEntry {
                    flow: flow.clone(),
                    command,
                },
            );
        }

        let app_event = if command == FlowCommand::Add {
            AppEvent::FlowAdded { dpid, flow }
        } else {
            AppEvent::FlowRemoved { dpid, flow }
        };
        self.bus.publish_app_event(app_event);
    }

    /// `store_changed_flows` (§4.F): operates on a clone of the cached
    /// intent map, under the coarse mutex (§5), and writes the result back
    /// through the persistence store.
    async fn merge_and_persist(&self, dpid: Dpid, version: OfVersion, flow: FlowDescription, command: FlowCommand) {
        let _guard = self.state.lock().await;
        let mut intent = self.store.cached().await;

        match intent.get_mut(&dpid) {
            None => {
                intent.insert(
                    dpid,
                    DpidIntent {
                        flow_list: vec![FlowListEntry { command, flow }],
                    },
                );
            }
            Some(dpid_intent) => {
                if command == FlowCommand::Delete {
                    dpid_intent
                        .flow_list
                        .retain(|e| !matches!(crate::matching::match_flow(&flow, version.wire(), &e.flow), Ok(Some(_))));
                } else {
                    let serializer = factory::serializer_for(version);
                    let incoming_entry = serializer.from_dict(&flow);
                    let existing_idx = dpid_intent
                        .flow_list
                        .iter()
                        .position(|e| serializer.from_dict(&e.flow) == incoming_entry);

                    if let Some(idx) = existing_idx {
                        if dpid_intent.flow_list[idx].command == command {
                            // Identical (command, flow) pair already stored: no-op.
                            return;
                        }
                        dpid_intent.flow_list.remove(idx);
                    }
                    dpid_intent.flow_list.push(FlowListEntry { command, flow });
                }
            }
        }

        self.store.save_flow(intent).await;
    }
}

fn output_port(flow: &FlowDescription) -> Option<u32> {
    flow.actions.iter().find_map(|a| match a {
        Action::Output { port: PortRef::Number(n) } => Some(*n),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::events::ChannelEventBus;
    use crate::ofp::OfVersion;
    use crate::store::{FileStorehouse, IntentStore};
    use crate::switch::{InMemorySwitchRegistry, SwitchState};
    use serde_json::json;
    use std::time::Duration;

    fn flow(json: serde_json::Value) -> FlowDescription {
        serde_json::from_value(json).unwrap()
    }

    async fn controller_with(registry: Arc<InMemorySwitchRegistry>) -> (Arc<FlowController>, tokio::sync::mpsc::UnboundedReceiver<OutboundFlowMod>, tokio::sync::mpsc::UnboundedReceiver<AppEvent>) {
        let (bus, flow_mod_rx, app_event_rx) = ChannelEventBus::new();
        let dir = std::env::temp_dir().join(format!("flow-manager-controller-test-{}", rand::random::<u64>()));
        let backend = Box::new(FileStorehouse::new(&dir));
        let store = IntentStore::connect(backend, Duration::from_millis(1), 3).await.unwrap();
        let controller = FlowController::new(registry, Arc::new(bus), store, Settings::default());
        (Arc::new(controller), flow_mod_rx, app_event_rx)
    }

    #[tokio::test]
    async fn apply_add_dispatches_one_flow_mod_and_stores_intent() {
        let registry = Arc::new(InMemorySwitchRegistry::new());
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        registry.register(SwitchState::new(dpid, OfVersion::V13));

        let (controller, mut flow_mod_rx, mut app_event_rx) = controller_with(registry).await;

        let request = FlowsRequest {
            flows: vec![flow(json!({
                "priority": 4000,
                "match": {"in_port": 1},
                "actions": [{"action_type": "output", "port": 2}],
            }))],
        };
        controller.apply(FlowCommand::Add, &request, Some(dpid)).await.unwrap();

        let sent = flow_mod_rx.try_recv().unwrap();
        assert_eq!(sent.destination, dpid);
        assert!(flow_mod_rx.try_recv().is_err());

        let event = app_event_rx.try_recv().unwrap();
        assert!(matches!(event, AppEvent::FlowAdded { dpid: d, .. } if d == dpid));

        let cached = controller.store.cached().await;
        assert_eq!(cached[&dpid].flow_list.len(), 1);
        assert_eq!(cached[&dpid].flow_list[0].command, FlowCommand::Add);
    }

    #[tokio::test]
    async fn add_to_disabled_switch_is_rejected() {
        let registry = Arc::new(InMemorySwitchRegistry::new());
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        let mut state = SwitchState::new(dpid, OfVersion::V13);
        state.enabled = false;
        registry.register(state);

        let (controller, _rx, _app_rx) = controller_with(registry).await;
        let request = FlowsRequest {
            flows: vec![flow(json!({"priority": 1}))],
        };

        let err = controller.apply(FlowCommand::Add, &request, Some(dpid)).await.unwrap_err();
        assert!(matches!(err, FlowManagerError::SwitchDisabled(d) if d == dpid));
    }

    #[tokio::test]
    async fn handshake_replay_happens_exactly_once() {
        let registry = Arc::new(InMemorySwitchRegistry::new());
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        let handle = registry.register(SwitchState::new(dpid, OfVersion::V13));

        let (controller, mut flow_mod_rx, _app_rx) = controller_with(registry).await;

        let request = FlowsRequest {
            flows: vec![
                flow(json!({"priority": 10})),
                flow(json!({"priority": 20})),
            ],
        };
        controller.apply(FlowCommand::Add, &request, Some(dpid)).await.unwrap();
        // Drain the two FlowMods from the initial apply.
        flow_mod_rx.try_recv().unwrap();
        flow_mod_rx.try_recv().unwrap();
        assert!(flow_mod_rx.try_recv().is_err());

        controller.on_handshake_completed(handle.clone()).await;
        assert!(flow_mod_rx.try_recv().is_ok());
        assert!(flow_mod_rx.try_recv().is_ok());
        assert!(flow_mod_rx.try_recv().is_err());

        controller.on_handshake_completed(handle).await;
        assert!(flow_mod_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_by_non_strict_match_removes_only_matching_entry() {
        let registry = Arc::new(InMemorySwitchRegistry::new());
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        registry.register(SwitchState::new(dpid, OfVersion::V13));
        let (controller, _rx, _app_rx) = controller_with(registry).await;

        let add_request = FlowsRequest {
            flows: vec![
                flow(json!({"cookie": 0x55u64})),
                flow(json!({"cookie": 0x44u64})),
            ],
        };
        controller.apply(FlowCommand::Add, &add_request, Some(dpid)).await.unwrap();

        let delete_request = FlowsRequest {
            flows: vec![flow(json!({"cookie": 0x55u64, "cookie_mask": u64::MAX}))],
        };
        controller.apply(FlowCommand::Delete, &delete_request, Some(dpid)).await.unwrap();

        let cached = controller.store.cached().await;
        let remaining = &cached[&dpid].flow_list;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].flow.cookie, Some(0x44));
    }

    #[tokio::test]
    async fn bad_out_port_error_marks_interface_no_fwd_and_publishes_error_event() {
        let registry = Arc::new(InMemorySwitchRegistry::new());
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        registry.register(SwitchState::new(dpid, OfVersion::V13));
        let (controller, mut flow_mod_rx, mut app_event_rx) = controller_with(registry.clone()).await;

        let request = FlowsRequest {
            flows: vec![flow(json!({
                "actions": [{"action_type": "output", "port": 9}],
            }))],
        };
        controller.apply(FlowCommand::Add, &request, Some(dpid)).await.unwrap();
        let sent = flow_mod_rx.try_recv().unwrap();
        app_event_rx.try_recv().unwrap(); // flow.added, not under test here

        controller
            .on_openflow_error(OpenFlowErrorEvent {
                xid: sent.xid,
                source_dpid: dpid,
                error_type: crate::events::OFPET_BAD_ACTION,
                error_code: crate::events::OFPBAC_BAD_OUT_PORT,
            })
            .await;

        let handle = registry.get(dpid).unwrap();
        let switch = handle.read().unwrap();
        assert_eq!(switch.interfaces[&9].config & crate::switch::OFPPC_NO_FWD, crate::switch::OFPPC_NO_FWD);
        drop(switch);

        let event = app_event_rx.try_recv().unwrap();
        assert!(matches!(event, AppEvent::FlowError { error_command: FlowCommand::Add, .. }));
    }

    #[tokio::test]
    async fn in_flight_record_evicts_oldest_at_capacity() {
        let registry = Arc::new(InMemorySwitchRegistry::new());
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        registry.register(SwitchState::new(dpid, OfVersion::V13));

        let (bus, mut flow_mod_rx, _app_event_rx) = ChannelEventBus::new();
        let dir = std::env::temp_dir().join(format!("flow-manager-controller-test-{}", rand::random::<u64>()));
        let backend = Box::new(FileStorehouse::new(&dir));
        let store = IntentStore::connect(backend, Duration::from_millis(1), 3).await.unwrap();
        let mut settings = Settings::default();
        settings.flows_dict_max_size = 2;
        let controller = FlowController::new(registry, Arc::new(bus), store, settings);

        for i in 0..3u16 {
            let request = FlowsRequest {
                flows: vec![flow(json!({"priority": i}))],
            };
            controller.apply(FlowCommand::Add, &request, Some(dpid)).await.unwrap();
        }
        for _ in 0..3 {
            flow_mod_rx.try_recv().unwrap();
        }

        let state = controller.state.lock().await;
        assert_eq!(state.flow_mods_sent.len(), 2);
    }

    #[tokio::test]
    async fn consistency_pass_deletes_unexpected_switch_flow() {
        let registry = Arc::new(InMemorySwitchRegistry::new());
        let dpid: Dpid = "00:00:00:00:00:00:00:01".parse().unwrap();
        let mut state = SwitchState::new(dpid, OfVersion::V13);
        let serializer = factory::serializer_for(OfVersion::V13);
        state.flows.push(serializer.from_dict(&flow(json!({"priority": 55}))));
        let handle = registry.register(state);

        let (bus, mut flow_mod_rx, _app_event_rx) = ChannelEventBus::new();
        let dir = std::env::temp_dir().join(format!("flow-manager-controller-test-{}", rand::random::<u64>()));
        let backend = Box::new(FileStorehouse::new(&dir));
        let store = IntentStore::connect(backend, Duration::from_millis(1), 3).await.unwrap();
        let mut settings = Settings::default();
        settings.enable_consistency_check = true;
        let controller = FlowController::new(registry, Arc::new(bus), store, settings);

        controller.on_flow_stats(handle).await;

        let sent = flow_mod_rx.try_recv().unwrap();
        assert_eq!(sent.destination, dpid);
        assert!(matches!(sent.message.command, FlowCommand::DeleteStrict));
    }
}
