//! OpenFlow 1.0 FlowMod/FlowStats translation (§4.B).

use std::net::Ipv4Addr;

use crate::model::{Action, FlowDescription, MatchFields, PortRef};

use super::{mac_from_str, mac_to_string, FlowEntry, FlowSerializer, OfVersion};

/// Reserved port meaning "send to the controller" in OpenFlow 1.0.
pub const OFPP_CONTROLLER: u16 = 0xfffd;

const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

/// The OF1.0 match fields recognized by this serializer (§4.B).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchV10 {
    pub wildcards: u32,
    pub in_port: Option<u16>,
    pub dl_src: Option<[u8; 6]>,
    pub dl_dst: Option<[u8; 6]>,
    pub dl_type: Option<u16>,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub nw_proto: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRef10 {
    Number(u16),
    Controller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action10 {
    Output(PortRef10),
    SetVlanVid(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowEntry10 {
    pub table_id: u8,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub match_fields: MatchV10,
    pub actions: Vec<Action10>,
}

impl Default for FlowEntry10 {
    fn default() -> Self {
        Self {
            table_id: 0,
            priority: OFP_DEFAULT_PRIORITY,
            idle_timeout: 0,
            hard_timeout: 0,
            cookie: 0,
            match_fields: MatchV10::default(),
            actions: Vec::new(),
        }
    }
}

pub struct SerializerV10;

impl FlowSerializer for SerializerV10 {
    fn version(&self) -> OfVersion {
        OfVersion::V10
    }

    fn from_dict(&self, d: &FlowDescription) -> FlowEntry {
        let mut entry = FlowEntry10::default();

        if let Some(v) = d.table_id {
            entry.table_id = v;
        }
        if let Some(v) = d.priority {
            entry.priority = v;
        }
        if let Some(v) = d.idle_timeout {
            entry.idle_timeout = v;
        }
        if let Some(v) = d.hard_timeout {
            entry.hard_timeout = v;
        }
        if let Some(v) = d.cookie {
            entry.cookie = v;
        }

        let m = &d.match_fields;
        entry.match_fields.wildcards = m.get_u64("wildcards").unwrap_or(0) as u32;
        entry.match_fields.in_port = m.get_u64("in_port").map(|v| v as u16);
        entry.match_fields.dl_src = m.get_str("dl_src").and_then(|s| mac_from_str(s).ok());
        entry.match_fields.dl_dst = m.get_str("dl_dst").and_then(|s| mac_from_str(s).ok());
        entry.match_fields.dl_type = m.get_u64("dl_type").map(|v| v as u16);
        entry.match_fields.dl_vlan = m.get_u64("dl_vlan").map(|v| v as u16);
        entry.match_fields.dl_vlan_pcp = m.get_u64("dl_vlan_pcp").map(|v| v as u8);
        entry.match_fields.nw_src = m.get_str("nw_src").and_then(|s| s.parse().ok());
        entry.match_fields.nw_dst = m.get_str("nw_dst").and_then(|s| s.parse().ok());
        entry.match_fields.nw_proto = m.get_u64("nw_proto").map(|v| v as u8);

        for action in &d.actions {
            let translated = match *action {
                Action::Output { port } => Some(Action10::Output(match port {
                    PortRef::Number(n) => PortRef10::Number(n as u16),
                    PortRef::Controller => PortRef10::Controller,
                })),
                Action::SetVlan { vlan_id } => Some(Action10::SetVlanVid(vlan_id)),
                // push_vlan/pop_vlan have no OF1.0 equivalent: dropped silently.
                Action::PushVlan { .. } | Action::PopVlan => None,
            };
            if let Some(a) = translated {
                entry.actions.push(a);
            }
        }

        FlowEntry::V10(entry)
    }

    fn to_dict(&self, entry: &FlowEntry) -> FlowDescription {
        let FlowEntry::V10(fs) = entry else {
            panic!("to_dict called on a v10 serializer with a non-v10 entry");
        };

        let mut d = FlowDescription {
            table_id: Some(fs.table_id),
            priority: Some(fs.priority),
            idle_timeout: Some(fs.idle_timeout),
            hard_timeout: Some(fs.hard_timeout),
            cookie: Some(fs.cookie),
            ..Default::default()
        };

        let mut m = MatchFields::default();
        if let Some(v) = fs.match_fields.in_port {
            m.insert("in_port", v);
        }
        if let Some(v) = fs.match_fields.dl_src {
            m.insert("dl_src", mac_to_string(v));
        }
        if let Some(v) = fs.match_fields.dl_dst {
            m.insert("dl_dst", mac_to_string(v));
        }
        if let Some(v) = fs.match_fields.dl_type {
            m.insert("dl_type", v);
        }
        if let Some(v) = fs.match_fields.dl_vlan {
            m.insert("dl_vlan", v);
        }
        if let Some(v) = fs.match_fields.dl_vlan_pcp {
            m.insert("dl_vlan_pcp", v);
        }
        if let Some(v) = fs.match_fields.nw_src {
            m.insert("nw_src", v.to_string());
        }
        if let Some(v) = fs.match_fields.nw_dst {
            m.insert("nw_dst", v.to_string());
        }
        if let Some(v) = fs.match_fields.nw_proto {
            m.insert("nw_proto", v);
        }
        d.match_fields = m;

        d.actions = fs
            .actions
            .iter()
            .map(|a| match a {
                Action10::Output(PortRef10::Number(n)) => Action::Output {
                    port: PortRef::Number(u32::from(*n)),
                },
                Action10::Output(PortRef10::Controller) => Action::Output {
                    port: PortRef::Controller,
                },
                Action10::SetVlanVid(v) => Action::SetVlan { vlan_id: *v },
            })
            .collect();

        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortRef;
    use serde_json::json;

    #[test]
    fn from_dict_translates_output_controller_literal() {
        let d: FlowDescription = serde_json::from_value(json!({
            "match": {"in_port": 1},
            "actions": [{"action_type": "output", "port": "controller"}],
        }))
        .unwrap();

        let FlowEntry::V10(entry) = SerializerV10.from_dict(&d) else {
            panic!("expected v10");
        };
        assert_eq!(
            entry.actions,
            vec![Action10::Output(PortRef10::Controller)]
        );
    }

    #[test]
    fn push_pop_vlan_are_dropped() {
        let d: FlowDescription = serde_json::from_value(json!({
            "actions": [
                {"action_type": "push_vlan", "tag_type": "s"},
                {"action_type": "output", "port": 3},
                {"action_type": "pop_vlan"},
            ],
        }))
        .unwrap();

        let FlowEntry::V10(entry) = SerializerV10.from_dict(&d) else {
            panic!("expected v10");
        };
        assert_eq!(entry.actions, vec![Action10::Output(PortRef10::Number(3))]);
    }

    #[test]
    fn round_trips_through_to_dict() {
        let d: FlowDescription = serde_json::from_value(json!({
            "table_id": 0,
            "priority": 100,
            "idle_timeout": 30,
            "hard_timeout": 0,
            "cookie": 42,
            "match": {"in_port": 1, "dl_src": "aa:bb:cc:dd:ee:ff", "nw_src": "10.0.0.1"},
            "actions": [{"action_type": "output", "port": 2}],
        }))
        .unwrap();

        let entry = SerializerV10.from_dict(&d);
        let back = SerializerV10.to_dict(&entry);

        assert_eq!(back.priority, d.priority);
        assert_eq!(back.cookie, d.cookie);
        assert_eq!(
            back.match_fields.get_str("dl_src"),
            d.match_fields.get_str("dl_src")
        );
        assert_eq!(back.actions, d.actions);
    }
}
