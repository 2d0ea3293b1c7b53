//! OpenFlow 1.3 FlowMod/FlowStats translation (§4.C): match fields become
//! OXM TLVs, actions become an `InstructionApplyAction`.

use crate::model::{Action, FlowDescription, MatchFields, PortRef, TagType};

use super::oxm::{field, OxmTlv};
use super::{mac_from_str, mac_to_string, FlowEntry, FlowSerializer, OfVersion};

/// Reserved port meaning "send to the controller" in OpenFlow 1.3.
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;

const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

const ETHERTYPE_SERVICE_VLAN: u16 = 0x88a8;
const ETHERTYPE_CUSTOMER_VLAN: u16 = 0x8100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRef13 {
    Number(u32),
    Controller,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action13 {
    Output(PortRef13),
    SetField(OxmTlv),
    Push { ethertype: u16 },
    PopVlan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction13 {
    ApplyActions(Vec<Action13>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowEntry13 {
    pub table_id: u8,
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub oxm_match_fields: Vec<OxmTlv>,
    pub instructions: Vec<Instruction13>,
}

impl Default for FlowEntry13 {
    fn default() -> Self {
        Self {
            table_id: 0,
            priority: OFP_DEFAULT_PRIORITY,
            idle_timeout: 0,
            hard_timeout: 0,
            cookie: 0,
            cookie_mask: 0,
            oxm_match_fields: Vec::new(),
            instructions: vec![Instruction13::ApplyActions(Vec::new())],
        }
    }
}

impl FlowEntry13 {
    fn actions_mut(&mut self) -> &mut Vec<Action13> {
        if self.instructions.is_empty() {
            self.instructions.push(Instruction13::ApplyActions(Vec::new()));
        }
        match self.instructions.first_mut() {
            Some(Instruction13::ApplyActions(actions)) => actions,
            None => unreachable!(),
        }
    }

    /// Concatenates the action lists of every `ApplyActions` instruction, in
    /// order, per §4.C's `to_dict`.
    fn all_actions(&self) -> Vec<&Action13> {
        self.instructions
            .iter()
            .flat_map(|i| match i {
                Instruction13::ApplyActions(actions) => actions.iter(),
            })
            .collect()
    }
}

pub struct SerializerV13;

impl FlowSerializer for SerializerV13 {
    fn version(&self) -> OfVersion {
        OfVersion::V13
    }

    fn from_dict(&self, d: &FlowDescription) -> FlowEntry {
        let mut entry = FlowEntry13::default();

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
        if let Some(v) = d.cookie_mask {
            entry.cookie_mask = v;
        }

        entry.oxm_match_fields = encode_match(&d.match_fields);

        for action in &d.actions {
            let translated = match *action {
                Action::Output { port } => Action13::Output(match port {
                    PortRef::Number(n) => PortRef13::Number(n),
                    PortRef::Controller => PortRef13::Controller,
                }),
                Action::SetVlan { vlan_id } => Action13::SetField(OxmTlv::vlan_vid(vlan_id)),
                Action::PushVlan { tag_type } => Action13::Push {
                    ethertype: match tag_type {
                        TagType::S => ETHERTYPE_SERVICE_VLAN,
                        TagType::C => ETHERTYPE_CUSTOMER_VLAN,
                    },
                },
                Action::PopVlan => Action13::PopVlan,
            };
            entry.actions_mut().push(translated);
        }

        FlowEntry::V13(entry)
    }

    fn to_dict(&self, entry: &FlowEntry) -> FlowDescription {
        let FlowEntry::V13(fs) = entry else {
            panic!("to_dict called on a v13 serializer with a non-v13 entry");
        };

        let mut d = FlowDescription {
            table_id: Some(fs.table_id),
            priority: Some(fs.priority),
            idle_timeout: Some(fs.idle_timeout),
            hard_timeout: Some(fs.hard_timeout),
            cookie: Some(fs.cookie),
            ..Default::default()
        };
        if fs.cookie_mask != 0 {
            d.cookie_mask = Some(fs.cookie_mask);
        }

        d.match_fields = decode_match(&fs.oxm_match_fields);

        d.actions = fs
            .all_actions()
            .into_iter()
            .map(|a| match a {
                Action13::Output(PortRef13::Number(n)) => Action::Output {
                    port: PortRef::Number(*n),
                },
                Action13::Output(PortRef13::Controller) => Action::Output {
                    port: PortRef::Controller,
                },
                Action13::SetField(tlv) if tlv.field == field::VLAN_VID => Action::SetVlan {
                    vlan_id: tlv.as_vlan_vid().unwrap_or(0),
                },
                Action13::SetField(_) => Action::SetVlan { vlan_id: 0 },
                Action13::Push { ethertype } => Action::PushVlan {
                    tag_type: if *ethertype == ETHERTYPE_SERVICE_VLAN {
                        TagType::S
                    } else {
                        TagType::C
                    },
                },
                Action13::PopVlan => Action::PopVlan,
            })
            .collect();

        d
    }
}

fn encode_match(m: &MatchFields) -> Vec<OxmTlv> {
    let mut tlvs = Vec::new();

    if let Some(v) = m.get_u64("in_port") {
        tlvs.push(OxmTlv::be32(field::IN_PORT, v as u32));
    }
    if let Some(v) = m.get_u64("dl_vlan_pcp") {
        tlvs.push(OxmTlv::u8(field::VLAN_PCP, v as u8));
    }
    if let Some(v) = m.get_u64("dl_vlan") {
        tlvs.push(OxmTlv::vlan_vid(v as u16));
    }
    if let Some(s) = m.get_str("dl_src") {
        if let Ok(mac) = mac_from_str(s) {
            tlvs.push(OxmTlv::mac(field::ETH_SRC, mac));
        }
    }
    if let Some(s) = m.get_str("dl_dst") {
        if let Ok(mac) = mac_from_str(s) {
            tlvs.push(OxmTlv::mac(field::ETH_DST, mac));
        }
    }
    if let Some(v) = m.get_u64("dl_type") {
        tlvs.push(OxmTlv::be16(field::ETH_TYPE, v as u16));
    }
    if let Some(s) = m.get_str("nw_src") {
        if let Ok(ip) = s.parse() {
            tlvs.push(OxmTlv::ipv4(field::IPV4_SRC, ip));
        }
    }
    if let Some(s) = m.get_str("nw_dst") {
        if let Ok(ip) = s.parse() {
            tlvs.push(OxmTlv::ipv4(field::IPV4_DST, ip));
        }
    }
    if let Some(v) = m.get_u64("nw_proto") {
        tlvs.push(OxmTlv::u8(field::IP_PROTO, v as u8));
    }
    if let Some(v) = m.get_u64("tp_src") {
        tlvs.push(OxmTlv::be16(field::TCP_SRC, v as u16));
    }
    if let Some(v) = m.get_u64("tp_dst") {
        tlvs.push(OxmTlv::be16(field::TCP_DST, v as u16));
    }

    tlvs
}

fn decode_match(tlvs: &[OxmTlv]) -> MatchFields {
    let mut m = MatchFields::default();

    for tlv in tlvs {
        match tlv.field {
            field::IN_PORT => {
                if let Some(v) = tlv.as_be32() {
                    m.insert("in_port", v);
                }
            }
            field::VLAN_PCP => {
                if let Some(v) = tlv.as_u8() {
                    m.insert("dl_vlan_pcp", v);
                }
            }
            field::VLAN_VID => {
                if let Some(v) = tlv.as_vlan_vid() {
                    m.insert("dl_vlan", v);
                }
            }
            field::ETH_SRC => {
                if let Some(mac) = tlv.as_mac() {
                    m.insert("dl_src", mac_to_string(mac));
                }
            }
            field::ETH_DST => {
                if let Some(mac) = tlv.as_mac() {
                    m.insert("dl_dst", mac_to_string(mac));
                }
            }
            field::ETH_TYPE => {
                if let Some(v) = tlv.as_be16() {
                    m.insert("dl_type", v);
                }
            }
            field::IPV4_SRC => {
                if let Some(ip) = tlv.as_ipv4() {
                    m.insert("nw_src", ip.to_string());
                }
            }
            field::IPV4_DST => {
                if let Some(ip) = tlv.as_ipv4() {
                    m.insert("nw_dst", ip.to_string());
                }
            }
            field::IP_PROTO => {
                if let Some(v) = tlv.as_u8() {
                    m.insert("nw_proto", v);
                }
            }
            field::TCP_SRC => {
                if let Some(v) = tlv.as_be16() {
                    m.insert("tp_src", v);
                }
            }
            field::TCP_DST => {
                if let Some(v) = tlv.as_be16() {
                    m.insert("tp_dst", v);
                }
            }
            _ => {}
        }
    }

    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortRef;
    use serde_json::json;

    #[test]
    fn vlan_oxm_strips_present_bit_on_round_trip() {
        for vid in [0u16, 1, 100, 4094] {
            let tlv = OxmTlv::vlan_vid(vid);
            assert_eq!(tlv.as_vlan_vid(), Some(vid));
        }
    }

    #[test]
    fn output_controller_maps_to_reserved_port() {
        let d: FlowDescription = serde_json::from_value(json!({
            "actions": [{"action_type": "output", "port": "controller"}],
        }))
        .unwrap();

        let FlowEntry::V13(entry) = SerializerV13.from_dict(&d) else {
            panic!("expected v13");
        };
        assert_eq!(
            entry.all_actions(),
            vec![&Action13::Output(PortRef13::Controller)]
        );

        let back = SerializerV13.to_dict(&FlowEntry::V13(entry));
        assert_eq!(
            back.actions,
            vec![Action::Output {
                port: PortRef::Controller
            }]
        );
    }

    #[test]
    fn push_vlan_ethertype_depends_on_tag_type() {
        let d: FlowDescription = serde_json::from_value(json!({
            "actions": [{"action_type": "push_vlan", "tag_type": "s"}],
        }))
        .unwrap();

        let FlowEntry::V13(entry) = SerializerV13.from_dict(&d) else {
            panic!("expected v13");
        };
        assert_eq!(
            entry.all_actions(),
            vec![&Action13::Push {
                ethertype: ETHERTYPE_SERVICE_VLAN
            }]
        );
    }

    #[test]
    fn round_trips_match_and_actions() {
        let d: FlowDescription = serde_json::from_value(json!({
            "priority": 4000,
            "match": {"in_port": 1, "dl_vlan": 10, "nw_src": "192.168.1.1"},
            "actions": [{"action_type": "output", "port": 2}],
        }))
        .unwrap();

        let entry = SerializerV13.from_dict(&d);
        let back = SerializerV13.to_dict(&entry);

        assert_eq!(back.match_fields.get_u64("in_port"), Some(1));
        assert_eq!(back.match_fields.get_u64("dl_vlan"), Some(10));
        assert_eq!(back.match_fields.get_str("nw_src"), Some("192.168.1.1"));
        assert_eq!(back.actions, d.actions);
    }
}
