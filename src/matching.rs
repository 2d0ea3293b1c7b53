//! Non-strict flow matching (§4.A): decides whether a stored flow satisfies
//! a requested predicate, used for non-strict deletion and for consistency
//! checks. Never mutates its inputs.

use ip_network::{Ipv4Network, Ipv6Network};

use crate::error::FlowManagerError;
use crate::model::{FlowDescription, MatchFields};
use crate::ofp::OfVersion;

// OpenFlow 1.0 `ofp_flow_wildcards` bits this engine consults (§4.A).
const OFPFW_IN_PORT: u32 = 1 << 0;
const OFPFW_DL_VLAN: u32 = 1 << 1;
const OFPFW_DL_SRC: u32 = 1 << 2;
const OFPFW_DL_DST: u32 = 1 << 3;
const OFPFW_DL_TYPE: u32 = 1 << 4;
const OFPFW_NW_PROTO: u32 = 1 << 5;
const OFPFW_TP_SRC: u32 = 1 << 6;
const OFPFW_TP_DST: u32 = 1 << 7;
const OFPFW_NW_SRC_SHIFT: u32 = 8;
const OFPFW_NW_SRC_BITS: u32 = 6;
const OFPFW_NW_DST_SHIFT: u32 = 14;
const OFPFW_NW_DST_BITS: u32 = 6;
const OFPFW_DL_VLAN_PCP: u32 = 1 << 20;
const OFPFW_NW_TOS: u32 = 1 << 21;

const ETHERTYPE_IPV4: u64 = 0x0800;

/// Returns the stored flow unchanged when it satisfies `requested`'s
/// predicate, `None` ("false" in the spec) otherwise.
pub fn match_flow(
    requested: &FlowDescription,
    version: u8,
    stored: &FlowDescription,
) -> Result<Option<FlowDescription>, FlowManagerError> {
    match OfVersion::try_from(version)? {
        OfVersion::V10 => Ok(match10_no_strict(requested, stored)),
        OfVersion::V13 => Ok(match13_no_strict(requested, stored)),
    }
}

fn match10_no_strict(requested: &FlowDescription, stored: &FlowDescription) -> Option<FlowDescription> {
    let wildcards = requested.match_fields.get_u64("wildcards").unwrap_or(0) as u32;
    let rm = &requested.match_fields;
    let sm = &stored.match_fields;

    for (name, flag) in [
        ("in_port", OFPFW_IN_PORT),
        ("dl_vlan_pcp", OFPFW_DL_VLAN_PCP),
        ("dl_vlan", OFPFW_DL_VLAN),
        ("dl_src", OFPFW_DL_SRC),
        ("dl_dst", OFPFW_DL_DST),
        ("dl_type", OFPFW_DL_TYPE),
    ] {
        if wildcards & flag == 0 && rm.get(name) != sm.get(name) {
            return None;
        }
    }

    // Per the redesign flag in §9: IPv4 sub-matching only applies when the
    // request is itself scoped to IPv4 traffic.
    if rm.get_u64("dl_type") == Some(ETHERTYPE_IPV4) {
        if !ipv4_prefix_matches(wildcards, OFPFW_NW_SRC_SHIFT, rm, sm, "nw_src") {
            return None;
        }
        if !ipv4_prefix_matches(wildcards, OFPFW_NW_DST_SHIFT, rm, sm, "nw_dst") {
            return None;
        }

        for (name, flag) in [
            ("nw_tos", OFPFW_NW_TOS),
            ("nw_proto", OFPFW_NW_PROTO),
            ("tp_src", OFPFW_TP_SRC),
            ("tp_dst", OFPFW_TP_DST),
        ] {
            if wildcards & flag == 0 {
                match (rm.get(name), sm.get(name)) {
                    (Some(r), Some(s)) if r == s => {}
                    _ => return None,
                }
            }
        }
    }

    Some(stored.clone())
}

/// `wildcard_amount` is a prefix-length-to-wildcard count (§4.A): 0 means
/// "match exactly", 32+ means "fully wildcarded".
fn ipv4_prefix_matches(
    wildcards: u32,
    shift: u32,
    rm: &MatchFields,
    sm: &MatchFields,
    name: &str,
) -> bool {
    let bits = (wildcards >> shift) & 0x3f;
    let wildcard_amount = bits.min(32);

    if wildcard_amount >= 32 {
        return true;
    }

    let Some(requested_ip) = rm.get_str(name).and_then(|s| s.parse::<std::net::Ipv4Addr>().ok())
    else {
        return false;
    };
    let Some(stored_ip) = sm.get_str(name).and_then(|s| s.parse::<std::net::Ipv4Addr>().ok())
    else {
        return false;
    };

    let mask = if wildcard_amount == 0 {
        u32::MAX
    } else {
        (u32::MAX << wildcard_amount) & u32::MAX
    };

    (u32::from(stored_ip) & mask) == (u32::from(requested_ip) & mask)
}

fn match13_no_strict(requested: &FlowDescription, stored: &FlowDescription) -> Option<FlowDescription> {
    if let (Some(mask), Some(stored_cookie)) = (requested.cookie_mask, stored.cookie) {
        if mask != 0 {
            let requested_cookie = requested.cookie.unwrap_or(0);
            return if (requested_cookie & mask) == (stored_cookie & mask) {
                Some(stored.clone())
            } else {
                None
            };
        }
    }

    for (name, value) in requested.match_fields.0.iter() {
        let matched = match name.as_str() {
            "ipv4_src" | "ipv4_dst" => cidr_matches::<Ipv4Network>(value, &stored.match_fields, name),
            "ipv6_src" | "ipv6_dst" => cidr_matches::<Ipv6Network>(value, &stored.match_fields, name),
            _ => stored.match_fields.get(name) == Some(value),
        };

        if matched {
            return Some(stored.clone());
        }
    }

    None
}

trait Cidr: Sized {
    type Addr: std::str::FromStr;

    fn new_truncate(addr: Self::Addr, netmask: u8) -> Result<Self, ip_network::IpNetworkError>;
    fn netmask(&self) -> u8;
    fn network_address_eq(&self, other: &Self) -> bool;

    /// Non-strict containment: like Python's `ipaddress.ip_network(value,
    /// strict=False)`, host bits on either side are masked off rather than
    /// rejected (`ip_network`'s plain `FromStr` is strict and would error on
    /// a bare stored host address).
    fn contains_same_network(requested: &str, stored_addr: &str) -> bool {
        let Some((requested_addr, prefix)) = requested.split_once('/') else {
            return false;
        };
        let Ok(requested_addr) = requested_addr.parse::<Self::Addr>() else {
            return false;
        };
        let Ok(prefix) = prefix.parse::<u8>() else {
            return false;
        };
        let Ok(requested_net) = Self::new_truncate(requested_addr, prefix) else {
            return false;
        };

        let Ok(stored_addr) = stored_addr.parse::<Self::Addr>() else {
            return false;
        };
        let Ok(stored_net) = Self::new_truncate(stored_addr, requested_net.netmask()) else {
            return false;
        };

        stored_net.network_address_eq(&requested_net) && stored_net.netmask() == requested_net.netmask()
    }
}

impl Cidr for Ipv4Network {
    type Addr = std::net::Ipv4Addr;

    fn new_truncate(addr: Self::Addr, netmask: u8) -> Result<Self, ip_network::IpNetworkError> {
        Ipv4Network::new_truncate(addr, netmask)
    }

    fn netmask(&self) -> u8 {
        Ipv4Network::netmask(self)
    }

    fn network_address_eq(&self, other: &Self) -> bool {
        self.network_address() == other.network_address()
    }
}

impl Cidr for Ipv6Network {
    type Addr = std::net::Ipv6Addr;

    fn new_truncate(addr: Self::Addr, netmask: u8) -> Result<Self, ip_network::IpNetworkError> {
        Ipv6Network::new_truncate(addr, netmask)
    }

    fn netmask(&self) -> u8 {
        Ipv6Network::netmask(self)
    }

    fn network_address_eq(&self, other: &Self) -> bool {
        self.network_address() == other.network_address()
    }
}

fn cidr_matches<N: Cidr>(requested_value: &serde_json::Value, stored: &MatchFields, name: &str) -> bool {
    let Some(requested_cidr) = requested_value.as_str() else {
        return false;
    };
    let Some(stored_addr) = stored.get_str(name) else {
        return false;
    };

    N::contains_same_network(requested_cidr, stored_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(json: serde_json::Value) -> FlowDescription {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn of13_cookie_mask_law() {
        let requested = flow(json!({"cookie": 0x55u64, "cookie_mask": 0xffu64}));
        let stored_match = flow(json!({"cookie": 0x55u64}));
        let stored_mismatch = flow(json!({"cookie": 0x44u64}));

        assert_eq!(
            match_flow(&requested, 0x04, &stored_match).unwrap(),
            Some(stored_match)
        );
        assert_eq!(match_flow(&requested, 0x04, &stored_mismatch).unwrap(), None);
    }

    #[test]
    fn of10_all_wildcards_matches_anything() {
        let requested = flow(json!({"match": {"wildcards": 0xffff_ffffu64}}));
        let stored = flow(json!({"match": {"in_port": 7, "dl_type": 0x0800}}));

        assert_eq!(
            match_flow(&requested, 0x01, &stored).unwrap(),
            Some(stored)
        );
    }

    #[test]
    fn of13_ipv4_cidr_matching() {
        let requested = flow(json!({"match": {"ipv4_src": "192.168.1.0/24"}}));
        let stored_in_range = flow(json!({"match": {"ipv4_src": "192.168.1.42"}}));
        let stored_out_of_range = flow(json!({"match": {"ipv4_src": "192.168.2.1"}}));

        assert!(match_flow(&requested, 0x04, &stored_in_range).unwrap().is_some());
        assert!(match_flow(&requested, 0x04, &stored_out_of_range)
            .unwrap()
            .is_none());
    }

    #[test]
    fn of10_ip_submatch_gated_on_ipv4_ethertype() {
        let requested = flow(json!({"match": {"dl_type": 0x0806u64, "nw_src": "10.0.0.1"}}));
        let stored = flow(json!({"match": {"dl_type": 0x0806u64, "nw_src": "10.0.0.2"}}));

        // nw_src differs but dl_type isn't IPv4, so the nw_src sub-match is
        // skipped entirely and the flow still matches.
        assert!(match_flow(&requested, 0x01, &stored).unwrap().is_some());
    }

    #[test]
    fn rejects_unsupported_version() {
        let requested = flow(json!({}));
        let stored = flow(json!({}));
        assert!(match_flow(&requested, 0x02, &stored).is_err());
    }
}
