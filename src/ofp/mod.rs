//! In-memory OpenFlow message structures and the bidirectional translation
//! between them and the uniform JSON flow schema (§4.B, §4.C). The actual
//! wire codec that packs these onto a socket is an external collaborator
//! (§1); this module stops at producing the structures the event bus
//! carries.

pub mod factory;
pub mod oxm;
pub mod v10;
pub mod v13;

use serde::{Deserialize, Serialize};

use crate::error::FlowManagerError;
use crate::model::{FlowCommand, FlowDescription};

/// The two OpenFlow protocol versions this subsystem speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfVersion {
    V10,
    V13,
}

impl OfVersion {
    pub const WIRE_V10: u8 = 0x01;
    pub const WIRE_V13: u8 = 0x04;

    pub fn wire(self) -> u8 {
        match self {
            OfVersion::V10 => Self::WIRE_V10,
            OfVersion::V13 => Self::WIRE_V13,
        }
    }
}

impl TryFrom<u8> for OfVersion {
    type Error = FlowManagerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            Self::WIRE_V10 => Ok(OfVersion::V10),
            Self::WIRE_V13 => Ok(OfVersion::V13),
            other => Err(FlowManagerError::UnsupportedVersion(other)),
        }
    }
}

/// A version-tagged, in-memory FlowMod/FlowStats object. The same shape is
/// used for both outgoing FlowMods and flows read back from a switch, since
/// their fields coincide apart from the command that accompanies dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEntry {
    V10(v10::FlowEntry10),
    V13(v13::FlowEntry13),
}

impl FlowEntry {
    pub fn version(&self) -> OfVersion {
        match self {
            FlowEntry::V10(_) => OfVersion::V10,
            FlowEntry::V13(_) => OfVersion::V13,
        }
    }

    /// Needed by the consistency passes (§4.F) to test a live flow against
    /// the cookie/table_id ignore-ranges (§3, §6) without caring which wire
    /// version produced it.
    pub fn cookie(&self) -> u64 {
        match self {
            FlowEntry::V10(e) => e.cookie,
            FlowEntry::V13(e) => e.cookie,
        }
    }

    pub fn table_id(&self) -> u8 {
        match self {
            FlowEntry::V10(e) => e.table_id,
            FlowEntry::V13(e) => e.table_id,
        }
    }
}

/// A FlowMod ready to be handed to the outbound event bus: a command plus
/// the entry it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct OfFlowMod {
    pub command: FlowCommand,
    pub entry: FlowEntry,
}

/// Selected by [`factory::serializer_for`] on the switch's negotiated
/// OpenFlow version (§4.D); no runtime reflection, just the two
/// implementations in [`v10`] and [`v13`].
pub trait FlowSerializer: Send + Sync {
    fn version(&self) -> OfVersion;

    fn from_dict(&self, d: &FlowDescription) -> FlowEntry;

    fn to_dict(&self, entry: &FlowEntry) -> FlowDescription;

    fn as_add_flow_mod(&self, d: &FlowDescription) -> OfFlowMod {
        OfFlowMod {
            command: FlowCommand::Add,
            entry: self.from_dict(d),
        }
    }

    fn as_delete_flow_mod(&self, d: &FlowDescription) -> OfFlowMod {
        OfFlowMod {
            command: FlowCommand::Delete,
            entry: self.from_dict(d),
        }
    }

    fn as_strict_delete_flow_mod(&self, d: &FlowDescription) -> OfFlowMod {
        OfFlowMod {
            command: FlowCommand::DeleteStrict,
            entry: self.from_dict(d),
        }
    }
}

pub(crate) fn mac_to_string(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

pub(crate) fn mac_from_str(s: &str) -> Result<[u8; 6], FlowManagerError> {
    let mut out = [0u8; 6];
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 6 {
        return Err(FlowManagerError::BadRequest(format!(
            "'{s}' is not a valid ethernet address"
        )));
    }
    for (i, part) in parts.iter().enumerate() {
        out[i] = u8::from_str_radix(part, 16)
            .map_err(|_| FlowManagerError::BadRequest(format!("'{s}' is not a valid ethernet address")))?;
    }
    Ok(out)
}
