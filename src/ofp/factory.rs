//! Selects a [`FlowSerializer`] by OpenFlow version (§4.D). A switch
//! negotiates exactly one version at handshake; any version other than
//! 1.0/1.3 is a fatal [`FlowManagerError::UnsupportedVersion`].

use crate::error::FlowManagerError;

use super::v10::SerializerV10;
use super::v13::SerializerV13;
use super::{FlowSerializer, OfVersion};

static V10: SerializerV10 = SerializerV10;
static V13: SerializerV13 = SerializerV13;

pub fn serializer_for(version: OfVersion) -> &'static dyn FlowSerializer {
    match version {
        OfVersion::V10 => &V10,
        OfVersion::V13 => &V13,
    }
}

/// Dispatches straight off the wire version byte, as the orchestrator does
/// when it only has `switch.connection.protocol.version` in hand.
pub fn serializer_for_wire(version: u8) -> Result<&'static dyn FlowSerializer, FlowManagerError> {
    Ok(serializer_for(OfVersion::try_from(version)?))
}
