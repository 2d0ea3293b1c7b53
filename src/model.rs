//! The operator-facing, version-agnostic JSON schema described in §3: flow
//! descriptions, match fields and actions. This is the shape that crosses
//! the admin API and that is held in the intent store; OpenFlow-specific
//! translation lives in [`crate::ofp`].

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A flow description as submitted by an operator or returned by `list`.
///
/// All fields are optional except the implicit defaults applied by each
/// version's serializer (see §4.B / §4.C).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_timeout: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_mask: Option<u64>,
    #[serde(rename = "match", default, skip_serializing_if = "MatchFields::is_empty")]
    pub match_fields: MatchFields,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,
}

/// A loosely-typed bag of match-field name to value, preserving the names
/// recognized in §3 (`in_port`, `dl_src`, `ipv4_src`, `wildcards`, ...).
///
/// Values are kept as [`serde_json::Value`] rather than a rigid struct so
/// that the match engine (§4.A) and each serializer (§4.B/§4.C) can apply
/// their own, version-specific interpretation of a field without the model
/// layer having to know which fields a given OpenFlow version recognizes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchFields(pub serde_json::Map<String, serde_json::Value>);

impl MatchFields {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.as_u64())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(name.into(), value.into());
    }
}

/// One entry of the `actions` list. Order is significant and is preserved
/// end to end (§4.B, §4.C): dispatch order on the wire, and list order in
/// `to_dict`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    Output {
        #[serde(
            serialize_with = "serialize_port_ref",
            deserialize_with = "deserialize_port_ref"
        )]
        port: PortRef,
    },
    SetVlan {
        vlan_id: u16,
    },
    PushVlan {
        tag_type: TagType,
    },
    PopVlan,
}

/// The `port` field of an `output` action: either a concrete port number or
/// the literal `"controller"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRef {
    Number(u32),
    Controller,
}

fn serialize_port_ref<S>(port: &PortRef, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match port {
        PortRef::Number(n) => serializer.serialize_u32(*n),
        PortRef::Controller => serializer.serialize_str("controller"),
    }
}

fn deserialize_port_ref<'de, D>(deserializer: D) -> Result<PortRef, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|v| PortRef::Number(v as u32))
            .ok_or_else(|| D::Error::custom("port must be a non-negative integer")),
        serde_json::Value::String(s) if s == "controller" => Ok(PortRef::Controller),
        other => Err(D::Error::custom(format!("invalid port value: {other}"))),
    }
}

/// `push_vlan`'s `tag_type`: service (`0x88a8`) vs customer (`0x8100`) tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagType {
    #[serde(rename = "s")]
    S,
    #[serde(rename = "c")]
    C,
}

/// The three verbs the admin API and the orchestrator route on (§4.F, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowCommand {
    Add,
    Delete,
    DeleteStrict,
}

impl FlowCommand {
    pub fn is_delete(&self) -> bool {
        matches!(self, FlowCommand::Delete | FlowCommand::DeleteStrict)
    }
}

/// Request body accepted by every admin endpoint: `{"flows": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowsRequest {
    pub flows: Vec<FlowDescription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_flow() {
        let json = serde_json::json!({
            "priority": 4000,
            "match": {"in_port": 1},
            "actions": [{"action_type": "output", "port": 2}],
        });

        let flow: FlowDescription = serde_json::from_value(json).unwrap();
        assert_eq!(flow.priority, Some(4000));
        assert_eq!(flow.match_fields.get_u64("in_port"), Some(1));
        assert_eq!(
            flow.actions,
            vec![Action::Output {
                port: PortRef::Number(2)
            }]
        );
    }

    #[test]
    fn output_port_accepts_controller_literal() {
        let json = serde_json::json!({"action_type": "output", "port": "controller"});
        let action: Action = serde_json::from_value(json).unwrap();
        assert_eq!(
            action,
            Action::Output {
                port: PortRef::Controller
            }
        );
    }
}
