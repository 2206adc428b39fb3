//! Wire messages exchanged with the session server.
//!
//! Every message is a JSON object `{ "type": ..., "payload": ... }`. Inbound
//! and outbound directions are separate closed enums so the dispatcher can
//! match exhaustively.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::EconomyConfig;
use crate::oracle::Move;
use crate::state::{EndReason, PlotRow, ResourceLedger, Side};

/// Possibly-partial authoritative snapshot. Absent fields keep their local value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_owner: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub economy: Option<BTreeMap<Side, ResourceLedger>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plots: Option<BTreeMap<Side, PlotRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captures: Option<BTreeMap<Side, u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceActionKind {
    Plant,
    Harvest,
    Unlock,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_type: Option<String>,
}

/// Typed farm action as taken by a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceAction {
    Plant { crop: String },
    Harvest,
    Unlock,
}

impl ResourceAction {
    #[must_use]
    pub const fn kind(&self) -> ResourceActionKind {
        match self {
            Self::Plant { .. } => ResourceActionKind::Plant,
            Self::Harvest => ResourceActionKind::Harvest,
            Self::Unlock => ResourceActionKind::Unlock,
        }
    }

    #[must_use]
    pub fn data(&self) -> ResourceData {
        match self {
            Self::Plant { crop } => ResourceData {
                crop_type: Some(crop.clone()),
            },
            Self::Harvest | Self::Unlock => ResourceData::default(),
        }
    }

    /// Rebuild a typed action from its wire parts. A plant without a crop is dropped.
    #[must_use]
    pub fn from_wire(kind: ResourceActionKind, data: &ResourceData) -> Option<Self> {
        match kind {
            ResourceActionKind::Plant => data
                .crop_type
                .clone()
                .map(|crop| Self::Plant { crop }),
            ResourceActionKind::Harvest => Some(Self::Harvest),
            ResourceActionKind::Unlock => Some(Self::Unlock),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Inbound {
    #[serde(rename_all = "camelCase")]
    SessionAssigned {
        room_id: String,
        side: Side,
        #[serde(default)]
        is_first_player: bool,
    },
    SessionSnapshot(PartialSessionState),
    #[serde(rename_all = "camelCase")]
    OpponentTacticalMove {
        #[serde(rename = "move")]
        mv: Move,
        encoded_position: String,
    },
    #[serde(rename_all = "camelCase")]
    OpponentResourceAction {
        #[serde(rename = "type")]
        kind: ResourceActionKind,
        plot_index: usize,
        #[serde(default)]
        data: ResourceData,
    },
    #[serde(rename_all = "camelCase")]
    SessionEnded {
        #[serde(default)]
        winner: Option<Side>,
        reason: EndReason,
    },
    PeerDisconnected,
    PeerReconnected,
    #[serde(rename_all = "camelCase")]
    ReconnectAccepted {
        room_id: String,
        side: Side,
        #[serde(flatten)]
        snapshot: PartialSessionState,
    },
    #[serde(rename_all = "camelCase")]
    RoomUnavailable { room_id: String },
    ConfigUpdated { config: EconomyConfig },
}

impl Inbound {
    /// Parse one wire frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a known inbound message.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::SessionAssigned { .. } => "sessionAssigned",
            Self::SessionSnapshot(_) => "sessionSnapshot",
            Self::OpponentTacticalMove { .. } => "opponentTacticalMove",
            Self::OpponentResourceAction { .. } => "opponentResourceAction",
            Self::SessionEnded { .. } => "sessionEnded",
            Self::PeerDisconnected => "peerDisconnected",
            Self::PeerReconnected => "peerReconnected",
            Self::ReconnectAccepted { .. } => "reconnectAccepted",
            Self::RoomUnavailable { .. } => "roomUnavailable",
            Self::ConfigUpdated { .. } => "configUpdated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        is_reconnecting: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_side: Option<Side>,
    },
    #[serde(rename_all = "camelCase")]
    TacticalMove {
        #[serde(rename = "move")]
        mv: Move,
        encoded_position: String,
    },
    #[serde(rename_all = "camelCase")]
    ResourceAction {
        #[serde(rename = "type")]
        kind: ResourceActionKind,
        plot_index: usize,
        data: ResourceData,
    },
    #[serde(rename_all = "camelCase")]
    EndTurn { encoded_position: String },
    #[serde(rename_all = "camelCase")]
    SessionOver {
        winner: Option<Side>,
        reason: EndReason,
    },
}

impl Outbound {
    /// Encode as one wire frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_snapshot_with_missing_fields() {
        let msg = Inbound::from_json(
            r#"{"type":"sessionSnapshot","payload":{"turnOwner":"black","captures":{"white":2}}}"#,
        )
        .unwrap();
        let Inbound::SessionSnapshot(snapshot) = msg else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.turn_owner, Some(Side::Black));
        assert!(snapshot.encoded_position.is_none());
        assert_eq!(snapshot.captures.unwrap()[&Side::White], 2);
    }

    #[test]
    fn parses_reconnect_with_flattened_snapshot() {
        let msg = Inbound::from_json(
            &json!({
                "type": "reconnectAccepted",
                "payload": {
                    "roomId": "r-9",
                    "side": "white",
                    "turnOwner": "white",
                    "economy": { "white": { "balance": 4 }, "black": { "balance": 7 } }
                }
            })
            .to_string(),
        )
        .unwrap();
        let Inbound::ReconnectAccepted {
            room_id, snapshot, ..
        } = msg
        else {
            panic!("expected reconnect");
        };
        assert_eq!(room_id, "r-9");
        assert_eq!(snapshot.economy.unwrap()[&Side::Black].balance, 7);
    }

    #[test]
    fn parses_unit_and_move_messages() {
        assert_eq!(
            Inbound::from_json(r#"{"type":"peerDisconnected"}"#).unwrap(),
            Inbound::PeerDisconnected
        );
        let msg = Inbound::from_json(
            r#"{"type":"opponentTacticalMove","payload":{"move":{"from":"e7","to":"e5","piece":"pawn"},"encodedPosition":"8/8/8/8/8/8/8/8 w - - 0 1"}}"#,
        )
        .unwrap();
        assert_eq!(msg.label(), "opponentTacticalMove");
    }

    #[test]
    fn outbound_join_omits_absent_fields() {
        let join = Outbound::JoinRoom {
            username: "ada".to_string(),
            room_id: None,
            is_reconnecting: false,
            previous_side: None,
        };
        let value: serde_json::Value = serde_json::from_str(&join.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "joinRoom", "payload": {"username": "ada", "isReconnecting": false}})
        );
    }

    #[test]
    fn plant_without_crop_is_dropped() {
        assert!(ResourceAction::from_wire(ResourceActionKind::Plant, &ResourceData::default())
            .is_none());
        let action = ResourceAction::Plant {
            crop: "corn".to_string(),
        };
        assert_eq!(
            ResourceAction::from_wire(action.kind(), &action.data()),
            Some(action)
        );
    }
}
