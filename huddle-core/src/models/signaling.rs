//! Signaling wire types
//!
//! Messages are broadcast on a room-scoped channel; every recipient
//! filters for itself. Targeted variants (offer/answer/ice-candidate)
//! are addressed to exactly one peer; presence variants are meant for
//! everyone except their sender.

use serde::{Deserialize, Serialize};

use super::id::UserId;

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

/// Session description (SDP)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// ICE candidate exchanged during negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Full candidate string
    pub candidate: String,
    /// SDP mid
    pub sdp_mid: Option<String>,
    /// SDP mline index
    pub sdp_mline_index: Option<u32>,
}

/// Signaling message envelope: `{ "event": ..., "payload": { ... } }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum SignalingMessage {
    #[serde(rename_all = "camelCase")]
    UserConnected { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    UserDisconnected { user_id: UserId },
    #[serde(rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        from_user_id: UserId,
        target_user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    Answer {
        answer: SessionDescription,
        from_user_id: UserId,
        target_user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        candidate: IceCandidate,
        from_user_id: UserId,
        target_user_id: UserId,
    },
}

impl SignalingMessage {
    /// The participant the message originates from.
    pub fn sender(&self) -> &UserId {
        match self {
            Self::UserConnected { user_id } | Self::UserDisconnected { user_id } => user_id,
            Self::Offer { from_user_id, .. }
            | Self::Answer { from_user_id, .. }
            | Self::IceCandidate { from_user_id, .. } => from_user_id,
        }
    }

    /// Recipient filter: targeted variants match `target == me`, presence
    /// variants match everyone but their sender.
    pub fn concerns(&self, me: &UserId) -> bool {
        match self {
            Self::UserConnected { user_id } | Self::UserDisconnected { user_id } => user_id != me,
            Self::Offer { target_user_id, .. }
            | Self::Answer { target_user_id, .. }
            | Self::IceCandidate { target_user_id, .. } => target_user_id == me,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let msg = SignalingMessage::IceCandidate {
            candidate: IceCandidate {
                candidate: "candidate:1 1 UDP 2130706431 192.168.1.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
            from_user_id: UserId::from("alice"),
            target_user_id: UserId::from("bob"),
        };

        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "ice-candidate");
        assert_eq!(json["payload"]["fromUserId"], "alice");
        assert_eq!(json["payload"]["targetUserId"], "bob");
    }

    #[test]
    fn test_presence_round_trip() {
        let msg = SignalingMessage::UserConnected {
            user_id: UserId::from("alice"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: SignalingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sender().as_str(), "alice");
    }

    #[test]
    fn test_concerns_filters_targeted_messages() {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let carol = UserId::from("carol");

        let offer = SignalingMessage::Offer {
            offer: SessionDescription {
                sdp_type: SdpType::Offer,
                sdp: "v=0".to_string(),
            },
            from_user_id: alice.clone(),
            target_user_id: bob.clone(),
        };

        assert!(offer.concerns(&bob));
        assert!(!offer.concerns(&alice));
        assert!(!offer.concerns(&carol));
    }

    #[test]
    fn test_concerns_filters_own_presence() {
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let presence = SignalingMessage::UserConnected {
            user_id: alice.clone(),
        };

        assert!(!presence.concerns(&alice));
        assert!(presence.concerns(&bob));
    }
}
