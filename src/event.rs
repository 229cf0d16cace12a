use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::player::Player;

/// Stable tag of an [`Event`] variant, as it appears in the `type` field on
/// the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    StartGameVote,
    StartGame,
    StartKickVote,
    StartKick,
    Message,
    Cancel,
    Move,
    Key,
}

/// Everything peers say to each other in a room.
///
/// On the wire an event is `{"type": <EventType>, "payload": {..fields}}`.
/// Payload fields must match the declared type exactly, so a payload that
/// belongs to another variant fails to decode instead of being misread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", deny_unknown_fields)]
pub enum Event {
    /// Proposes a new game; the origin becomes the vote author.
    StartGameVote { origin: Player },
    /// Agreement to the game currently being voted on.
    StartGame { origin: Player },
    StartKickVote { origin: Player, target: Player },
    StartKick {
        origin: Player,
        target: Player,
        reason: String,
    },
    Message { origin: Player, text: String },
    /// Aborts the current vote or exchange. Only honored from its author.
    Cancel { origin: Player, reason: String },
    Move { origin: Player, commitment: Vec<u8> },
    Key { origin: Player, key: Vec<u8> },
}

impl Event {
    pub fn origin(&self) -> &Player {
        match self {
            Self::StartGameVote { origin }
            | Self::StartGame { origin }
            | Self::StartKickVote { origin, .. }
            | Self::StartKick { origin, .. }
            | Self::Message { origin, .. }
            | Self::Cancel { origin, .. }
            | Self::Move { origin, .. }
            | Self::Key { origin, .. } => origin,
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::StartGameVote { .. } => EventType::StartGameVote,
            Self::StartGame { .. } => EventType::StartGame,
            Self::StartKickVote { .. } => EventType::StartKickVote,
            Self::StartKick { .. } => EventType::StartKick,
            Self::Message { .. } => EventType::Message,
            Self::Cancel { .. } => EventType::Cancel,
            Self::Move { .. } => EventType::Move,
            Self::Key { .. } => EventType::Key,
        }
    }

    /// Opaque bytes carried by `Move` (commitment) and `Key` (reveal key).
    /// Empty for every other variant.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Move { commitment, .. } => commitment,
            Self::Key { key, .. } => key,
            _ => &[],
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("failed to encode event")
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(data).context("failed to decode event")
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartGameVote { origin } => {
                write!(f, "{origin} started voting for next game!")
            }
            Self::StartGame { origin } => write!(f, "{origin} voted for next game!"),
            Self::StartKickVote { origin, target } => {
                write!(f, "{origin} voted for kicking peer {target}!")
            }
            Self::StartKick {
                origin,
                target,
                reason,
            } => write!(
                f,
                "{origin} started voting for kicking peer {target}! Reason: \"{reason}\""
            ),
            Self::Message { text, .. } => write!(f, "{text}"),
            Self::Cancel { origin, reason } => write!(f, "{origin} cancelled {reason}"),
            Self::Move { origin, .. } => write!(f, "{origin} sent their move!"),
            Self::Key { origin, .. } => write!(f, "{origin} sent their decryption key!"),
        }
    }
}
