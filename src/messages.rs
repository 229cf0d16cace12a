use serde::{Deserialize, Serialize};

use crate::player::{Player, PlayerId};

#[derive(Serialize, Deserialize, Debug)]
pub struct JoinRequest {
    pub player: Player,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LeaveRequest {
    pub id: PlayerId,
}

/// `event` is the encoded [`crate::Event`], forwarded untouched so that each
/// peer decides for itself whether it is well formed.
#[derive(Serialize, Deserialize, Debug)]
pub struct PublishRequest {
    pub sender: PlayerId,
    pub event: String,
}

/// What the relay writes to the room track.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum RoomFrame {
    /// Full membership after any join or leave.
    Roster { players: Vec<Player> },
    Event { sender: PlayerId, event: String },
}
