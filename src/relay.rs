use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use moq_transport::serve::{Subgroup, SubgroupsWriter};
use std::collections::BTreeMap;
use std::net;
use std::sync::{Arc, Mutex, PoisonError};

use crate::messages::*;
use crate::player::{Player, PlayerId};

/// Somewhere to put frames for subscribers.
trait FrameSink: Send {
    fn send(&mut self, frame: &RoomFrame) -> anyhow::Result<()>;
}

struct TrackWithSeq {
    track: SubgroupsWriter,
    seq: u64,
}

impl FrameSink for TrackWithSeq {
    fn send(&mut self, frame: &RoomFrame) -> anyhow::Result<()> {
        let group_id = self.seq;
        self.seq += 1;

        let message = serde_json::to_string(frame).context("failed to encode frame")?;

        let mut group = self
            .track
            .create(Subgroup {
                group_id,
                subgroup_id: 0,
                priority: 0,
            })
            .context("failed to create frame group")?;

        log::debug!("send: {}", message);
        group.write(message.into()).context("failed to write")?;
        Ok(())
    }
}

/// Membership plus the track it is announced on. Every accepted request
/// turns into exactly one frame, written while the lock is held, so frame
/// order matches the order requests were accepted in.
struct Room<S> {
    players: BTreeMap<PlayerId, Player>,
    sink: S,
}

impl<S: FrameSink> Room<S> {
    fn new(sink: S) -> Self {
        Self {
            players: BTreeMap::new(),
            sink,
        }
    }

    fn players(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    fn join(&mut self, player: Player) -> StatusCode {
        log::info!("{} ({}) joined", player.nick, player.id.short());
        let fresh = self.players.insert(player.id, player).is_none();

        if let Err(err) = self.announce_roster() {
            log::error!("{:#}", err);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }

        if fresh {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        }
    }

    fn leave(&mut self, id: PlayerId) -> StatusCode {
        let Some(player) = self.players.remove(&id) else {
            return StatusCode::NOT_FOUND;
        };
        log::info!("{} ({}) left", player.nick, id.short());

        match self.announce_roster() {
            Ok(()) => StatusCode::OK,
            Err(err) => {
                log::error!("{:#}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn publish(&mut self, request: PublishRequest) -> StatusCode {
        if !self.players.contains_key(&request.sender) {
            return StatusCode::FORBIDDEN;
        }

        let frame = RoomFrame::Event {
            sender: request.sender,
            event: request.event,
        };
        match self.sink.send(&frame) {
            Ok(()) => StatusCode::ACCEPTED,
            Err(err) => {
                log::error!("{:#}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn announce_roster(&mut self) -> anyhow::Result<()> {
        let frame = RoomFrame::Roster {
            players: self.players(),
        };
        self.sink.send(&frame)
    }
}

type SharedRoom = Arc<Mutex<Room<TrackWithSeq>>>;

/// HTTP front of a room. Peers join, leave and publish through it; everything
/// it accepts is fanned out on the room track.
pub struct Relay {
    bind: net::SocketAddr,
    room: SharedRoom,
}

impl Relay {
    pub fn new(bind: net::SocketAddr, track: SubgroupsWriter) -> Self {
        Self {
            bind,
            room: Arc::new(Mutex::new(Room::new(TrackWithSeq { track, seq: 0 }))),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/join", post(join))
            .route("/leave", post(leave))
            .route("/publish", post(publish))
            .route("/roster", get(roster))
            .with_state(self.room.clone());

        let listener = tokio::net::TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("failed to bind {}", self.bind))?;
        log::info!("relay listening on {}", self.bind);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn join(State(room): State<SharedRoom>, Json(request): Json<JoinRequest>) -> StatusCode {
    let mut room = room.lock().unwrap_or_else(PoisonError::into_inner);
    room.join(request.player)
}

async fn leave(State(room): State<SharedRoom>, Json(request): Json<LeaveRequest>) -> StatusCode {
    let mut room = room.lock().unwrap_or_else(PoisonError::into_inner);
    room.leave(request.id)
}

async fn publish(
    State(room): State<SharedRoom>,
    Json(request): Json<PublishRequest>,
) -> StatusCode {
    let mut room = room.lock().unwrap_or_else(PoisonError::into_inner);
    room.publish(request)
}

async fn roster(State(room): State<SharedRoom>) -> Json<Vec<Player>> {
    let room = room.lock().unwrap_or_else(PoisonError::into_inner);
    Json(room.players())
}

#[cfg(test)]
mod tests {
    use super::*;

    impl FrameSink for Vec<RoomFrame> {
        fn send(&mut self, frame: &RoomFrame) -> anyhow::Result<()> {
            // go through JSON like the real track does
            let text = serde_json::to_string(frame)?;
            self.push(serde_json::from_str(&text)?);
            Ok(())
        }
    }

    struct Broken;

    impl FrameSink for Broken {
        fn send(&mut self, _frame: &RoomFrame) -> anyhow::Result<()> {
            anyhow::bail!("track closed")
        }
    }

    fn player(n: u8, nick: &str) -> Player {
        Player::new(PlayerId::from_bytes([n; 16]), nick)
    }

    #[test]
    fn join_announces_full_roster() {
        let mut room = Room::new(Vec::new());
        assert_eq!(room.join(player(1, "alice")), StatusCode::CREATED);
        assert_eq!(room.join(player(2, "bob")), StatusCode::CREATED);
        assert_eq!(room.join(player(2, "bobby")), StatusCode::OK);

        assert_eq!(room.sink.len(), 3);
        assert_eq!(
            room.sink[1],
            RoomFrame::Roster {
                players: vec![player(1, "alice"), player(2, "bob")],
            }
        );
        assert_eq!(room.players()[1].nick, "bobby");
    }

    #[test]
    fn leave_removes_and_announces() {
        let mut room = Room::new(Vec::new());
        room.join(player(1, "alice"));
        room.join(player(2, "bob"));

        assert_eq!(room.leave(player(1, "").id), StatusCode::OK);
        assert_eq!(room.leave(player(1, "").id), StatusCode::NOT_FOUND);
        assert_eq!(
            room.sink.last(),
            Some(&RoomFrame::Roster {
                players: vec![player(2, "bob")],
            })
        );
    }

    #[test]
    fn only_members_may_publish() {
        let mut room = Room::new(Vec::new());
        let request = PublishRequest {
            sender: player(1, "").id,
            event: "{\"type\":\"Message\"}".into(),
        };
        assert_eq!(room.publish(request), StatusCode::FORBIDDEN);
        assert!(room.sink.is_empty());

        room.join(player(1, "alice"));
        let request = PublishRequest {
            sender: player(1, "").id,
            event: "anything at all".into(),
        };
        assert_eq!(room.publish(request), StatusCode::ACCEPTED);
        assert_eq!(
            room.sink.last(),
            Some(&RoomFrame::Event {
                sender: player(1, "").id,
                event: "anything at all".into(),
            })
        );
    }

    #[test]
    fn sink_failures_surface_as_server_errors() {
        let mut room = Room::new(Broken);
        assert_eq!(
            room.join(player(1, "alice")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let request = PublishRequest {
            sender: player(1, "").id,
            event: String::new(),
        };
        assert_eq!(room.publish(request), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
