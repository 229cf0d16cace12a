use anyhow::Context;
use async_trait::async_trait;
use moq_transport::serve::{TrackReader, TrackReaderMode};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use url::Url;

use crate::coordinator::{Input, Publisher};
use crate::event::Event;
use crate::messages::*;
use crate::player::{Player, PlayerId};
use crate::roster::SharedRoster;

/// HTTP side of the relay.
#[derive(Clone, Debug)]
pub struct RelayClient {
    http: reqwest::Client,
    base: Url,
}

impl RelayClient {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("bad relay url {}", self.base))
    }

    pub async fn join(&self, player: &Player) -> anyhow::Result<()> {
        let res = self
            .http
            .post(self.url("join")?)
            .json(&JoinRequest {
                player: player.clone(),
            })
            .send()
            .await
            .context("failed to reach relay")?;

        match res.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(()),
            status => anyhow::bail!("unexpected status {} in join request", status),
        }
    }

    pub async fn leave(&self, id: PlayerId) -> anyhow::Result<()> {
        self.http
            .post(self.url("leave")?)
            .json(&LeaveRequest { id })
            .send()
            .await
            .context("failed to reach relay")?
            .error_for_status()
            .context("leave request rejected")?;
        Ok(())
    }

    pub async fn publish(&self, sender: PlayerId, event: &Event) -> anyhow::Result<()> {
        self.http
            .post(self.url("publish")?)
            .json(&PublishRequest {
                sender,
                event: event.encode()?,
            })
            .send()
            .await
            .context("failed to reach relay")?
            .error_for_status()
            .context("relay rejected event")?;
        Ok(())
    }

    pub async fn roster(&self) -> anyhow::Result<Vec<Player>> {
        let players = self
            .http
            .get(self.url("roster")?)
            .send()
            .await
            .context("failed to reach relay")?
            .error_for_status()?
            .json()
            .await
            .context("bad roster response")?;
        Ok(players)
    }
}

/// Publishes a coordinator's events through the relay.
pub struct RelayPublisher {
    relay: RelayClient,
    sender: PlayerId,
}

impl RelayPublisher {
    pub fn new(relay: RelayClient, sender: PlayerId) -> Self {
        Self { relay, sender }
    }
}

#[async_trait]
impl Publisher for RelayPublisher {
    async fn publish(&mut self, event: &Event) -> anyhow::Result<()> {
        self.relay.publish(self.sender, event).await
    }
}

/// Turns room frames into coordinator input.
///
/// Our own events are dropped since the coordinator already applied them,
/// and so is anything that fails to decode or claims an origin other than
/// the peer that sent it.
struct Inbound {
    me: PlayerId,
    roster: SharedRoster,
    inbox: mpsc::UnboundedSender<Input>,
    events: Option<mpsc::UnboundedSender<Event>>,
}

impl Inbound {
    /// Fails only once the coordinator inbox is gone, since nothing would
    /// act on the room after that.
    fn receive(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let frame: RoomFrame = match serde_json::from_slice(data) {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("dropping malformed frame: {}", err);
                return Ok(());
            }
        };

        match frame {
            RoomFrame::Roster { players } => {
                log::info!("room has {} players", players.len());
                self.roster.replace(players);
            }
            RoomFrame::Event { sender, .. } if sender == self.me => {}
            RoomFrame::Event { sender, event } => match Event::decode(event.as_bytes()) {
                Ok(event) if event.origin().id == sender => {
                    if let Some(events) = &self.events {
                        if events.send(event.clone()).is_err() {
                            log::debug!("event observer went away");
                            self.events = None;
                        }
                    }
                    self.inbox
                        .send(Input::Event(event))
                        .context("coordinator inbox closed")?;
                }
                Ok(event) => log::debug!(
                    "dropping {:?} from {} claiming to be {}",
                    event.event_type(),
                    sender.short(),
                    event.origin().id.short()
                ),
                Err(err) => log::debug!("dropping event from {}: {:#}", sender.short(), err),
            },
        }

        Ok(())
    }
}

/// Subscriber side of a room: joins through the relay, then follows the room
/// track and feeds the coordinator inbox.
pub struct RoomClient {
    player: Player,
    relay: RelayClient,
    track: TrackReader,
    inbound: Inbound,
}

impl RoomClient {
    pub fn new(
        player: Player,
        relay: RelayClient,
        track: TrackReader,
        roster: SharedRoster,
        inbox: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            inbound: Inbound {
                me: player.id,
                roster,
                inbox,
                events: None,
            },
            player,
            relay,
            track,
        }
    }

    /// Copies of every event accepted from other peers, for display.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<Event> {
        let (send, recv) = mpsc::unbounded_channel();
        self.inbound.events = Some(send);
        recv
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        self.relay.join(&self.player).await?;

        // in case the roster frame for our join went out before we were reading
        let players = self.relay.roster().await?;
        self.inbound.roster.replace(players);

        let mode = self.track.mode().await.context("failed to get mode")?;
        let TrackReaderMode::Subgroups(mut subgroups) = mode else {
            anyhow::bail!("unexpected stream mode");
        };

        while let Some(mut subgroup) = subgroups.next().await? {
            while let Some(object) = subgroup.read_next().await? {
                self.inbound.receive(&object)?;
            }
        }

        Ok(())
    }
}
