//! Per-peer game state machine.
//!
//! A coordinator consumes one [`Input`] at a time: events from the room,
//! commands from the local player, and expiries of its own deadlines. Events
//! it emits are published to the room and then applied to its own state in
//! the same order, since the transport does not echo a peer's broadcasts back
//! to it. That loopback is how the local peer's own agreement, commitment and
//! reveal get counted, exactly like everybody else's.

use anyhow::{bail, ensure, Context};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::commitment;
use crate::event::Event;
use crate::outcome::{self, Choice, Outcome};
use crate::player::{Player, PlayerId};
use crate::roster::Roster;
use crate::timer::{Deadline, Expiry, Stage, PHASE_TIMEOUT};
use crate::vote::Vote;

/// Broadcasts events to the rest of the room.
#[async_trait]
pub trait Publisher: Send {
    async fn publish(&mut self, event: &Event) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Reserved for kick votes, which are not wired up yet.
    KickVote,
    GameVote,
    MoveExchange,
    KeyExchange,
}

/// What the local player asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    ProposeGame,
    Agree,
    Play(Choice),
    Say(String),
}

#[derive(Debug)]
pub enum Input {
    Event(Event),
    Command(Command),
    Expired(Expiry),
}

#[derive(Debug, Default)]
struct MoveRound {
    commitments: HashMap<PlayerId, Vec<u8>>,
    reveals: HashMap<PlayerId, Vec<u8>>,
    // held back until everyone has committed
    own_key: Option<Vec<u8>>,
}

pub struct Coordinator<P, R> {
    me: Player,
    phase: Phase,
    vote: Option<Vote>,
    round: Option<MoveRound>,
    publisher: P,
    roster: R,
    deadline: Deadline,
    outbox: VecDeque<Event>,
}

impl<P: Publisher, R: Roster> Coordinator<P, R> {
    pub fn new(me: Player, publisher: P, roster: R, inbox: &UnboundedSender<Input>) -> Self {
        Self {
            me,
            phase: Phase::Idle,
            vote: None,
            round: None,
            publisher,
            roster,
            deadline: Deadline::new(PHASE_TIMEOUT, inbox),
            outbox: VecDeque::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline.set_timeout(timeout);
        self
    }

    pub fn me(&self) -> &Player {
        &self.me
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn vote_author(&self) -> Option<PlayerId> {
        self.vote.as_ref().map(Vote::author)
    }

    /// Serve inputs until every sender of the inbox is gone.
    pub async fn run(mut self, mut inbox: UnboundedReceiver<Input>) {
        while let Some(input) = inbox.recv().await {
            if let Err(err) = self.handle(input).await {
                log::warn!("{:#}", err);
            }
        }
        log::debug!("inbox closed, coordinator stopping");
    }

    pub async fn handle(&mut self, input: Input) -> anyhow::Result<()> {
        match input {
            Input::Event(event) => self.process(event).await,
            Input::Command(command) => self.execute(command).await,
            Input::Expired(expiry) => self.expire(expiry).await,
        }
    }

    /// Apply an event received from another peer.
    ///
    /// A publish error for anything emitted in response is returned only
    /// after the local transition has happened; it is not rolled back.
    pub async fn process(&mut self, event: Event) -> anyhow::Result<()> {
        self.apply(event);
        self.flush().await
    }

    pub async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        let event = match command {
            Command::ProposeGame => {
                ensure!(
                    self.phase == Phase::Idle,
                    "cannot propose a game during {:?}",
                    self.phase
                );
                Event::StartGameVote {
                    origin: self.me.clone(),
                }
            }
            Command::Agree => {
                let voted = self
                    .vote
                    .as_ref()
                    .is_some_and(|vote| vote.has_voted(&self.me.id));
                ensure!(self.phase == Phase::GameVote, "no game vote in progress");
                ensure!(!voted, "already voted for this game");
                Event::StartGame {
                    origin: self.me.clone(),
                }
            }
            Command::Play(choice) => {
                let round = match (self.phase, self.round.as_mut()) {
                    (Phase::MoveExchange, Some(round)) => round,
                    _ => bail!("no move exchange in progress"),
                };
                ensure!(
                    !round.commitments.contains_key(&self.me.id),
                    "already sent a move this round"
                );

                let sealed = commitment::seal(choice);
                round.own_key = Some(sealed.key);
                Event::Move {
                    origin: self.me.clone(),
                    commitment: sealed.commitment,
                }
            }
            Command::Say(text) => Event::Message {
                origin: self.me.clone(),
                text,
            },
        };

        self.emit(event);
        self.flush().await
    }

    /// Handle one of our own deadlines running out.
    pub async fn expire(&mut self, expiry: Expiry) -> anyhow::Result<()> {
        if !self.deadline.take(expiry) {
            log::debug!("ignoring stale deadline for {}", expiry.stage);
            return Ok(());
        }

        log::info!("{} timed out", expiry.stage);
        self.emit(Event::Cancel {
            origin: self.me.clone(),
            reason: expiry.stage.to_string(),
        });
        self.flush().await
    }

    fn emit(&mut self, event: Event) {
        self.outbox.push_back(event);
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        let mut result = Ok(());

        while let Some(event) = self.outbox.pop_front() {
            let published = self
                .publisher
                .publish(&event)
                .await
                .with_context(|| format!("failed to publish {:?}", event.event_type()));
            if let Err(err) = published {
                if result.is_ok() {
                    result = Err(err);
                }
            }

            self.apply(event);
        }

        result
    }

    fn apply(&mut self, event: Event) {
        match (self.phase, event) {
            (Phase::Idle, Event::StartGameVote { origin }) => {
                log::info!("{} proposed a game", origin);
                self.vote = Some(Vote::start(origin.id));
                self.phase = Phase::GameVote;

                if origin.id == self.me.id {
                    self.emit(Event::StartGame {
                        origin: self.me.clone(),
                    });
                    self.deadline.arm(Stage::GameVote);
                }
            }
            (Phase::GameVote, Event::StartGame { origin }) => self.record_vote(origin.id),
            (Phase::MoveExchange, Event::Move { origin, commitment }) => {
                self.record_commitment(origin.id, commitment)
            }
            (Phase::KeyExchange, Event::Key { origin, key }) => self.record_reveal(origin.id, key),
            (
                Phase::GameVote | Phase::MoveExchange | Phase::KeyExchange,
                Event::Cancel { origin, reason },
            ) => {
                if self.vote_author() == Some(origin.id) {
                    log::info!("{} cancelled {}", origin, reason);
                    self.reset();
                } else {
                    log::debug!("ignoring cancel from {}, not the vote author", origin);
                }
            }
            (phase, event) => {
                log::trace!("ignoring {:?} during {:?}", event.event_type(), phase)
            }
        }
    }

    fn record_vote(&mut self, id: PlayerId) {
        let Some(vote) = self.vote.as_mut() else {
            return;
        };
        vote.record(id);
        if !vote.has_quorum(&self.roster) {
            return;
        }

        self.deadline.disarm();
        vote.clear();
        let author = vote.author();
        self.round = Some(MoveRound::default());
        self.phase = Phase::MoveExchange;
        log::info!("everyone agreed, exchanging moves");

        if author == self.me.id {
            self.deadline.arm(Stage::MoveExchange);
        }
    }

    fn record_commitment(&mut self, id: PlayerId, commitment: Vec<u8>) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        round.commitments.entry(id).or_insert(commitment);
        if !covers_roster(&round.commitments, &self.roster) {
            return;
        }

        self.deadline.disarm();
        round.reveals.clear();
        let own_key = round.own_key.take();
        self.phase = Phase::KeyExchange;
        log::info!("all moves are in, revealing keys");

        match own_key {
            Some(key) => self.emit(Event::Key {
                origin: self.me.clone(),
                key,
            }),
            None => log::warn!("no move of our own to reveal"),
        }

        if self.vote_author() == Some(self.me.id) {
            self.deadline.arm(Stage::KeyExchange);
        }
    }

    fn record_reveal(&mut self, id: PlayerId, key: Vec<u8>) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        round.reveals.entry(id).or_insert(key);
        if !covers_roster(&round.reveals, &self.roster) {
            return;
        }

        self.deadline.disarm();
        let round = self.round.take().unwrap_or_default();
        self.vote = None;
        self.phase = Phase::Idle;
        self.announce(round);
    }

    /// Open every member's move and tell the room how we did.
    fn announce(&mut self, round: MoveRound) {
        let mut moves = Vec::new();
        let mut forfeited = Vec::new();
        for id in self.roster.members() {
            let (Some(commitment), Some(key)) = (round.commitments.get(&id), round.reveals.get(&id))
            else {
                continue;
            };
            match commitment::open(commitment, key) {
                Ok(choice) => moves.push((id, choice)),
                Err(err) => {
                    log::warn!("{} forfeits: {}", id.short(), err);
                    forfeited.push(id);
                }
            }
        }

        let outcome = outcome::resolve_with_forfeits(&moves, &forfeited);
        log::info!("round resolved: {:?}", outcome);

        let text = match outcome {
            Outcome::Tie => "Tie!".to_string(),
            ref decided if decided.is_winner(&self.me.id) => format!("{} won!", self.me.nick),
            _ => format!("{} lost. Maybe next time :(", self.me.nick),
        };
        self.emit(Event::Message {
            origin: self.me.clone(),
            text,
        });
    }

    fn reset(&mut self) {
        self.deadline.disarm();
        self.vote = None;
        self.round = None;
        self.phase = Phase::Idle;
    }
}

fn covers_roster(entries: &HashMap<PlayerId, Vec<u8>>, roster: &impl Roster) -> bool {
    let members = roster.members();
    !members.is_empty() && members.iter().all(|id| entries.contains_key(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<Event>>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Event> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl Publisher for Recorder {
        async fn publish(&mut self, event: &Event) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Unplugged;

    #[async_trait]
    impl Publisher for Unplugged {
        async fn publish(&mut self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("not connected")
        }
    }

    fn player(n: u8) -> Player {
        Player::new(PlayerId::from_bytes([n; 16]), format!("p{n}"))
    }

    fn roster(n: u8) -> BTreeSet<PlayerId> {
        (1..=n).map(|i| player(i).id).collect()
    }

    struct Harness {
        coordinator: Coordinator<Recorder, BTreeSet<PlayerId>>,
        sent: Recorder,
        inbox: UnboundedReceiver<Input>,
        _tx: UnboundedSender<Input>,
    }

    /// Coordinator for `player(me)` in a room of players 1..=size.
    fn harness(me: u8, size: u8) -> Harness {
        let (tx, inbox) = mpsc::unbounded_channel();
        let sent = Recorder::default();
        let coordinator = Coordinator::new(player(me), sent.clone(), roster(size), &tx);
        Harness {
            coordinator,
            sent,
            inbox,
            _tx: tx,
        }
    }

    fn start_game(n: u8) -> Event {
        Event::StartGame { origin: player(n) }
    }

    fn kinds(events: &[Event]) -> Vec<crate::event::EventType> {
        events.iter().map(Event::event_type).collect()
    }

    #[tokio::test]
    async fn lone_proposer_reaches_move_exchange() {
        let mut h = harness(1, 1);
        h.coordinator.execute(Command::ProposeGame).await.unwrap();

        assert_eq!(h.coordinator.phase(), Phase::MoveExchange);
        let sent = h.sent.take();
        assert_eq!(
            sent,
            vec![
                Event::StartGameVote { origin: player(1) },
                Event::StartGame { origin: player(1) },
            ]
        );
    }

    #[tokio::test]
    async fn quorum_needs_all_members_including_proposer() {
        for size in 2..=5u8 {
            let mut h = harness(1, size);
            h.coordinator.execute(Command::ProposeGame).await.unwrap();
            assert_eq!(h.coordinator.phase(), Phase::GameVote);

            for n in 2..size {
                h.coordinator.process(start_game(n)).await.unwrap();
                assert_eq!(h.coordinator.phase(), Phase::GameVote, "{n} of {size}");
            }
            h.coordinator.process(start_game(size)).await.unwrap();
            assert_eq!(h.coordinator.phase(), Phase::MoveExchange, "size {size}");
        }
    }

    #[tokio::test]
    async fn repeated_votes_count_once() {
        let mut h = harness(1, 3);
        h.coordinator.execute(Command::ProposeGame).await.unwrap();
        h.coordinator.process(start_game(2)).await.unwrap();
        h.coordinator.process(start_game(2)).await.unwrap();
        assert_eq!(h.coordinator.phase(), Phase::GameVote);
    }

    #[tokio::test]
    async fn follower_records_proposer_and_own_agreement() {
        let mut h = harness(2, 2);
        h.coordinator
            .process(Event::StartGameVote { origin: player(1) })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::GameVote);
        assert_eq!(h.coordinator.vote_author(), Some(player(1).id));
        assert!(h.sent.take().is_empty(), "followers do not auto-vote");

        h.coordinator.process(start_game(1)).await.unwrap();
        assert_eq!(h.coordinator.phase(), Phase::GameVote);

        h.coordinator.execute(Command::Agree).await.unwrap();
        assert_eq!(h.coordinator.phase(), Phase::MoveExchange);
        assert_eq!(h.sent.take(), vec![start_game(2)]);
    }

    #[tokio::test]
    async fn foreign_cancel_is_ignored() {
        let mut h = harness(2, 3);
        h.coordinator
            .process(Event::StartGameVote { origin: player(1) })
            .await
            .unwrap();

        h.coordinator
            .process(Event::Cancel {
                origin: player(3),
                reason: "voting for game start".into(),
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::GameVote);

        h.coordinator
            .process(Event::Cancel {
                origin: player(1),
                reason: "voting for game start".into(),
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(h.coordinator.vote_author(), None);
    }

    #[tokio::test]
    async fn foreign_cancel_is_ignored_during_exchanges() {
        let mut h = harness(2, 3);
        h.coordinator
            .process(Event::StartGameVote { origin: player(1) })
            .await
            .unwrap();
        h.coordinator.process(start_game(1)).await.unwrap();
        h.coordinator.execute(Command::Agree).await.unwrap();
        h.coordinator.process(start_game(3)).await.unwrap();
        assert_eq!(h.coordinator.phase(), Phase::MoveExchange);

        h.coordinator
            .process(Event::Cancel {
                origin: player(3),
                reason: "moves exchange".into(),
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::MoveExchange);

        h.coordinator
            .execute(Command::Play(Choice::Rock))
            .await
            .unwrap();
        for n in [1, 3] {
            h.coordinator
                .process(Event::Move {
                    origin: player(n),
                    commitment: commitment::seal(Choice::Paper).commitment,
                })
                .await
                .unwrap();
        }
        assert_eq!(h.coordinator.phase(), Phase::KeyExchange);

        h.coordinator
            .process(Event::Cancel {
                origin: player(3),
                reason: "keys exchange".into(),
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::KeyExchange);

        h.coordinator
            .process(Event::Cancel {
                origin: player(1),
                reason: "keys exchange".into(),
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(h.coordinator.vote_author(), None);
    }

    #[tokio::test]
    async fn out_of_phase_events_are_ignored() {
        let mut h = harness(1, 2);
        for event in [
            start_game(2),
            Event::Move {
                origin: player(2),
                commitment: vec![1],
            },
            Event::Key {
                origin: player(2),
                key: vec![1],
            },
            Event::Cancel {
                origin: player(2),
                reason: "x".into(),
            },
            Event::StartKickVote {
                origin: player(2),
                target: player(1),
            },
        ] {
            h.coordinator.process(event).await.unwrap();
            assert_eq!(h.coordinator.phase(), Phase::Idle);
        }
        assert!(h.sent.take().is_empty());

        // a second proposal during a vote does not replace it
        h.coordinator.execute(Command::ProposeGame).await.unwrap();
        h.coordinator
            .process(Event::StartGameVote { origin: player(2) })
            .await
            .unwrap();
        assert_eq!(h.coordinator.vote_author(), Some(player(1).id));
    }

    #[tokio::test]
    async fn invalid_commands_change_nothing() {
        let mut h = harness(1, 2);
        assert!(h.coordinator.execute(Command::Agree).await.is_err());
        assert!(h
            .coordinator
            .execute(Command::Play(Choice::Rock))
            .await
            .is_err());
        assert_eq!(h.coordinator.phase(), Phase::Idle);

        h.coordinator.execute(Command::ProposeGame).await.unwrap();
        assert!(h.coordinator.execute(Command::ProposeGame).await.is_err());
        assert!(
            h.coordinator.execute(Command::Agree).await.is_err(),
            "the proposer already agreed"
        );

        h.coordinator.process(start_game(2)).await.unwrap();
        h.coordinator
            .execute(Command::Play(Choice::Rock))
            .await
            .unwrap();
        assert!(h
            .coordinator
            .execute(Command::Play(Choice::Paper))
            .await
            .is_err());
        assert_eq!(h.coordinator.phase(), Phase::MoveExchange);
    }

    #[tokio::test(start_paused = true)]
    async fn author_deadline_cancels_exactly_once() {
        let mut h = harness(1, 2);
        h.coordinator.execute(Command::ProposeGame).await.unwrap();
        h.sent.take();

        tokio::time::sleep(PHASE_TIMEOUT).await;
        let input = h.inbox.recv().await.unwrap();
        h.coordinator.handle(input).await.unwrap();

        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(
            h.sent.take(),
            vec![Event::Cancel {
                origin: player(1),
                reason: "voting for game start".into(),
            }]
        );

        tokio::time::sleep(PHASE_TIMEOUT * 3).await;
        assert!(h.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn author_cancels_a_stalled_key_exchange() {
        let mut h = harness(1, 2);
        h.coordinator.execute(Command::ProposeGame).await.unwrap();
        h.coordinator.process(start_game(2)).await.unwrap();
        h.coordinator
            .execute(Command::Play(Choice::Lizard))
            .await
            .unwrap();
        h.coordinator
            .process(Event::Move {
                origin: player(2),
                commitment: commitment::seal(Choice::Spock).commitment,
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::KeyExchange);
        h.sent.take();

        // the other key never shows up
        tokio::time::sleep(PHASE_TIMEOUT).await;
        let input = h.inbox.recv().await.unwrap();
        h.coordinator.handle(input).await.unwrap();

        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(
            h.sent.take(),
            vec![Event::Cancel {
                origin: player(1),
                reason: "keys exchange".into(),
            }]
        );

        tokio::time::sleep(PHASE_TIMEOUT * 3).await;
        assert!(h.inbox.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn quorum_before_deadline_emits_no_cancel() {
        let mut h = harness(1, 2);
        h.coordinator.execute(Command::ProposeGame).await.unwrap();

        // the vote deadline fires but quorum lands before it is handled
        tokio::time::sleep(PHASE_TIMEOUT).await;
        let late = h.inbox.recv().await.unwrap();
        h.coordinator.process(start_game(2)).await.unwrap();
        assert_eq!(h.coordinator.phase(), Phase::MoveExchange);

        h.coordinator.handle(late).await.unwrap();
        assert_eq!(h.coordinator.phase(), Phase::MoveExchange);
        assert!(!kinds(&h.sent.take()).contains(&crate::event::EventType::Cancel));
    }

    #[tokio::test(start_paused = true)]
    async fn followers_never_time_out_on_their_own() {
        let mut h = harness(2, 2);
        h.coordinator
            .process(Event::StartGameVote { origin: player(1) })
            .await
            .unwrap();

        tokio::time::sleep(PHASE_TIMEOUT * 2).await;
        assert!(h.inbox.try_recv().is_err());
        assert_eq!(h.coordinator.phase(), Phase::GameVote);
    }

    #[tokio::test]
    async fn publish_failure_is_reported_without_rollback() {
        let (tx, _inbox) = mpsc::unbounded_channel();
        let mut coordinator = Coordinator::new(player(1), Unplugged, roster(1), &tx);

        let err = coordinator.execute(Command::ProposeGame).await.unwrap_err();
        assert!(format!("{err:#}").contains("not connected"));
        assert_eq!(coordinator.phase(), Phase::MoveExchange);
    }

    #[tokio::test]
    async fn full_round_against_one_opponent() {
        let mut h = harness(1, 2);
        h.coordinator.execute(Command::ProposeGame).await.unwrap();
        h.coordinator.process(start_game(2)).await.unwrap();
        h.coordinator
            .execute(Command::Play(Choice::Spock))
            .await
            .unwrap();
        h.sent.take();

        let theirs = commitment::seal(Choice::Scissors);
        h.coordinator
            .process(Event::Move {
                origin: player(2),
                commitment: theirs.commitment,
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::KeyExchange);

        let sent = h.sent.take();
        assert_eq!(kinds(&sent), vec![crate::event::EventType::Key]);
        assert_eq!(sent[0].origin(), &player(1));

        h.coordinator
            .process(Event::Key {
                origin: player(2),
                key: theirs.key,
            })
            .await
            .unwrap();
        assert_eq!(h.coordinator.phase(), Phase::Idle);
        assert_eq!(
            h.sent.take(),
            vec![Event::Message {
                origin: player(1),
                text: "p1 won!".into(),
            }]
        );
    }

    #[tokio::test]
    async fn unverifiable_reveal_forfeits() {
        let mut h = harness(1, 2);
        h.coordinator.execute(Command::ProposeGame).await.unwrap();
        h.coordinator.process(start_game(2)).await.unwrap();
        h.coordinator
            .execute(Command::Play(Choice::Rock))
            .await
            .unwrap();

        let theirs = commitment::seal(Choice::Paper);
        h.coordinator
            .process(Event::Move {
                origin: player(2),
                commitment: theirs.commitment,
            })
            .await
            .unwrap();
        h.sent.take();

        let forged = commitment::seal(Choice::Paper).key;
        h.coordinator
            .process(Event::Key {
                origin: player(2),
                key: forged,
            })
            .await
            .unwrap();

        // rock would have lost to paper, but the forged reveal loses outright
        assert_eq!(
            h.sent.take(),
            vec![Event::Message {
                origin: player(1),
                text: "p1 won!".into(),
            }]
        );
    }
}
