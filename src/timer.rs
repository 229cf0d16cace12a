use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinHandle;

use crate::coordinator::Input;

/// How long the author waits for a vote or exchange to complete.
pub const PHASE_TIMEOUT: Duration = Duration::from_secs(10);

/// The phase a deadline guards; shown to peers as the cancel reason.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    GameVote,
    MoveExchange,
    KeyExchange,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Self::GameVote => "voting for game start",
            Self::MoveExchange => "moves exchange",
            Self::KeyExchange => "keys exchange",
        };
        write!(f, "{what}")
    }
}

/// Delivered to the inbox when a deadline runs out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expiry {
    generation: u64,
    pub stage: Stage,
}

/// One-shot deadline that reports back through the coordinator inbox.
///
/// Every `arm` starts a new generation. An expiry only counts if it belongs
/// to the generation that is still armed, so a timer that fires after its
/// phase was superseded does nothing.
pub struct Deadline {
    timeout: Duration,
    inbox: WeakUnboundedSender<Input>,
    generation: u64,
    armed: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Holds the inbox weakly so a pending deadline does not keep the
    /// coordinator loop alive.
    pub fn new(timeout: Duration, inbox: &UnboundedSender<Input>) -> Self {
        Self {
            timeout,
            inbox: inbox.downgrade(),
            generation: 0,
            armed: None,
        }
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn arm(&mut self, stage: Stage) {
        self.disarm();
        self.generation += 1;

        let expiry = Expiry {
            generation: self.generation,
            stage,
        };
        let timeout = self.timeout;
        let inbox = self.inbox.clone();

        log::debug!("deadline armed: stage={} timeout={:?}", stage, timeout);
        self.armed = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(Input::Expired(expiry));
            }
        }));
    }

    pub fn disarm(&mut self) {
        if let Some(task) = self.armed.take() {
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Consume `expiry` if it belongs to the armed generation.
    pub fn take(&mut self, expiry: Expiry) -> bool {
        if self.armed.is_none() || expiry.generation != self.generation {
            return false;
        }
        self.armed = None;
        true
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.disarm();
    }
}
