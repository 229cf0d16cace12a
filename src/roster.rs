use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::player::{Player, PlayerId};

/// Read access to the set of players currently in the room.
///
/// The coordinator asks for a fresh snapshot every time it checks a quorum,
/// so members joining or leaving mid-vote change the required count.
pub trait Roster {
    fn members(&self) -> BTreeSet<PlayerId>;
}

impl Roster for BTreeSet<PlayerId> {
    fn members(&self) -> BTreeSet<PlayerId> {
        self.clone()
    }
}

/// Roster kept up to date by the room client from relay snapshots.
#[derive(Clone, Debug, Default)]
pub struct SharedRoster {
    players: Arc<RwLock<BTreeMap<PlayerId, Player>>>,
}

impl SharedRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the membership with the relay's latest snapshot.
    pub fn replace(&self, players: Vec<Player>) {
        let mut guard = self.players.write().unwrap_or_else(PoisonError::into_inner);
        *guard = players.into_iter().map(|p| (p.id, p)).collect();
    }

    pub fn players(&self) -> Vec<Player> {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Roster for SharedRoster {
    fn members(&self) -> BTreeSet<PlayerId> {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}
