use std::collections::HashSet;

use crate::player::PlayerId;
use crate::roster::Roster;

/// Agreement collected for a proposal made by `author`.
///
/// Only current roster members count toward the quorum; a vote recorded
/// from someone who has since left the room is kept but ignored.
#[derive(Clone, Debug)]
pub struct Vote {
    author: PlayerId,
    voted: HashSet<PlayerId>,
}

impl Vote {
    /// The author is not counted until their own agreement is recorded.
    pub fn start(author: PlayerId) -> Self {
        Self {
            author,
            voted: HashSet::new(),
        }
    }

    pub fn author(&self) -> PlayerId {
        self.author
    }

    /// Returns false if `id` had already voted.
    pub fn record(&mut self, id: PlayerId) -> bool {
        self.voted.insert(id)
    }

    pub fn has_voted(&self, id: &PlayerId) -> bool {
        self.voted.contains(id)
    }

    pub fn count(&self) -> usize {
        self.voted.len()
    }

    pub fn clear(&mut self) {
        self.voted.clear();
    }

    pub fn has_quorum(&self, roster: &impl Roster) -> bool {
        let members = roster.members();
        !members.is_empty() && members.iter().all(|id| self.voted.contains(id))
    }
}
