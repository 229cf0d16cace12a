use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::player::PlayerId;

/// One of the five hand shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
    Lizard,
    Spock,
}

impl Choice {
    pub const ALL: [Choice; 5] = [
        Choice::Rock,
        Choice::Paper,
        Choice::Scissors,
        Choice::Lizard,
        Choice::Spock,
    ];

    /// Whether `self` defeats `other`.
    ///
    /// Every choice beats exactly two others and loses to the remaining two.
    /// Equal choices never beat each other; a tie is decided by the caller.
    pub fn beats(self, other: Choice) -> bool {
        use Choice::*;

        matches!(
            (self, other),
            (Rock, Scissors)
                | (Rock, Lizard)
                | (Paper, Rock)
                | (Paper, Spock)
                | (Scissors, Paper)
                | (Scissors, Lizard)
                | (Lizard, Paper)
                | (Lizard, Spock)
                | (Spock, Rock)
                | (Spock, Scissors)
        )
    }

    pub(crate) fn to_byte(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rock => "rock",
            Self::Paper => "paper",
            Self::Scissors => "scissors",
            Self::Lizard => "lizard",
            Self::Spock => "spock",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Choice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|choice| choice.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown move {s:?}, expected one of rock, paper, scissors, lizard, spock"
                )
            })
    }
}

/// Result of a round as seen by every participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Everyone picked the same shape, or three or more shapes were played.
    Tie,
    Decided {
        winner: Choice,
        loser: Choice,
        winners: Vec<PlayerId>,
        losers: Vec<PlayerId>,
    },
    /// Honest players tied among themselves but beat those whose reveal
    /// failed to open.
    Forfeit {
        winners: Vec<PlayerId>,
        losers: Vec<PlayerId>,
    },
}

impl Outcome {
    pub fn is_winner(&self, id: &PlayerId) -> bool {
        match self {
            Self::Tie => false,
            Self::Decided { winners, .. } | Self::Forfeit { winners, .. } => {
                winners.contains(id)
            }
        }
    }
}

/// Group revealed moves by shape and pick the winning group.
///
/// Only a split into exactly two shapes has a winner. Any other split is a
/// tie.
pub fn resolve(moves: &[(PlayerId, Choice)]) -> Outcome {
    let mut groups: BTreeMap<Choice, Vec<PlayerId>> = BTreeMap::new();
    for (id, choice) in moves {
        groups.entry(*choice).or_default().push(*id);
    }

    if groups.len() != 2 {
        return Outcome::Tie;
    }

    let mut groups = groups.into_iter();
    let (Some((a, a_ids)), Some((b, b_ids))) = (groups.next(), groups.next()) else {
        return Outcome::Tie;
    };

    if a.beats(b) {
        Outcome::Decided {
            winner: a,
            loser: b,
            winners: a_ids,
            losers: b_ids,
        }
    } else {
        Outcome::Decided {
            winner: b,
            loser: a,
            winners: b_ids,
            losers: a_ids,
        }
    }
}

/// Like [`resolve`], except every player in `forfeited` loses.
///
/// A round with no honest moves at all is still a tie.
pub fn resolve_with_forfeits(moves: &[(PlayerId, Choice)], forfeited: &[PlayerId]) -> Outcome {
    if forfeited.is_empty() || moves.is_empty() {
        return resolve(moves);
    }

    match resolve(moves) {
        Outcome::Decided {
            winner,
            loser,
            winners,
            mut losers,
        } => {
            losers.extend_from_slice(forfeited);
            Outcome::Decided {
                winner,
                loser,
                winners,
                losers,
            }
        }
        _ => Outcome::Forfeit {
            winners: moves.iter().map(|(id, _)| *id).collect(),
            losers: forfeited.to_vec(),
        },
    }
}
