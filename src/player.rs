use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const ID_LENGTH: usize = 16;

/// Opaque identifier of a peer in a room, chosen at random on startup.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId([u8; ID_LENGTH]);

impl PlayerId {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub const fn from_bytes(bytes: [u8; ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Hex-encoded identifier.
    pub fn digits(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(ID_LENGTH * 2), |mut output, b| {
                output.push_str(&format!("{b:02x}"));
                output
            })
    }

    /// Last 8 hex digits, enough to tell peers apart in a listing.
    pub fn short(&self) -> String {
        let digits = self.digits();
        digits[digits.len() - 8..].to_string()
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId {}", self.digits())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digits())
    }
}

impl FromStr for PlayerId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.len() != ID_LENGTH * 2 || !s.is_ascii() {
            anyhow::bail!("expected {} hex digits, got {:?}", ID_LENGTH * 2, s);
        }

        let mut bytes = [0u8; ID_LENGTH];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for PlayerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.digits())
    }
}

impl<'de> Deserialize<'de> for PlayerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let digits = String::deserialize(deserializer)?;
        digits.parse().map_err(de::Error::custom)
    }
}

/// A participant: stable identity plus a display nickname.
///
/// Two players are the same player iff their ids match; the nick is only for
/// presentation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub nick: String,
}

impl Player {
    pub fn new(id: PlayerId, nick: impl Into<String>) -> Self {
        Self {
            id,
            nick: nick.into(),
        }
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Player {}

impl Hash for Player {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nick)
    }
}
