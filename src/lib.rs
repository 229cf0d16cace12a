use clap::Parser;
use std::net;
use url::Url;

pub mod commitment;
pub mod console;
pub mod coordinator;
pub mod event;
mod messages;
pub mod outcome;
pub mod player;
mod relay;
mod room;
pub mod roster;
pub mod timer;
pub mod vote;

pub use coordinator::{Command, Coordinator, Input, Phase, Publisher};
pub use event::{Event, EventType};
pub use outcome::{Choice, Outcome};
pub use player::{Player, PlayerId};
pub use relay::Relay;
pub use room::{RelayClient, RelayPublisher, RoomClient};
pub use roster::{Roster, SharedRoster};

#[derive(Parser, Clone)]
#[group(id = "rpsls")]
pub struct Args {
    /// Listen for UDP packets on the given address.
    #[arg(long, default_value = "[::]:0")]
    pub bind: net::SocketAddr,

    /// Connect to the given URL starting with https://
    #[arg(long)]
    pub relay_url: Url,

    /// The TLS configuration.
    #[command(flatten)]
    pub tls: moq_native_ietf::tls::Args,

    /// The namespace for the room
    #[arg(long, default_value = "rpsls")]
    pub namespace: String,

    /// The track name for the room track
    #[arg(long, default_value = "room")]
    pub track: String,
}
