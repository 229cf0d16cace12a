use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use moq_native_ietf::quic;
use moq_transport::{coding::Tuple, serve, session::Subscriber};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use url::Url;

use moq_rpsls::console::{self, Line};
use moq_rpsls::*;

#[derive(Parser, Clone)]
pub struct Cli {
    /// Configuration options that are common to both the relay and the peers
    #[command(flatten)]
    pub common: moq_rpsls::Args,

    /// A nickname shown to the other players
    #[arg(long)]
    pub nick: String,

    /// Base URL of the relay's HTTP endpoints
    #[arg(long, default_value = "http://localhost:3000/")]
    pub relay_http: Url,

    /// Seconds a vote or exchange may take before its author cancels it
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

/// Prints what we publish, since the room never shows it back to us.
struct Echo<P>(P);

#[async_trait]
impl<P: Publisher> Publisher for Echo<P> {
    async fn publish(&mut self, event: &Event) -> anyhow::Result<()> {
        println!("<{}> {}", event.origin(), event);
        self.0.publish(event).await
    }
}

async fn prompt(
    inbox: mpsc::UnboundedSender<Input>,
    roster: SharedRoster,
    mut events: mpsc::UnboundedReceiver<Event>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            Some(event) = events.recv() => {
                println!("<{}> {}", event.origin(), event);
                continue;
            }
            line = lines.next_line() => line.context("failed to read stdin")?,
        };

        // stdin closed
        let Some(line) = line else {
            return Ok(());
        };

        match console::parse(&line) {
            Ok(Line::Command(command)) => inbox
                .send(Input::Command(command))
                .context("coordinator stopped")?,
            Ok(Line::Peers) => {
                for player in roster.players() {
                    println!("  {} ({})", player.nick, player.id.short());
                }
            }
            Ok(Line::Help) => println!("{}", console::HELP),
            Ok(Line::Quit) => return Ok(()),
            Ok(Line::Blank) => {}
            Err(err) => eprintln!("{}", err),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Disable tracing so we don't get a bunch of Quinn spam.
    let tracer = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(tracer)?;

    let config = Cli::parse();
    let tls = config.common.tls.load()?;

    // Connect to the relay
    let quic = quic::Endpoint::new(quic::Config {
        bind: config.common.bind,
        tls,
    })?;

    log::info!("connecting to server: url={}", config.common.relay_url);
    let session = quic.client.connect(&config.common.relay_url).await?;

    let (session, mut subscriber) = Subscriber::connect(session)
        .await
        .context("failed to create MoQ Transport session")?;

    let (prod, sub) = serve::Track::new(
        Tuple::from_utf8_path(&config.common.namespace),
        config.common.track,
    )
    .produce();

    let me = Player::new(PlayerId::random(), config.nick);
    let relay = RelayClient::new(config.relay_http);
    let roster = SharedRoster::new();
    let (inbox, inputs) = mpsc::unbounded_channel();

    let mut room = RoomClient::new(me.clone(), relay.clone(), sub, roster.clone(), inbox.clone());
    let events = room.events();

    let coordinator = Coordinator::new(
        me.clone(),
        Echo(RelayPublisher::new(relay.clone(), me.id)),
        roster.clone(),
        &inbox,
    )
    .with_timeout(Duration::from_secs(config.timeout_secs));

    println!("joined as {} ({}), type /help for commands", me.nick, me.id.short());
    tokio::select! {
        res = session.run() => res.context("session error")?,
        res = room.run() => res.context("room error")?,
        res = subscriber.subscribe(prod) => res.context("room subscribe error")?,
        res = prompt(inbox, roster, events) => res.context("console error")?,
        _ = coordinator.run(inputs) => {},
    }

    if let Err(err) = relay.leave(me.id).await {
        log::warn!("{:#}", err);
    }

    Ok(())
}
