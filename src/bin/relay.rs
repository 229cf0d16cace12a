use anyhow::Context;
use clap::Parser;
use moq_native_ietf::quic;
use moq_transport::{coding::Tuple, serve, session::Publisher as MoqPublisher};
use std::net;

use moq_rpsls::*;

#[derive(Parser, Clone)]
pub struct Cli {
    /// Configuration options that are common to both the relay and the peers
    #[command(flatten)]
    pub common: moq_rpsls::Args,

    /// Listen for HTTP connections on the given address.
    #[arg(long, default_value = "[::]:3000")]
    pub http_bind: net::SocketAddr,
}

/// Runs one room: announces its track to the MoQ relay and takes join,
/// leave and publish requests over HTTP.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Quinn logs every packet through tracing; keep only warnings.
    let tracer = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(tracer)?;

    let config = Cli::parse();
    let tls = config.common.tls.load()?;

    let quic = quic::Endpoint::new(quic::Config {
        bind: config.common.bind,
        tls,
    })?;

    log::info!(
        "announcing room {}/{} via {}",
        config.common.namespace,
        config.common.track,
        config.common.relay_url
    );
    let session = quic.client.connect(&config.common.relay_url).await?;

    let (session, mut announcer) = MoqPublisher::connect(session)
        .await
        .context("failed to open publisher session")?;

    // a single track carries every frame of the room, in relay order
    let (mut tracks, _, announced) = serve::Tracks {
        namespace: Tuple::from_utf8_path(&config.common.namespace),
    }
    .produce();

    let room_track = tracks
        .create(&config.common.track)
        .context("failed to create room track")?;
    let relay = Relay::new(config.http_bind, room_track.groups()?);

    tokio::select! {
        res = session.run() => res.context("moq session ended")?,
        res = relay.run() => res.context("http relay stopped")?,
        res = announcer.announce(announced) => res.context("room announce failed")?,
    }

    Ok(())
}
