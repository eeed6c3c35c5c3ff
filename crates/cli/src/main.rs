use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use relay::playout::DEFAULT_MTU;
use relay::transport::UdpPacketSource;
use relay::{IngestConfig, IngestSession, PlayoutConfig, RelayError, Server, SharedTrack};

#[derive(Parser)]
#[command(
    name = "disk-relay",
    about = "Record an RTP video stream to disk and replay it to viewers"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive one RTP stream over UDP and write it to a recording
    Record {
        /// Listen address (host:port)
        #[arg(long, short, default_value = "0.0.0.0:5004")]
        listen: String,
        /// Payload type of the inbound stream
        #[arg(long, short, default_value_t = 96)]
        payload_type: u8,
        /// Directory recordings are written into
        #[arg(long, short, default_value = "recordings")]
        recordings: PathBuf,
        /// Seconds without packets before the recording is closed
        #[arg(long, default_value_t = 5)]
        idle_timeout: u64,
    },
    /// Replay an IVF recording as VP8 RTP, looping forever
    Serve {
        /// Recording to play
        #[arg(long, short, default_value = "recordings/VP8.ivf")]
        file: PathBuf,
        /// Viewer address (host:port); repeat for more viewers
        #[arg(long, short, required = true)]
        viewer: Vec<SocketAddr>,
        /// Outbound payload type
        #[arg(long, short, default_value_t = 96)]
        payload_type: u8,
        /// Largest RTP payload in bytes
        #[arg(long, default_value_t = DEFAULT_MTU)]
        mtu: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let result = match args.command {
        Command::Record {
            listen,
            payload_type,
            recordings,
            idle_timeout,
        } => {
            let config = IngestConfig {
                recordings_dir: recordings,
                idle_timeout: Duration::from_secs(idle_timeout),
                ..IngestConfig::default()
            };
            record(&listen, payload_type, config).await
        }
        Command::Serve {
            file,
            viewer,
            payload_type,
            mtu,
        } => {
            let config = PlayoutConfig {
                mtu,
                payload_type,
                ..PlayoutConfig::default()
            };
            serve(file, viewer, config).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("disk-relay: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn record(listen: &str, payload_type: u8, config: IngestConfig) -> relay::Result<()> {
    let codec = relay::find_by_payload_type(payload_type).ok_or(RelayError::UnknownPayloadType(payload_type))?;
    let source = UdpPacketSource::bind(listen, payload_type, config.idle_timeout).await?;
    let session = IngestSession::open(codec, &config)?;
    let path = session.writer().path().to_path_buf();

    println!("Recording {} to {} (Ctrl-C to stop)", codec.mime_type, path.display());

    tokio::select! {
        stats = session.run(source) => {
            let stats = stats?;
            println!(
                "Wrote {} frames from {} packets ({} key frames)",
                stats.frames_written, stats.packets, stats.keyframes
            );
        }
        _ = tokio::signal::ctrl_c() => {
            // dropping the session closes the recording
            tracing::info!("interrupted");
        }
    }
    Ok(())
}

async fn serve(file: PathBuf, viewers: Vec<SocketAddr>, config: PlayoutConfig) -> relay::Result<()> {
    config.validate()?;
    let source = relay::open_ivf(&file)?;
    let track = SharedTrack::new(source, config);
    let server = Server::bind(track).await?;

    for addr in viewers {
        server.add_viewer(addr)?;
    }

    println!("Serving {} to {} viewer(s) (Ctrl-C to stop)", file.display(), server.viewers().len());
    tokio::signal::ctrl_c().await?;

    server.shutdown().await;
    Ok(())
}
