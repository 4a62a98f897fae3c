//! Terminal client for GhostShare rooms.
//!
//! Lines typed on stdin are sent as chat. `/send <path>` sends a file,
//! `/history` lists transfers, `/quit` leaves the room.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ghostshare_client::config::normalize_signaling_url;
use ghostshare_client::signaling::SignalingClient;
use ghostshare_client::transfer::{DirectorySinks, Direction, HistoryEntry, Sender, TransferStatus};
use ghostshare_client::webrtc_peer::WebRtcTransportFactory;
use ghostshare_client::{ClientConfig, Command, RoomSession, SessionEvent};
use ghostshare_shared::RoomId;

#[derive(Parser, Debug)]
#[command(name = "ghostshare", version, about = "Share files and chat with one peer")]
struct Cli {
    /// Room to join. A new room id is generated when omitted.
    room: Option<String>,

    /// Signaling broker URL (overrides SIGNALING_URL)
    #[arg(long)]
    server: Option<String>,

    /// Where received files are written (overrides DOWNLOAD_DIR)
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// STUN server URL (overrides STUN_SERVER)
    #[arg(long)]
    stun: Option<String>,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Quit,
    History,
    Send(Command),
}

/// Trimming only decides which command a line is. Chat text is sent as typed.
fn parse_line(line: &str) -> Option<Input> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed == "/quit" {
        Some(Input::Quit)
    } else if trimmed == "/history" {
        Some(Input::History)
    } else if let Some(path) = trimmed.strip_prefix("/send ") {
        Some(Input::Send(Command::SendFile(PathBuf::from(path.trim()))))
    } else {
        Some(Input::Send(Command::SendChat(line.to_string())))
    }
}

fn format_size(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}

fn print_history(history: &[HistoryEntry]) {
    if history.is_empty() {
        println!("no transfers yet");
        return;
    }
    for entry in history {
        let when = chrono::DateTime::from_timestamp_millis(entry.timestamp)
            .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
            .unwrap_or_default();
        let arrow = match entry.direction {
            Direction::Sent => "->",
            Direction::Received => "<-",
        };
        println!("{when} {arrow} {} ({})", entry.file_name, format_size(entry.file_size));
    }
}

fn render(event: &SessionEvent, history: &mut Vec<HistoryEntry>) {
    match event {
        SessionEvent::Registered { id } => info!(id = %id.short(), "Registered"),
        SessionEvent::Joined { room, peers } => {
            println!("joined room {room}");
            if *peers == 0 {
                println!("waiting for a peer, share the room id: {room}");
            }
        }
        SessionEvent::RoomFull { room } => println!("room {room} is full"),
        SessionEvent::PeerConnected { peer } => println!("peer {} connected", peer.short()),
        SessionEvent::PeerDisconnected { peer } => println!("peer {} disconnected", peer.short()),
        SessionEvent::Transfer { session: Some(s), .. } => match s.status {
            TransferStatus::Uploading => println!("sending {} {}%", s.file_name, s.progress),
            TransferStatus::Downloading => println!("receiving {} {}%", s.file_name, s.progress),
            TransferStatus::Completed => println!("{} done", s.file_name),
            TransferStatus::Aborted => println!("{} aborted", s.file_name),
            TransferStatus::Idle => {}
        },
        SessionEvent::Transfer { session: None, .. } => {}
        SessionEvent::Chat(message) => {
            let who = match message.sender {
                Sender::Me => "me",
                Sender::Peer => "peer",
            };
            println!("[{who}] {}", message.text);
        }
        SessionEvent::History(entry) => history.push(entry.clone()),
        SessionEvent::Error(e) => eprintln!("error: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ghostshare_client=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(server) = cli.server {
        config.signaling_url = normalize_signaling_url(&server);
    }
    if let Some(dir) = cli.download_dir {
        config.download_dir = dir;
    }
    if let Some(stun) = cli.stun {
        config.stun_server = stun;
    }
    let room = cli.room.map(RoomId).unwrap_or_else(RoomId::generate);
    info!(?config, room = %room, "Starting GhostShare client");

    let signaling = SignalingClient::connect(&config.signaling_url)
        .await
        .context("connecting to signaling broker")?;
    let transports =
        WebRtcTransportFactory::new(&config.stun_server).context("setting up WebRTC")?;
    let sinks = DirectorySinks::new(config.download_dir.clone());

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (commands, commands_rx) = mpsc::channel(16);
    let session = RoomSession::new(
        room,
        signaling,
        Arc::new(transports),
        Arc::new(sinks),
        events_tx,
    );
    let mut session_task = tokio::spawn(session.run(commands_rx));

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut history = Vec::new();

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    let _ = commands.send(Command::Leave).await;
                    break;
                };
                match parse_line(&line) {
                    Some(Input::Quit) => {
                        let _ = commands.send(Command::Leave).await;
                        break;
                    }
                    Some(Input::History) => print_history(&history),
                    Some(Input::Send(command)) => {
                        let _ = commands.send(command).await;
                    }
                    None => {}
                }
            }
            Some(event) = events.recv() => render(&event, &mut history),
            result = &mut session_task => {
                while let Ok(event) = events.try_recv() {
                    render(&event, &mut history);
                }
                result??;
                return Ok(());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving room");
                let _ = commands.send(Command::Leave).await;
                break;
            }
        }
    }

    session_task.await??;
    while let Ok(event) = events.try_recv() {
        render(&event, &mut history);
    }
    Ok(())
}
