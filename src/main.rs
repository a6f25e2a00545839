// Консольный клиент pairchat: без камеры и микрофона, только чат и сигнализация.

use anyhow::{Context, Result};
use clap::Parser;
use pairchat_lib::config::{ClientConfig, DEFAULT_LOG_LEVEL};
use pairchat_lib::logger::{init_logging, Notice};
use pairchat_lib::{connect_silent, SessionHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Parser, Debug)]
#[command(name = "pairchat")]
#[command(about = "Talk to a random stranger", long_about = None)]
#[command(version)]
struct Cli {
    /// HTTP address of the matching server
    #[arg(short, long, env = "PAIRCHAT_SERVER", default_value = "http://127.0.0.1:8001")]
    server: String,
    /// Comma separated interests used for matching
    #[arg(short, long, env = "PAIRCHAT_INTERESTS", value_delimiter = ',')]
    interests: Vec<String>,
    /// Log level (RUST_LOG wins when set)
    #[arg(long, env = "PAIRCHAT_LOG", default_value = DEFAULT_LOG_LEVEL)]
    log: String,
    /// Fixed client id instead of a generated one
    #[arg(long)]
    id: Option<String>,
    /// Print server statistics and exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let config = ClientConfig {
        server_url: cli.server,
        interests: cli.interests,
        identity_hint: cli.id,
        ..Default::default()
    };
    let (coordinator, handle, api) =
        connect_silent(config).context("invalid server address")?;

    if cli.stats {
        let stats = api.fetch_stats().await.context("failed to fetch stats")?;
        println!(
            "{} online, {} waiting, {} active rooms",
            stats.online_users, stats.waiting_users, stats.active_rooms
        );
        return Ok(());
    }

    println!("You are {}", coordinator.identity());
    tokio::spawn(print_notices(handle.notices()));
    let mut run = tokio::spawn(coordinator.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !dispatch(&handle, line.trim()) {
                        break;
                    }
                }
                // stdin закрыт
                Ok(None) | Err(_) => break,
            },
            finished = &mut run => {
                return finished
                    .context("session task panicked")?
                    .context("session ended");
            }
        }
    }

    handle.disconnect();
    run.await
        .context("session task panicked")?
        .context("session ended")?;
    Ok(())
}

/// false, если пора выходить
fn dispatch(handle: &SessionHandle, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/skip" => {
            handle.skip();
        }
        "/mute" => {
            handle.toggle_audio();
        }
        "/video" => {
            handle.toggle_video();
        }
        _ => {
            if let Some(reason) = line.strip_prefix("/report") {
                let reason = reason.trim();
                handle.report(if reason.is_empty() { "inappropriate" } else { reason });
            } else {
                handle.send_chat_message(line);
            }
        }
    }
    true
}

async fn print_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        match notices.recv().await {
            Ok(Notice::Waiting) => println!("* Looking for someone to talk to..."),
            Ok(Notice::Connected) => println!("* Connected to a stranger. Say hi!"),
            Ok(Notice::PeerLeft) => println!("* Stranger has disconnected"),
            Ok(Notice::ConnectionProblem) => println!("* Connection problems..."),
            Ok(Notice::ConnectionRecovering) => println!("* Trying to recover the connection"),
            Ok(Notice::ConnectionFailed) => println!("* Connection lost, finding someone new"),
            Ok(Notice::RemoteTrack(kind)) => println!("* Stranger shares {:?}", kind),
            Ok(Notice::Message(entry)) => println!("Stranger: {}", entry.text),
            Ok(Notice::Error(text)) => eprintln!("! {text}"),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
