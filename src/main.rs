use clap::{Parser, Subcommand};
use clefcast::logging::logger;
use clefcast::net::tcp::DEFAULT_PORT;
use clefcast::relay::gateway::Relay;
use clefcast::session::runner::SessionRunner;
use clefcast::session::{
    InputEvent, SessionEvent, SpecialAction, StaffRenderer,
};
use clefcast::trainer::note::{Clef, Pitch};
use clefcast::trainer::settings::JsonSettingsStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "clefcast",
    about = "Staff note trainer with a shared-session relay: one host plays, everyone watches"
)]
struct Cli {
    /// Also append logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server participants connect to.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value_t = default_listen_addr())]
        addr: SocketAddr,
    },
    /// Join a session: host it if the role is free, otherwise watch.
    Join {
        /// Relay address.
        #[arg(long, default_value_t = default_relay_addr())]
        addr: SocketAddr,
        /// Settings file (default: ~/.clefcast/settings.json).
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_relay_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
}

fn default_settings_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".clefcast").join("settings.json"),
        None => PathBuf::from("clefcast-settings.json"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logger::init(cli.log_file)?;

    match cli.command {
        Command::Serve { addr } => serve(addr).await,
        Command::Join { addr, settings } => {
            join(addr, settings.unwrap_or_else(default_settings_path)).await
        }
    }
}

// ── Serve ───────────────────────────────────────────────────────────────────

async fn serve(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let relay = Relay::start(addr).await?;
    println!("clefcast relay listening on {}", relay.local_addr());
    println!("press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    relay.shutdown();
    Ok(())
}

// ── Join ────────────────────────────────────────────────────────────────────

/// Text stand-in for the staff display.
struct TerminalStaff;

impl StaffRenderer for TerminalStaff {
    fn render(&mut self, clef: Clef, note: Option<Pitch>, wrong: Option<Pitch>) {
        match (note, wrong) {
            (Some(n), Some(w)) => println!("♪ [{clef}] {n}   ✗ {w}"),
            (Some(n), None) => println!("♪ [{clef}] {n}"),
            (None, _) => println!("♪ [{clef}] —"),
        }
    }
}

async fn join(addr: SocketAddr, settings: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let (input_tx, input_rx) = mpsc::channel(16);
    let (_cmd_tx, cmd_rx) = mpsc::channel(16);
    let (event_tx, mut event_rx) = mpsc::channel(64);

    let runner = SessionRunner::new(
        addr,
        Box::new(TerminalStaff),
        JsonSettingsStore::new(settings),
        input_rx,
        cmd_rx,
        event_tx,
    );
    let runner_handle = tokio::spawn(runner.run());
    spawn_stdin_input(input_tx);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = event_rx.recv() => match event {
                None => break,
                Some(event) => report(event),
            },
        }
    }

    runner_handle.abort();
    Ok(())
}

fn report(event: SessionEvent) {
    match event {
        SessionEvent::BecameHost => {
            println!("You are the host — name the notes!");
            println!("type a pitch (f#4, eb3, c/5), or \"clef\" / \"reset\"");
        }
        SessionEvent::BecameClient => {
            println!("Session already has a host — watching along.");
        }
        SessionEvent::StateChanged(state) => {
            let s = state.stats;
            println!(
                "  correct {}  wrong {}  streak {}  accuracy {}%",
                s.correct,
                s.wrong,
                s.streak,
                s.accuracy_pct()
            );
        }
        SessionEvent::ConnectionLost { reason } => {
            println!("Connection lost ({reason}); retrying…");
        }
        SessionEvent::RelayFault(message) => {
            eprintln!("!! relay error: {message}");
        }
    }
}

/// Line-based stand-in for the MIDI/keyboard input device.
fn spawn_stdin_input(tx: mpsc::Sender<InputEvent>) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            let event = match line {
                "" => continue,
                "clef" => InputEvent::Special(SpecialAction::CycleClef),
                "reset" => InputEvent::Special(SpecialAction::ResetStats),
                other => match other.parse::<Pitch>() {
                    Ok(pitch) => InputEvent::NoteIdentified(pitch),
                    Err(e) => {
                        eprintln!("{e} — try \"f#4\", \"clef\" or \"reset\"");
                        continue;
                    }
                },
            };
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
}
