use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver};
use std::thread;

use anyhow::Context;
use clap::Parser;
use hands_off::*;

#[derive(Parser, Debug)]
#[command(name = "hands-off", about = "Warns you when you touch your face")]
struct Args {
    /// Path to a YAML config file
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate the config and exit
    #[arg(long)]
    check_config: bool,
}

const HELP: &str = "commands: train <label> | run | stop | status | quit";

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.log_level.as_deref()).context("failed to set up logging")?;

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if args.check_config {
        println!("config ok: {} labels", config.labels.len());
        return Ok(());
    }

    let mut session =
        SessionController::from_config(&config).context("failed to initialize session")?;
    let printer = session.take_receiver().map(|events| {
        let undesired = config.undesired_labels();
        thread::spawn(move || print_events(events, undesired.len()))
    });
    let commands = read_commands(session.stop_handle());

    if let Some(first) = session.labels().first() {
        println!("{}", first.prompt());
        println!("then: train {}", first.name);
    }
    println!("{HELP}");

    for line in commands.iter() {
        match parse_command(&line) {
            Command::Train(name) => {
                if let Some(label) = session.labels().iter().find(|l| l.name.as_str() == name) {
                    println!("{}", label.prompt());
                }
                match session.train(name) {
                    Ok(report) if !report.completed() => {
                        println!("stopped after {} examples", report.collected)
                    }
                    Ok(_) => {}
                    Err(e) => eprintln!("train failed: {e}"),
                }
            }
            Command::Run => {
                println!("Running... (type stop to end)");
                match session.run() {
                    Ok(summary) => println!(
                        "{} frames checked, {} alerts",
                        summary.cycles, summary.audio_cues
                    ),
                    Err(e) => eprintln!("run failed: {e}"),
                }
            }
            Command::Status => {
                println!("state: {}", session.state());
                for label in session.labels() {
                    println!(
                        "  {}: {} examples",
                        label.name,
                        session.example_count(&label.name)
                    );
                }
            }
            Command::Stop | Command::Empty => {}
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
        }
    }

    session.shutdown();
    drop(session);
    if let Some(hnd) = printer {
        hnd.join().ok();
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Train(&'a str),
    Run,
    Status,
    Stop,
    Quit,
    Empty,
    Help,
}

fn parse_command(line: &str) -> Command<'_> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next()) {
        (Some("train"), Some(name)) => Command::Train(name),
        (Some("run"), None) => Command::Run,
        (Some("status"), None) => Command::Status,
        (Some("stop"), None) => Command::Stop,
        (Some("quit" | "exit"), None) => Command::Quit,
        (None, _) => Command::Empty,
        _ => Command::Help,
    }
}

/// Forwards stdin lines. Every train or run is one session phase, so the
/// reader can aim `stop`, `quit` and end of input at the latest phase it
/// has forwarded, whether or not the main loop has started it yet.
fn read_commands(stop: StopHandle) -> Receiver<String> {
    let (send, recv) = channel();
    thread::spawn(move || {
        let mut phases = 0;
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            match parse_command(&line) {
                Command::Train(_) | Command::Run => phases += 1,
                Command::Stop | Command::Quit => stop.stop_phase(phases),
                _ => {}
            }
            if send.send(line).is_err() {
                return;
            }
        }
        stop.stop_phase(phases);
    });
    recv
}

fn print_events(events: Receiver<SessionEvent>, undesired_labels: usize) {
    let mut last_undesired = None;
    for event in events.iter() {
        match event {
            SessionEvent::StateChanged(state) => println!("[{state}]"),
            SessionEvent::TrainingProgress { label, percent } => {
                println!("Training {label}... {percent}%")
            }
            SessionEvent::Classified {
                label,
                confidence,
                undesired,
            } => {
                if last_undesired != Some(undesired) {
                    match (undesired, undesired_labels > 1) {
                        (true, true) => println!("{label}! ({:.0}%)", confidence * 100.0),
                        (true, false) => println!("Touched"),
                        (false, _) => println!("Not touch"),
                    }
                    last_undesired = Some(undesired);
                }
            }
            SessionEvent::Alerted(decision) => {
                tracing::debug!(?decision, "alert dispatched");
            }
            SessionEvent::Failed(message) => eprintln!("error: {message}"),
        }
    }
}
