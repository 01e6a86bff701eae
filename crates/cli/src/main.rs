mod replay;

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::Receiver;

use rollcall_core::attendance::domain::attendance_backend::AttendanceBackend;
use rollcall_core::attendance::domain::attendance_ledger::AttendanceLedger;
use rollcall_core::attendance::domain::roster::RosterEntry;
use rollcall_core::attendance::infrastructure::http_attendance_backend::HttpAttendanceBackend;
use rollcall_core::attendance::infrastructure::in_memory_attendance_backend::InMemoryAttendanceBackend;
use rollcall_core::events::recognition_event::RecognitionEvent;
use rollcall_core::recognition::infrastructure::channel_confirmation_ui::{
    ChannelConfirmationUi, ConfirmationPrompt,
};
use rollcall_core::session::domain::session_state::StopReason;
use rollcall_core::session::frame_loop_logger::LogFrameLoopLogger;
use rollcall_core::session::session_controller::{SessionController, SessionDeps};
use rollcall_core::shared::clock::ManualClock;
use rollcall_core::shared::engine_config::EngineConfig;

use replay::{scripted_capabilities, ReplayScript};

/// Unattended attendance capture.
#[derive(Parser)]
#[command(name = "rollcall")]
struct Cli {
    /// Engine config file (defaults to the per-user config, then built-ins).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full session from a recorded script of detections.
    Replay {
        script: PathBuf,

        /// Attendance service base URL. Without it, writes go to an
        /// in-memory backend seeded with the script's roster.
        #[arg(long)]
        backend_url: Option<String>,

        /// Bearer token for the attendance service.
        #[arg(long)]
        token: Option<String>,

        /// How manual confirmations are answered.
        #[arg(long, value_enum, default_value = "ask")]
        answer: Answer,

        /// Print events as JSON lines instead of text.
        #[arg(long)]
        json: bool,

        /// Student ids never to mark (comma-separated).
        #[arg(long, value_delimiter = ',')]
        exclude: Option<Vec<String>>,
    },
    /// Fetch and print a session roster from the attendance service.
    Roster {
        #[arg(long)]
        backend_url: String,

        #[arg(long)]
        session: String,

        #[arg(long)]
        token: Option<String>,

        #[arg(long)]
        json: bool,
    },
    /// Print the effective engine configuration.
    Config,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Answer {
    Ask,
    Yes,
    No,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Replay {
            script,
            backend_url,
            token,
            answer,
            json,
            exclude,
        } => run_replay(&script, config, backend_url, token, answer, json, exclude),
        Command::Roster {
            backend_url,
            session,
            token,
            json,
        } => run_roster(&backend_url, &session, token, json),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if let Some(path) = EngineConfig::default_path() {
                eprintln!("Default config location: {}", path.display());
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::load_default()),
    }
}

fn run_replay(
    script_path: &Path,
    config: EngineConfig,
    backend_url: Option<String>,
    token: Option<String>,
    answer: Answer,
    json: bool,
    exclude: Option<Vec<String>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let script = ReplayScript::load(script_path)?;
    let state = script.session_state(token);
    let backend: Arc<dyn AttendanceBackend> = match backend_url {
        Some(url) => Arc::new(HttpAttendanceBackend::for_session(&url, &state)?),
        None => Arc::new(InMemoryAttendanceBackend::with_records(
            script.roster_records(),
        )),
    };

    let clock = Arc::new(ManualClock::new(script.session.started_at));
    let frame_count = script.frames.len();
    let (source, detector, recognizer) = scripted_capabilities(script, clock.clone());

    let (confirmation, prompts) = ChannelConfirmationUi::new(config.confirmation_timeout());
    spawn_operator(prompts, answer)?;

    let deps = SessionDeps {
        frame_source: Box::new(source),
        detector: Box::new(detector),
        recognizer: Box::new(recognizer),
        backend,
        confirmation: Box::new(confirmation),
        clock,
        on_overlay: None,
        logger: Box::new(LogFrameLoopLogger::default()),
    };
    let excluded: HashSet<String> = exclude.unwrap_or_default().into_iter().collect();

    log::info!("Replaying {frame_count} frames from {}", script_path.display());
    let handle = SessionController::start(state, config, deps, excluded)?;
    handle
        .bus()
        .subscribe_with_history(move |event| print_event(event, json));

    let exit = handle.wait_for_pipeline();
    log::info!("Frame loop ended: {exit:?}");
    handle.stop_with(StopReason::SourceExhausted);

    print_roster(&handle.roster(), json)?;
    Ok(())
}

fn run_roster(
    backend_url: &str,
    session_id: &str,
    token: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = HttpAttendanceBackend::new(backend_url, session_id, token)?;
    let ledger = AttendanceLedger::new();
    ledger.load(&backend.fetch_roster()?);
    print_roster(&ledger.roster(), json)
}

/// Answers prompts from a dedicated thread so the frame loop only ever
/// blocks on the channel.
fn spawn_operator(
    prompts: Receiver<ConfirmationPrompt>,
    answer: Answer,
) -> Result<(), Box<dyn std::error::Error>> {
    thread::Builder::new()
        .name("rollcall-operator".into())
        .spawn(move || {
            let stdin = io::stdin();
            for prompt in prompts {
                let confirmed = match answer {
                    Answer::Yes => true,
                    Answer::No => false,
                    Answer::Ask => ask(&prompt, &mut stdin.lock()),
                };
                prompt.answer(confirmed);
            }
        })?;
    Ok(())
}

fn ask(prompt: &ConfirmationPrompt, input: &mut impl BufRead) -> bool {
    let request = &prompt.request;
    eprint!(
        "Track {}: is this {} (distance {:.2})? [y/N] ",
        request.track_id, request.student_name, request.distance
    );
    let _ = io::stderr().flush();
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(_) => parse_answer(&line),
        Err(e) => {
            log::warn!("Could not read answer: {e}");
            false
        }
    }
}

fn parse_answer(line: &str) -> bool {
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_event(event: &RecognitionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("Could not serialize event: {e}"),
        }
    } else {
        println!(
            "{} [{}] {}",
            event.timestamp.format("%H:%M:%S%.3f"),
            event.event_type,
            event.message
        );
    }
}

fn print_roster(entries: &[RosterEntry], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    println!();
    println!("{:<12} {:<24} {:<8} {:<8} MARKED", "ID", "NAME", "STATUS", "METHOD");
    for entry in entries {
        let method = entry
            .method
            .map(|m| format!("{m:?}").to_lowercase())
            .unwrap_or_else(|| "-".into());
        let marked = entry
            .marked_at
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<12} {:<24} {:<8} {:<8} {marked}",
            entry.student_id,
            entry.display_name,
            entry.status.to_string(),
            method
        );
    }
    let attended = entries.iter().filter(|e| e.status.is_attended()).count();
    println!("\n{attended}/{} attended", entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[rstest]
    #[case("y\n", true)]
    #[case("YES\n", true)]
    #[case(" yes \n", true)]
    #[case("n\n", false)]
    #[case("\n", false)]
    #[case("maybe\n", false)]
    fn test_parse_answer(#[case] line: &str, #[case] expected: bool) {
        assert_eq!(parse_answer(line), expected);
    }

    #[test]
    fn test_ask_reads_one_line() {
        use rollcall_core::recognition::domain::confirmation_ui::{ConfirmationRequest, ConfirmationUi};
        use std::sync::atomic::AtomicBool;

        let (mut ui, prompts) = ChannelConfirmationUi::new(None);
        let operator = thread::spawn(move || {
            let prompt = prompts.recv().unwrap();
            let mut input = Cursor::new("y\nn\n");
            let confirmed = ask(&prompt, &mut input);
            prompt.answer(confirmed);
        });

        let request = ConfirmationRequest {
            track_id: 4,
            student_id: "s-1".into(),
            student_name: "Ada".into(),
            distance: 0.52,
        };
        assert!(ui.confirm(&request, &AtomicBool::new(false)));
        operator.join().unwrap();
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.json"))).is_err());
    }

    #[test]
    fn test_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"min_frames": 5}"#).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().min_frames, 5);
    }
}
