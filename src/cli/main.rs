use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use exif_strip::config;
use exif_strip::pipeline::{BatchEvent, BatchSummary, Outcome, ProcessResult, ReportSink};
use exif_strip::queue::IngestQueue;
use exif_strip::undo::UndoSession;

#[derive(Parser, Debug)]
#[command(
    name = "exif-strip",
    version,
    about = "Strip EXIF and XMP metadata from JPEG and PNG files in place"
)]
struct Cli {
    /// Image files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Output results as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Keep reading paths and restore commands from stdin
    #[arg(short, long)]
    interactive: bool,

    /// Do not keep session backups (no undo)
    #[arg(long = "no-backup")]
    no_backup: bool,

    /// Override the debounce window in milliseconds
    #[arg(long = "debounce-ms", value_name = "MS")]
    debounce_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() && !cli.interactive {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    // Load config, CLI flags win
    let mut config = config::Config::load(cli.config.as_deref())?;
    if cli.json {
        config.output.json = true;
    }
    if cli.no_backup {
        config.backup.enabled = false;
    }
    if let Some(ms) = cli.debounce_ms {
        config.queue.debounce_ms = ms;
    }

    let undo = if config.backup.enabled {
        let base = config.backup_base();
        UndoSession::purge_stale(&base);
        let session = UndoSession::new(&base).context("Failed to start backup session")?;
        log::debug!("Backups in {}", session.session_root().display());
        Some(Arc::new(session))
    } else {
        log::info!("Backups disabled, strips cannot be undone");
        None
    };

    let sink = Arc::new(TerminalSink {
        json: config.output.json,
        // One-shot runs discard their backups on exit.
        show_restore: cli.interactive,
    });
    let queue = IngestQueue::new(config.debounce(), undo.clone(), sink);

    if !cli.paths.is_empty() {
        queue.enqueue(cli.paths.clone());
    }
    if cli.interactive {
        interactive(&queue, undo.as_deref()).await?;
    }

    queue.wait_idle().await;
    queue.shutdown().await;

    if let Some(undo) = undo {
        if !undo.is_empty() {
            log::info!("Discarding {} backup(s)", undo.len());
        }
        undo.cleanup();
    }

    Ok(())
}

// ANSI color codes
const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Prints batch progress to stdout, as text or JSON lines.
struct TerminalSink {
    json: bool,
    show_restore: bool,
}

impl ReportSink for TerminalSink {
    fn report(&self, event: &BatchEvent) {
        match event {
            BatchEvent::Started { files, .. } if !self.json => {
                println!("{BOLD}Processing {files} file(s):{RESET}");
            }
            BatchEvent::NoValidFiles { .. } if !self.json => println!("No valid files."),
            BatchEvent::Processed(result) => self.print_result(result),
            BatchEvent::Finished(summary) => self.print_summary(summary),
            _ => {}
        }
    }
}

impl TerminalSink {
    fn print_result(&self, result: &ProcessResult) {
        if self.json {
            match serde_json::to_string(result) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("Failed to serialize result: {e}"),
            }
            return;
        }

        let color = match result.outcome {
            Outcome::Removed => GREEN,
            Outcome::Error => RED,
            _ => DIM,
        };
        if self.show_restore && result.restorable {
            println!("{color}{result}{RESET}  {DIM}[Restore original]{RESET}");
        } else {
            println!("{color}{result}{RESET}");
        }
    }

    fn print_summary(&self, summary: &BatchSummary) {
        if self.json {
            match serde_json::to_string(&serde_json::json!({ "summary": summary })) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("Failed to serialize summary: {e}"),
            }
        } else {
            println!("{BOLD}{summary}{RESET}");
        }
    }
}

/// One line of interactive input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Empty,
    Quit,
    Restore(&'a str),
    RestoreFolder(&'a str),
    Unknown(&'a str),
    Path(PathBuf),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix(':') else {
        // Terminals quote dropped paths that contain spaces.
        return Input::Path(PathBuf::from(unquote(line)));
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, unquote(arg.trim())),
        None => (command, ""),
    };
    match name {
        "q" | "quit" | "exit" => Input::Quit,
        "restore" if !arg.is_empty() => Input::Restore(arg),
        "restore-folder" if !arg.is_empty() => Input::RestoreFolder(arg),
        _ => Input::Unknown(line),
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix(['"', '\''])
        .and_then(|rest| rest.strip_suffix(['"', '\'']))
        .unwrap_or(s)
}

async fn interactive(queue: &IngestQueue, undo: Option<&UndoSession>) -> Result<()> {
    println!(
        "Enter files or folders, one per line. \
         Commands: :restore <file>, :restore-folder <dir>, :quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Quit => break,
            Input::Restore(target) => restore_file(undo, target),
            Input::RestoreFolder(dir) => restore_folder(undo, dir),
            Input::Unknown(cmd) => log::warn!("Unknown command: {cmd}"),
            Input::Path(path) => queue.enqueue(vec![path]),
        }
    }

    Ok(())
}

/// Restore by full path, or by the display string printed on a result line.
fn restore_file(undo: Option<&UndoSession>, target: &str) {
    let restored = undo.is_some_and(|undo| {
        let path = Path::new(target);
        let original = if undo.has_backup(path) {
            Some(path.to_path_buf())
        } else {
            undo.resolve_by_suffix(target)
        };
        original.is_some_and(|original| undo.restore(&original))
    });

    if restored {
        println!("{GREEN}[Restored original]{RESET} [{target}]");
    } else {
        println!("{RED}[Restore not available]{RESET} [{target}]");
    }
}

fn restore_folder(undo: Option<&UndoSession>, dir: &str) {
    let count = undo.map_or(0, |undo| undo.restore_folder(Path::new(dir)));
    if count > 0 {
        println!("{GREEN}[Restored original]{RESET} [{count} file(s) in {dir}]");
    } else {
        println!("{RED}[Restore not available]{RESET} [{dir}]");
    }
}
