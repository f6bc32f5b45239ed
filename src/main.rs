//! Speechtide - hotkey-driven voice dictation
//!
//! Run with `speechtide` or `speechtide daemon` to start the daemon.
//! Use `speechtide config --init` to create a config file.
//! Use `speechtide record start/stop` from compositor keybindings.

use clap::Parser;
use speechtide::cli::{Cli, Commands, RecordAction};
use speechtide::config::{self, BackendKind, Config, OutputMode};
use speechtide::session::log::{SessionLog, SqliteLogStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("speechtide={},warn", log_level))),
        )
        .with_target(false)
        .init();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref())?;

    // Apply CLI overrides
    if cli.tap {
        config.hotkey.mode = config::ActivationMode::Tap;
    }
    if cli.streaming {
        config.backend.kind = BackendKind::Streaming;
    }
    if cli.batch {
        config.backend.kind = BackendKind::Batch;
    }
    if cli.clipboard {
        config.output.mode = OutputMode::Clipboard;
    }

    match cli.command.unwrap_or(Commands::Daemon) {
        Commands::Daemon => {
            let mut daemon = speechtide::daemon::Daemon::new(config);
            daemon.run().await?;
        }

        Commands::Config { init } => {
            show_config(&config, init)?;
        }

        Commands::Sessions { count } => {
            list_sessions(&config, count)?;
        }

        Commands::Record { action } => {
            send_record_signal(action)?;
        }
    }

    Ok(())
}

/// Print the active configuration, optionally writing the default file
fn show_config(config: &Config, init: bool) -> anyhow::Result<()> {
    if init {
        match Config::default_path() {
            Some(path) if !path.exists() => {
                config::write_default_config(&path)?;
                println!("Wrote default config to {:?}", path);
            }
            Some(path) => {
                println!("Config already exists at {:?}", path);
            }
            None => {
                anyhow::bail!("Could not determine config directory");
            }
        }
        return Ok(());
    }

    if let Some(path) = Config::default_path() {
        let exists = if path.exists() { "" } else { " (not written yet)" };
        println!("# Config file: {:?}{}\n", path, exists);
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

/// List recent entries from the session log
fn list_sessions(config: &Config, count: usize) -> anyhow::Result<()> {
    let dir = config.resolve_log_dir();
    let log = SessionLog::new(Box::new(SqliteLogStore::open(&dir)?))?;
    let entries = log.recent(count)?;

    if entries.is_empty() {
        println!("No sessions recorded yet.");
        return Ok(());
    }

    for entry in entries {
        println!(
            "#{:<5} {}  {:>6.1}s  {:<5} {:<9}  {}",
            entry.seq,
            entry.started_at.format("%Y-%m-%d %H:%M:%S"),
            entry.duration_ms as f64 / 1000.0,
            entry.mode.to_string(),
            entry.backend.to_string(),
            entry.title
        );
    }
    Ok(())
}

/// Signal a running daemon via its PID file
#[cfg(target_os = "linux")]
fn send_record_signal(action: RecordAction) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = speechtide::daemon::read_daemon_pid()
        .ok_or_else(|| anyhow::anyhow!("Daemon not running (no PID file). Start with: speechtide"))?;

    let signal = match action {
        RecordAction::Start => Signal::SIGUSR1,
        RecordAction::Stop => Signal::SIGUSR2,
    };

    kill(Pid::from_raw(pid as i32), signal)
        .map_err(|e| anyhow::anyhow!("Failed to signal daemon (pid {}): {}", pid, e))?;

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn send_record_signal(_action: RecordAction) -> anyhow::Result<()> {
    anyhow::bail!("`speechtide record` is only supported on Linux")
}
