// Command-line interface definitions for speechtide
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "speechtide")]
#[command(author, version, about = "Hotkey-driven voice dictation daemon")]
#[command(long_about = "
Speechtide is a hotkey-driven voice dictation tool.
Hold a key chord to record (or tap to toggle), speak, and the transcribed
text is typed at the cursor position.

SETUP:
  1. Run: speechtide config --init (to create the config file)
  2. Set backend.endpoint and SPEECHTIDE_API_KEY for your service
  3. Install wtype (typing) or wl-clipboard (clipboard fallback)
  4. Run: speechtide (to start the daemon)
  5. Bind your compositor keys to `speechtide record start/stop`
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Use tap mode (press to start/stop) instead of hold-to-record
    #[arg(long)]
    pub tap: bool,

    /// Force the streaming backend
    #[arg(long, conflicts_with = "batch")]
    pub streaming: bool,

    /// Force the batch backend
    #[arg(long)]
    pub batch: bool,

    /// Force clipboard output (don't try to type)
    #[arg(long)]
    pub clipboard: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as daemon (default if no command specified)
    Daemon,

    /// Show current configuration
    Config {
        /// Write the default config file if it doesn't exist
        #[arg(long)]
        init: bool,
    },

    /// List recent sessions from the session log
    Sessions {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },

    /// Control recording from external sources (compositor keybindings, scripts)
    Record {
        #[command(subcommand)]
        action: RecordAction,
    },
}

#[derive(Subcommand)]
pub enum RecordAction {
    /// Start recording (send SIGUSR1 to the daemon)
    Start,
    /// Stop recording and transcribe (send SIGUSR2 to the daemon)
    Stop,
}
