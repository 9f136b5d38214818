pub mod commands;
pub mod output;

use crate::errors::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::config::ConfigAction;
use commands::stack::StackAction;
use output::Output;

#[derive(Parser)]
#[command(name = "gs")]
#[command(about = "GhostStack - stacked branches with resumable sync and undo")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize repository for GhostStack
    Init {
        /// Trunk branch (defaults to the configured trunk, then the current branch)
        #[arg(long)]
        trunk: Option<String>,

        /// Force initialization even if already initialized
        #[arg(long)]
        force: bool,
    },

    /// Stack management
    Stack {
        #[command(subcommand)]
        action: StackAction,
    },

    /// Show repository status
    Status,

    /// Show the operation log, newest first
    Log {
        /// Show at most this many operations
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Reverse an operation (defaults to the most recent one)
    Undo {
        /// Operation id or unique prefix
        id: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        self.setup_logging();
        Output::set_json(self.json);
        if self.no_color {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }

        match self.command {
            Commands::Init { trunk, force } => commands::init::run(trunk, force).await,
            Commands::Stack { action } => commands::stack::run(action).await,
            Commands::Status => commands::status::run().await,
            Commands::Log { limit } => commands::log::run(limit).await,
            Commands::Undo { id, yes } => commands::undo::run(id, yes).await,
            Commands::Config { action } => commands::config::run(action).await,
            Commands::Completions { shell } => commands::completions::generate_completions(shell),
        }
    }

    fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        };

        // stdout belongs to command output
        let subscriber = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(level)
            .with_target(false)
            .without_time();

        if self.no_color {
            subscriber.with_ansi(false).init();
        } else {
            subscriber.init();
        }
    }
}
