//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use commands::{
    BuildCommand, InitCommand, MatrixCommand, PublishCommand, ReleaseCommand, ValidateCommand,
};

/// Gantry - Cross-platform build and release orchestrator for native Node.js addons
#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write a default Gantry configuration
    Init(InitCommand),

    /// List the target matrix
    Matrix(MatrixCommand),

    /// Validate configuration, target matrix and package manifest
    Validate(ValidateCommand),

    /// Build every target of the matrix
    Build(BuildCommand),

    /// Publish collected artifacts under both package identities
    Publish(PublishCommand),

    /// Build, collect and publish in one run
    Release(ReleaseCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(&self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match &self.command {
            Commands::Init(cmd) => cmd.execute(self),
            Commands::Matrix(cmd) => cmd.execute(self),
            Commands::Validate(cmd) => cmd.execute(self),
            Commands::Build(cmd) => cmd.execute(self),
            Commands::Publish(cmd) => cmd.execute(self),
            Commands::Release(cmd) => cmd.execute(self),
        }
    }

    /// Whether human-readable output should be printed
    pub fn is_text(&self) -> bool {
        self.format == OutputFormat::Text && !self.quiet
    }
}
