use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "wolfpack", about = "Realtime venue chat and presence from the terminal")]
pub struct Cli {
    /// Path to config file (default: ./wolfpack.toml, then the user config dir)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Join a session and chat over stdin
    Chat {
        /// Session code (e.g. ABC123) or canonical id
        session: String,
        /// Display name shown to other members
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Report whether input is a canonical id, a session code, or invalid
    CheckHandle { handle: String },
}
