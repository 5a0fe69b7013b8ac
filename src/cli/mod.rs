use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "llmdock")]
#[command(about = "Run one GPU-backed Ollama container per model version")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON logs and JSON command output
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LLMDOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model catalog file
    #[arg(long, global = true, env = "LLMDOCK_CATALOG", default_value = "models.toml")]
    pub catalog: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the container daemon is reachable
    Ping,

    /// List engine containers and their status
    Ps,

    /// Engine image management
    Image {
        #[command(subcommand)]
        command: ImageCommands,
    },

    /// Show one container by name
    Get {
        /// Container name, e.g. llama2_7b
        name: String,
    },

    /// Start (or create) the container serving a model version
    Run {
        /// Model identifier from the catalog, e.g. llama2
        model: String,

        /// Parameter set, e.g. 7b
        #[arg(short, long)]
        parameters: String,
    },

    /// Stop the container serving a model version
    Stop {
        model: String,

        #[arg(short, long)]
        parameters: String,
    },

    /// Stop and delete the container serving a model version
    Rm {
        model: String,

        #[arg(short, long)]
        parameters: String,
    },

    /// Print the host port of a running model version
    Port { model: String, parameters: String },

    /// Show a container's environment, or one key of it
    Env { name: String, key: Option<String> },

    /// Recreate a container with one environment entry changed
    SetEnv {
        name: String,

        /// KEY=VALUE
        assignment: String,
    },

    /// Send one chat message to a running model version
    Chat {
        model: String,

        #[arg(short, long)]
        parameters: String,

        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,

        /// Base64 image or data URL to attach
        #[arg(long)]
        image: Option<String>,

        message: String,
    },
}

#[derive(Subcommand)]
pub enum ImageCommands {
    /// Report whether the engine image is present
    Status,
    /// Pull the engine image
    Pull,
}
