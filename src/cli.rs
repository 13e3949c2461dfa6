use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "autoinsight", about = "Automated AI blog post generation")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Generate one draft post now with the stored settings
    Generate,

    /// List the selectable text models
    Models {
        /// Also query the configured custom endpoint
        #[arg(long)]
        remote: bool,
    },

    /// Show or change the generation settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage provider API keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Manage post categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Show when the next automatic post is due
    Schedule,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the stored settings as JSON
    Show,
    /// Change a single setting (lists are comma separated)
    Set { field: String, value: String },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Store an API key (prompted, not echoed)
    Set {
        /// openai, claude, gemini or stability
        vendor: String,
    },
    /// Show where each key comes from
    Status,
}

#[derive(Subcommand)]
pub enum CategoryCommands {
    /// Add a category
    Add { name: String },
    /// List categories
    List,
}
