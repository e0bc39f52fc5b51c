use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Offline-first tasks and notes with snapshot sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Synchronize with the configured server
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Inspect the offline write queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Show or change sync settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Keep syncing in the foreground until interrupted
    Daemon,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task
    #[command(alias = "new")]
    Add {
        /// Task title
        title: Vec<String>,
        /// Due date (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        due: Option<NaiveDate>,
    },
    /// List tasks
    List {
        /// Include completed tasks
        #[arg(short, long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a task as done
    Done {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// Reopen a completed task
    Reopen {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// Change a task title
    Rename {
        /// Task ID or unique ID prefix
        id: String,
        /// New title
        title: Vec<String>,
    },
    /// Delete a task
    Delete {
        /// Task ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Create a note
    #[command(alias = "new")]
    Add {
        /// Note content
        content: Vec<String>,
        /// Optional title
        #[arg(long)]
        title: Option<String>,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace a note's content
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// New content
        content: Vec<String>,
    },
    /// Delete a note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Push and pull the full snapshot once (default)
    Now,
    /// Sync a single collection with conflict tracking
    Collection {
        #[arg(value_enum)]
        collection: SyncedCollection,
    },
    /// Show sync settings and per-collection state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recorded sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SyncedCollection {
    Tasks,
    Notes,
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check connectivity and replay pending operations
    Flush,
    /// Discard every pending operation
    Clear,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current sync settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change one sync setting
    Set {
        #[arg(value_enum)]
        key: ConfigKey,
        value: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigKey {
    Role,
    ServerUrl,
    Interval,
    Enabled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
