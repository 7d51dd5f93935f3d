use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::filter::{SortOrder, StatusFilter};
use crate::task::TaskStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "Track tasks, hours and due dates in a hosted table",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    /// rc file to load instead of ~/.taskdeckrc
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Keep tasks in process memory instead of the hosted store.
    #[arg(long = "memory", global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check the credential and start a session.
    Login {
        username: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    Logout,
    /// List tasks matching a filter.
    #[command(visible_alias = "ls")]
    List(FilterArgs),
    Add(AddArgs),
    Edit(EditArgs),
    /// Mark a task as running.
    Start { id: String },
    /// Mark a task as done.
    Done { id: String },
    /// Move a task back to todo.
    Reopen { id: String },
    #[command(visible_alias = "rm")]
    Delete { id: String },
    /// Write a PDF report of the tasks matching a filter.
    Report {
        #[arg(long)]
        out: Option<PathBuf>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Interactive session over one live task collection.
    Shell,
}

impl Command {
    pub fn needs_session(&self) -> bool {
        !matches!(self, Self::Login { .. } | Self::Logout)
    }
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterArgs {
    #[arg(long, value_parser = parse_status_filter)]
    pub status: Option<StatusFilter>,

    /// Earliest due date (inclusive).
    #[arg(long)]
    pub from: Option<String>,

    /// Latest due date (inclusive); a bare date covers the whole day.
    #[arg(long)]
    pub to: Option<String>,

    #[arg(long, value_parser = parse_sort_order)]
    pub sort: Option<SortOrder>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct AddArgs {
    pub title: String,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, value_parser = parse_task_status)]
    pub status: Option<TaskStatus>,

    #[arg(long)]
    pub hours: Option<f64>,

    #[arg(long)]
    pub due: Option<String>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct EditArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, short = 'd', conflicts_with = "clear_description")]
    pub description: Option<String>,

    #[arg(long)]
    pub clear_description: bool,

    #[arg(long, value_parser = parse_task_status)]
    pub status: Option<TaskStatus>,

    #[arg(long)]
    pub hours: Option<f64>,

    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,

    #[arg(long)]
    pub clear_due: bool,
}

fn parse_status_filter(raw: &str) -> Result<StatusFilter, String> {
    raw.parse().map_err(|err: crate::error::ValidationError| err.to_string())
}

fn parse_sort_order(raw: &str) -> Result<SortOrder, String> {
    raw.parse().map_err(|err: crate::error::ValidationError| err.to_string())
}

fn parse_task_status(raw: &str) -> Result<TaskStatus, String> {
    raw.parse().map_err(|err: crate::error::ValidationError| err.to_string())
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
