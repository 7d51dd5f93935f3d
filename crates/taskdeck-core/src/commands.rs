mod shell;

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::cli::{AddArgs, Command, EditArgs, FilterArgs};
use crate::config::Config;
use crate::controller::{Notice, NoticeLevel, Notifier, TaskCollectionController};
use crate::datetime::{DayEdge, parse_date_bound, parse_date_expr};
use crate::filter::{DateBound, FilterPatch};
use crate::remote::{MemoryStore, PostgrestStore, RemoteStore};
use crate::render::Renderer;
use crate::report;
use crate::session::Session;
use crate::store::TaskStore;
use crate::task::{NewTask, TaskPatch, TaskStatus};

pub use shell::run_shell;

/// Prints controller notices to the terminal.
///
/// One-shot commands propagate failures to `main`, so error notices are only
/// echoed when `echo_errors` is set (the interactive shell).
pub struct TerminalNotifier {
    renderer: Renderer,
    echo_errors: bool,
}

impl TerminalNotifier {
    pub fn new(renderer: Renderer, echo_errors: bool) -> Self {
        Self {
            renderer,
            echo_errors,
        }
    }
}

impl Notifier for TerminalNotifier {
    fn notify(&self, notice: Notice) {
        let written = match notice.level {
            NoticeLevel::Info => self.renderer.notice(&mut io::stdout().lock(), &notice),
            NoticeLevel::Error if self.echo_errors => {
                self.renderer.notice(&mut io::stderr().lock(), &notice)
            }
            NoticeLevel::Error => Ok(()),
        };
        if let Err(err) = written {
            debug!(error = %err, "failed writing notice");
        }
    }
}

/// Everything a command needs once the session check has passed.
pub struct Workspace {
    pub controller: TaskCollectionController,
    pub renderer: Renderer,
    pub report_dir: PathBuf,
}

impl Workspace {
    pub fn new(controller: TaskCollectionController, renderer: Renderer, report_dir: PathBuf) -> Self {
        Self {
            controller,
            renderer,
            report_dir,
        }
    }
}

/// The hosted store from `store.*` settings, or an in-process one.
#[instrument(skip(cfg))]
pub fn build_store(cfg: &Config, memory: bool) -> anyhow::Result<TaskStore> {
    let remote: Arc<dyn RemoteStore> = if memory {
        info!("using in-process task store");
        Arc::new(MemoryStore::default())
    } else {
        let url = cfg.store_url()?;
        let key = cfg.store_key()?;
        let timeout = cfg.store_timeout()?;
        info!(url = %url, timeout_secs = timeout.as_secs(), "using hosted task store");
        Arc::new(PostgrestStore::new(&url, &key, timeout)?)
    };
    Ok(TaskStore::new(remote).with_table(cfg.store_table()))
}

#[instrument(skip(workspace, session, command), fields(user = %session.username))]
pub async fn dispatch(workspace: &Workspace, session: &Session, command: Command) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, "dispatching command");

    match command {
        Command::List(filter) => cmd_list(workspace, &filter, now).await,
        Command::Add(args) => cmd_add(workspace, args, now).await,
        Command::Edit(args) => cmd_edit(workspace, args, now).await,
        Command::Start { id } => cmd_set_status(workspace, &id, TaskStatus::Running).await,
        Command::Done { id } => cmd_set_status(workspace, &id, TaskStatus::Done).await,
        Command::Reopen { id } => cmd_set_status(workspace, &id, TaskStatus::Todo).await,
        Command::Delete { id } => cmd_delete(workspace, &id).await,
        Command::Report { out, filter } => cmd_report(workspace, out.as_deref(), &filter, now).await,
        Command::Shell => {
            let stdin = io::stdin();
            run_shell(workspace, session, stdin.lock(), io::stdout()).await
        }
        Command::Login { .. } | Command::Logout => {
            Err(anyhow!("login and logout are handled before dispatch"))
        }
    }
}

/// Converts list-style flags into a filter patch. `--to` with a bare date
/// covers the whole day; `clear` removes a bound.
pub fn filter_patch(args: &FilterArgs, now: DateTime<Utc>) -> anyhow::Result<FilterPatch> {
    Ok(FilterPatch {
        status: args.status,
        date_from: date_bound(args.from.as_deref(), now, DayEdge::Start)?,
        date_to: date_bound(args.to.as_deref(), now, DayEdge::End)?,
        sort_order: args.sort,
    })
}

pub(crate) fn date_bound(raw: Option<&str>, now: DateTime<Utc>, edge: DayEdge) -> anyhow::Result<DateBound> {
    match raw.map(str::trim) {
        None => Ok(DateBound::Keep),
        Some(value) if value.eq_ignore_ascii_case("clear") => Ok(DateBound::Clear),
        Some(value) => Ok(DateBound::Set(parse_date_bound(value, now, edge)?)),
    }
}

async fn cmd_list(workspace: &Workspace, filter: &FilterArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    workspace.controller.set_filter(filter_patch(filter, now)?).await?;

    let mut out = io::stdout().lock();
    workspace
        .renderer
        .task_table(&mut out, &workspace.controller.tasks(), now)
}

async fn cmd_add(workspace: &Workspace, args: AddArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    let due_date = args
        .due
        .as_deref()
        .map(|raw| parse_date_expr(raw, now))
        .transpose()?;
    let new_task = NewTask {
        title: args.title,
        description: args.description,
        status: args.status,
        hours_spent: args.hours,
        due_date,
    };

    let task = workspace.controller.create_task(new_task).await?;
    println!("Created task {}.", task.short_id());
    Ok(())
}

async fn cmd_edit(workspace: &Workspace, args: EditArgs, now: DateTime<Utc>) -> anyhow::Result<()> {
    let id = load_and_resolve(workspace, &args.id).await?;

    let description = if args.clear_description {
        Some(None)
    } else {
        args.description.map(Some)
    };
    let due_date = if args.clear_due {
        Some(None)
    } else {
        args.due
            .as_deref()
            .map(|raw| parse_date_expr(raw, now))
            .transpose()?
            .map(Some)
    };
    let patch = TaskPatch {
        title: args.title,
        description,
        status: args.status,
        hours_spent: args.hours,
        due_date,
    };
    if patch.is_empty() {
        return Err(anyhow!("nothing to change; pass at least one field flag"));
    }

    let task = workspace.controller.update_task(id, patch).await?;
    workspace.renderer.task_info(&mut io::stdout().lock(), &task)
}

async fn cmd_set_status(workspace: &Workspace, fragment: &str, status: TaskStatus) -> anyhow::Result<()> {
    let id = load_and_resolve(workspace, fragment).await?;
    let task = workspace.controller.set_status(id, status).await?;
    println!("Task {} is {}.", task.short_id(), task.status.label());
    Ok(())
}

async fn cmd_delete(workspace: &Workspace, fragment: &str) -> anyhow::Result<()> {
    let id = load_and_resolve(workspace, fragment).await?;
    workspace.controller.delete_task(id).await?;
    Ok(())
}

async fn cmd_report(
    workspace: &Workspace,
    out: Option<&Path>,
    filter: &FilterArgs,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    workspace.controller.set_filter(filter_patch(filter, now)?).await?;
    let path = write_report(workspace, out, &mut io::stdout().lock(), now)?;
    println!("Report written to {}", path.display());
    Ok(())
}

/// Writes a report of the loaded collection and returns where it went.
pub(crate) fn write_report<W: Write>(
    workspace: &Workspace,
    target: Option<&Path>,
    out: &mut W,
    now: DateTime<Utc>,
) -> anyhow::Result<PathBuf> {
    let report = workspace.controller.report(now);
    let path = match target {
        Some(path) if path.is_dir() => path.join(&report.file_name),
        Some(path) => path.to_path_buf(),
        None => workspace.report_dir.join(&report.file_name),
    };
    report::write_pdf(&report, &path)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    workspace.renderer.report_summary(out, &report)?;
    Ok(path)
}

/// One-shot commands address tasks by id prefix, which needs a loaded
/// collection to resolve against.
async fn load_and_resolve(workspace: &Workspace, fragment: &str) -> anyhow::Result<uuid::Uuid> {
    if let Ok(id) = uuid::Uuid::parse_str(fragment.trim()) {
        return Ok(id);
    }
    workspace.controller.set_filter(FilterPatch::default()).await?;
    Ok(workspace.controller.resolve_id(fragment)?)
}

/// Reads a password line from `input`, prompting on stderr.
pub fn read_password<R: BufRead>(mut input: R) -> anyhow::Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("failed reading password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
