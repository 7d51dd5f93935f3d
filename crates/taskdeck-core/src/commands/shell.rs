use std::io::{
  BufRead,
  Write
};
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Utc
};
use tracing::{
  debug,
  instrument
};
use uuid::Uuid;

use super::{
  Workspace,
  date_bound,
  write_report
};
use crate::datetime::{
  DayEdge,
  parse_date_expr
};
use crate::error::CoreError;
use crate::filter::{
  DateBound,
  FilterPatch,
  SortOrder,
  StatusFilter
};
use crate::session::Session;
use crate::task::{
  NewTask,
  TaskPatch,
  TaskStatus
};

const HELP: &str = "\
commands:
  ls                         show the loaded tasks
  refresh                    fetch again with the current filter
  filter k=v ...             status=all|todo|running|done from=D to=D sort=newest|oldest
                             (from/to accept `clear`; `filter reset` restores defaults)
  add TITLE [k=v ...]        desc=TEXT status=S hours=N due=D
  edit ID k=v ...            title=TEXT desc=TEXT|clear status=S hours=N due=D|clear
  info ID
  start ID | done ID | reopen ID
  rm ID
  report [PATH]
  quit";

#[derive(Debug, Clone, PartialEq)]
enum ShellCommand {
  Empty,
  Help,
  Quit,
  List,
  Refresh,
  Filter(FilterPatch),
  Add(NewTask),
  Edit(String, TaskPatch),
  Info(String),
  Status(String, TaskStatus),
  Delete(String),
  Report(Option<PathBuf>)
}

/// Line-oriented session over the
/// workspace's controller. Mutations
/// are reconciled into the loaded
/// collection; `ls` shows it without
/// re-fetching.
#[instrument(skip_all, fields(user = %session.username))]
pub async fn run_shell<R, W>(
  workspace: &Workspace,
  session: &Session,
  mut input: R,
  mut out: W
) -> anyhow::Result<()>
where
  R: BufRead,
  W: Write
{
  if workspace
    .controller
    .refresh()
    .await
    .is_ok()
  {
    writeln!(
      out,
      "{} task(s) loaded. Type `help` \
       for commands.",
      workspace.controller.tasks().len()
    )?;
  }

  loop {
    write!(
      out,
      "{}> ",
      session.username
    )?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0
    {
      writeln!(out)?;
      break;
    }

    let now = Utc::now();
    let command =
      match parse_line(&line, now) {
        | Ok(command) => command,
        | Err(err) => {
          writeln!(out, "error: {err:#}")?;
          continue;
        }
      };
    debug!(?command, "shell command");

    if command == ShellCommand::Quit {
      break;
    }

    if let Err(err) = execute(
      workspace, command, &mut out, now
    )
    .await
    {
      // Controller failures were already
      // shown as notices.
      if err
        .downcast_ref::<CoreError>()
        .is_none()
      {
        writeln!(out, "error: {err:#}")?;
      }
    }
  }

  Ok(())
}

async fn execute<W: Write>(
  workspace: &Workspace,
  command: ShellCommand,
  out: &mut W,
  now: DateTime<Utc>
) -> anyhow::Result<()> {
  let controller = &workspace.controller;
  let renderer = &workspace.renderer;

  match command {
    | ShellCommand::Empty
    | ShellCommand::Quit => {}
    | ShellCommand::Help => {
      writeln!(out, "{HELP}")?;
    }
    | ShellCommand::List => {
      renderer.filter_line(
        out,
        &controller.filter()
      )?;
      renderer.task_table(
        out,
        &controller.tasks(),
        now
      )?;
    }
    | ShellCommand::Refresh => {
      controller.refresh().await?;
      writeln!(
        out,
        "{} task(s) loaded.",
        controller.tasks().len()
      )?;
    }
    | ShellCommand::Filter(patch) => {
      controller
        .set_filter(patch)
        .await?;
      renderer.filter_line(
        out,
        &controller.filter()
      )?;
      writeln!(
        out,
        "{} task(s) loaded.",
        controller.tasks().len()
      )?;
    }
    | ShellCommand::Add(new_task) => {
      let task = controller
        .create_task(new_task)
        .await?;
      writeln!(
        out,
        "Created task {}.",
        task.short_id()
      )?;
    }
    | ShellCommand::Edit(
      fragment,
      patch
    ) => {
      let id =
        resolve(workspace, &fragment)?;
      let task = controller
        .update_task(id, patch)
        .await?;
      renderer.task_info(out, &task)?;
    }
    | ShellCommand::Info(fragment) => {
      let id =
        resolve(workspace, &fragment)?;
      let task = controller
        .find(id)
        .ok_or_else(|| {
          anyhow!(
            "task {fragment} is not \
             loaded"
          )
        })?;
      renderer.task_info(out, &task)?;
    }
    | ShellCommand::Status(
      fragment,
      status
    ) => {
      let id =
        resolve(workspace, &fragment)?;
      let task = controller
        .set_status(id, status)
        .await?;
      writeln!(
        out,
        "Task {} is {}.",
        task.short_id(),
        task.status.label()
      )?;
    }
    | ShellCommand::Delete(fragment) => {
      let id =
        resolve(workspace, &fragment)?;
      controller.delete_task(id).await?;
    }
    | ShellCommand::Report(path) => {
      let written = write_report(
        workspace,
        path.as_deref(),
        out,
        now
      )?;
      writeln!(
        out,
        "Report written to {}",
        written.display()
      )?;
    }
  }

  Ok(())
}

/// Id lookups fail without a notice,
/// so they are reported as plain errors.
fn resolve(
  workspace: &Workspace,
  fragment: &str
) -> anyhow::Result<Uuid> {
  workspace
    .controller
    .resolve_id(fragment)
    .map_err(|err| anyhow!("{err}"))
}

fn parse_line(
  line: &str,
  now: DateTime<Utc>
) -> anyhow::Result<ShellCommand> {
  let tokens = tokenize(line)?;
  let Some((head, rest)) =
    tokens.split_first()
  else {
    return Ok(ShellCommand::Empty);
  };

  let single_id = |name: &str| {
    match rest {
      | [id] => Ok(id.clone()),
      | _ => Err(anyhow!(
        "usage: {name} ID"
      ))
    }
  };

  let command =
    match head.to_ascii_lowercase().as_str()
    {
      | "help" | "?" => ShellCommand::Help,
      | "quit" | "exit" | "q" => {
        ShellCommand::Quit
      }
      | "ls" | "list" => ShellCommand::List,
      | "refresh" => ShellCommand::Refresh,
      | "filter" => ShellCommand::Filter(
        parse_filter(rest, now)?
      ),
      | "add" => ShellCommand::Add(
        parse_new_task(rest, now)?
      ),
      | "edit" => {
        let (id, fields) = rest
          .split_first()
          .ok_or_else(|| {
            anyhow!(
              "usage: edit ID k=v ..."
            )
          })?;
        ShellCommand::Edit(
          id.clone(),
          parse_patch(fields, now)?
        )
      }
      | "info" => ShellCommand::Info(
        single_id("info")?
      ),
      | "start" => ShellCommand::Status(
        single_id("start")?,
        TaskStatus::Running
      ),
      | "done" => ShellCommand::Status(
        single_id("done")?,
        TaskStatus::Done
      ),
      | "reopen" => ShellCommand::Status(
        single_id("reopen")?,
        TaskStatus::Todo
      ),
      | "rm" | "delete" => {
        ShellCommand::Delete(single_id(
          "rm"
        )?)
      }
      | "report" => match rest {
        | [] => ShellCommand::Report(None),
        | [path] => ShellCommand::Report(
          Some(PathBuf::from(path))
        ),
        | _ => {
          return Err(anyhow!(
            "usage: report [PATH]"
          ));
        }
      },
      | other => {
        return Err(anyhow!(
          "unknown command '{other}' \
           (type `help`)"
        ));
      }
    };

  Ok(command)
}

fn parse_filter(
  args: &[String],
  now: DateTime<Utc>
) -> anyhow::Result<FilterPatch> {
  if let [only] = args
    && only.eq_ignore_ascii_case("reset")
  {
    return Ok(FilterPatch {
      status:     Some(StatusFilter::All),
      date_from:  DateBound::Clear,
      date_to:    DateBound::Clear,
      sort_order: Some(SortOrder::Newest)
    });
  }
  if args.is_empty() {
    return Err(anyhow!(
      "usage: filter k=v ... or filter \
       reset"
    ));
  }

  let mut patch = FilterPatch::default();
  for (key, value) in pairs(args)? {
    match key {
      | "status" => {
        patch.status =
          Some(value.parse()?)
      }
      | "from" => {
        patch.date_from = date_bound(
          Some(value),
          now,
          DayEdge::Start
        )?
      }
      | "to" => {
        patch.date_to = date_bound(
          Some(value),
          now,
          DayEdge::End
        )?
      }
      | "sort" => {
        patch.sort_order =
          Some(value.parse()?)
      }
      | other => {
        return Err(anyhow!(
          "unknown filter key '{other}'"
        ));
      }
    }
  }
  Ok(patch)
}

fn parse_new_task(
  args: &[String],
  now: DateTime<Utc>
) -> anyhow::Result<NewTask> {
  let mut title_words = vec![];
  let mut new_task = NewTask::default();

  for arg in args {
    let Some((key, value)) =
      arg.split_once('=')
    else {
      title_words.push(arg.as_str());
      continue;
    };
    match key {
      | "desc" | "description" => {
        new_task.description =
          Some(value.to_string())
      }
      | "status" => {
        new_task.status =
          Some(value.parse()?)
      }
      | "hours" => {
        new_task.hours_spent =
          Some(parse_hours(value)?)
      }
      | "due" => {
        new_task.due_date =
          Some(parse_date_expr(value, now)?)
      }
      | _ => title_words.push(arg.as_str())
    }
  }

  new_task.title = title_words.join(" ");
  Ok(new_task)
}

fn parse_patch(
  args: &[String],
  now: DateTime<Utc>
) -> anyhow::Result<TaskPatch> {
  let mut patch = TaskPatch::default();
  for (key, value) in pairs(args)? {
    let clear =
      value.eq_ignore_ascii_case("clear");
    match key {
      | "title" => {
        patch.title =
          Some(value.to_string())
      }
      | "desc" | "description" => {
        patch.description =
          Some((!clear).then(|| {
            value.to_string()
          }))
      }
      | "status" => {
        patch.status =
          Some(value.parse()?)
      }
      | "hours" => {
        patch.hours_spent =
          Some(parse_hours(value)?)
      }
      | "due" => {
        patch.due_date = Some(if clear {
          None
        } else {
          Some(parse_date_expr(value, now)?)
        })
      }
      | other => {
        return Err(anyhow!(
          "unknown field '{other}'"
        ));
      }
    }
  }
  if patch.is_empty() {
    return Err(anyhow!(
      "usage: edit ID k=v ..."
    ));
  }
  Ok(patch)
}

fn pairs(
  args: &[String]
) -> anyhow::Result<Vec<(&str, &str)>> {
  args
    .iter()
    .map(|arg| {
      arg.split_once('=').ok_or_else(|| {
        anyhow!(
          "expected key=value, got \
           '{arg}'"
        )
      })
    })
    .collect()
}

fn parse_hours(
  raw: &str
) -> anyhow::Result<f64> {
  raw.trim().parse::<f64>().map_err(|_| {
    anyhow!("hours must be a number, got '{raw}'")
  })
}

/// Splits on whitespace; double quotes
/// group words and are removed.
fn tokenize(
  line: &str
) -> anyhow::Result<Vec<String>> {
  let mut tokens = vec![];
  let mut current = String::new();
  let mut in_token = false;
  let mut quoted = false;

  for ch in line.chars() {
    match ch {
      | '"' => {
        quoted = !quoted;
        in_token = true;
      }
      | c if c.is_whitespace()
        && !quoted =>
      {
        if in_token {
          tokens.push(std::mem::take(
            &mut current
          ));
          in_token = false;
        }
      }
      | c => {
        current.push(c);
        in_token = true;
      }
    }
  }

  if quoted {
    return Err(anyhow!(
      "unterminated quote"
    ));
  }
  if in_token {
    tokens.push(current);
  }
  Ok(tokens)
}
