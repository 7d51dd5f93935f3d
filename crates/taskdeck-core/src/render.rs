use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::controller::{Notice, NoticeLevel};
use crate::datetime::format_project_datetime;
use crate::filter::FilterSpec;
use crate::report::{Report, format_due_date, format_hours};
use crate::task::{Task, TaskStatus};

const TITLE_COLUMN_MAX: usize = 48;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let raw = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match raw.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    #[tracing::instrument(skip(self, out, tasks, now), fields(count = tasks.len()))]
    pub fn task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks found.")?;
            return Ok(());
        }

        let headers = ["ID", "Status", "Hours", "Due", "Title"]
            .map(str::to_string)
            .to_vec();

        let rows = tasks
            .iter()
            .map(|task| {
                let due = match task.due_date {
                    Some(due) if due < now && task.status != TaskStatus::Done => {
                        self.paint(&format_due_date(due), "31")
                    }
                    Some(due) => format_due_date(due),
                    None => String::new(),
                };
                vec![
                    self.paint(&task.short_id(), "33"),
                    self.status_cell(task.status),
                    format_hours(task.hours_spent),
                    due,
                    truncate(&task.title, TITLE_COLUMN_MAX),
                ]
            })
            .collect();

        write_table(&mut *out, headers, rows)?;
        writeln!(out, "{} task(s)", tasks.len())?;
        Ok(())
    }

    pub fn task_info<W: Write>(&self, out: &mut W, task: &Task) -> anyhow::Result<()> {
        writeln!(out, "id           {}", task.id)?;
        writeln!(out, "title        {}", task.title)?;
        if let Some(description) = &task.description {
            writeln!(out, "description  {description}")?;
        }
        writeln!(out, "status       {}", self.status_cell(task.status))?;
        writeln!(out, "hours        {}", format_hours(task.hours_spent))?;
        if let Some(due) = task.due_date {
            writeln!(out, "due          {}", format_due_date(due))?;
        }
        writeln!(out, "created      {}", format_project_datetime(task.created_at))?;
        writeln!(out, "updated      {}", format_project_datetime(task.updated_at))?;
        Ok(())
    }

    pub fn filter_line<W: Write>(&self, out: &mut W, filter: &FilterSpec) -> anyhow::Result<()> {
        let bound = |value: Option<DateTime<Utc>>| {
            value
                .map(format_project_datetime)
                .unwrap_or_else(|| "-".to_string())
        };
        writeln!(
            out,
            "filter: status={} from={} to={} sort={}",
            filter.status,
            bound(filter.date_from),
            bound(filter.date_to),
            filter.sort_order
        )?;
        Ok(())
    }

    pub fn report_summary<W: Write>(&self, out: &mut W, report: &Report) -> anyhow::Result<()> {
        let summary = &report.summary;
        writeln!(
            out,
            "{} tasks, {} completed, {} pending, {} hours",
            summary.total,
            summary.completed,
            summary.pending,
            format_hours(summary.total_hours)
        )?;
        Ok(())
    }

    pub fn notice<W: Write>(&self, out: &mut W, notice: &Notice) -> io::Result<()> {
        let title = match notice.level {
            NoticeLevel::Info => self.paint(&notice.title, "32"),
            NoticeLevel::Error => self.paint(&notice.title, "31"),
        };
        writeln!(out, "{title}: {}", notice.description)
    }

    fn status_cell(&self, status: TaskStatus) -> String {
        match status {
            TaskStatus::Todo => status.label().to_string(),
            TaskStatus::Running => self.paint(status.label(), "36"),
            TaskStatus::Done => self.paint(status.label(), "32"),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn truncate(text: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + 1 > max_width {
            break;
        }
        width += ch_width;
        out.push(ch);
    }
    out.push('…');
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let padding = width.saturating_sub(visible_width(cell));
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn visible_width(cell: &str) -> usize {
    UnicodeWidthStr::width(strip_ansi(cell).as_str())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            escaped = ch != 'm';
            continue;
        }
        if ch == '\x1b' {
            escaped = true;
            continue;
        }
        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    fn task(title: &str, status: TaskStatus, hours: f64) -> Task {
        let at = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).single().expect("valid");
        Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            status,
            hours_spent: hours,
            due_date: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn render_table(tasks: &[Task]) -> String {
        let mut out = Vec::new();
        Renderer::plain()
            .task_table(&mut out, tasks, Utc::now())
            .expect("render");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn table_aligns_columns_and_counts_rows() {
        let text = render_table(&[
            task("Write spec", TaskStatus::Todo, 0.0),
            task("Ship it", TaskStatus::Done, 2.5),
        ]);
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].starts_with("ID "));
        assert!(lines[1].starts_with("---"));
        assert!(lines[2].contains("To Do"));
        assert!(lines[3].contains("2.5"));
        assert_eq!(lines.last().copied(), Some("2 task(s)"));
        let title_col = lines[0].find("Title").expect("title header");
        assert_eq!(lines[2].find("Write spec"), Some(title_col));
    }

    #[test]
    fn empty_table_says_so() {
        assert_eq!(render_table(&[]), "No tasks found.\n");
    }

    #[test]
    fn long_titles_are_truncated() {
        let long = "x".repeat(100);
        let cut = truncate(&long, 10);
        assert_eq!(UnicodeWidthStr::width(cut.as_str()), 10);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[31mlate\x1b[0m"), "late");
    }
}
