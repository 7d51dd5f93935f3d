//! Printable task report: a summary block followed by one section per task.

use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument};
use serde::Serialize;
use tracing::{debug, info, instrument};
use unicode_width::UnicodeWidthChar;

use crate::datetime::project_timezone;
use crate::task::{Task, TaskStatus};

pub const REPORT_TITLE: &str = "Task Report";

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 15.0;
const LINE_HEIGHT_MM: f32 = 6.5;
const PT_TO_MM: f32 = 0.3528;
/// Average Helvetica advance as a fraction of the font size.
const AVG_GLYPH_EM: f32 = 0.55;
pub const DEFAULT_LINES_PER_PAGE: usize = 40;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSection {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub hours_spent: f64,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub title: String,
    pub file_name: String,
    pub generated_at: DateTime<Utc>,
    pub summary: Summary,
    pub sections: Vec<TaskSection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Title,
    Heading,
    TaskTitle,
    Detail,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub style: LineStyle,
    pub text: String,
}

impl Line {
    fn new(style: LineStyle, text: impl Into<String>) -> Self {
        Self {
            style,
            text: text.into(),
        }
    }

    fn blank() -> Self {
        Self::new(LineStyle::Blank, "")
    }

    /// Splits `text` on newlines and wraps each piece to the text column.
    fn wrapped(style: LineStyle, text: &str) -> Vec<Line> {
        let budget = style.columns();
        let mut lines: Vec<Line> = text
            .lines()
            .flat_map(|piece| wrap(piece.trim_end(), budget))
            .map(|text| Self::new(style, text))
            .collect();
        if lines.is_empty() {
            lines.push(Self::new(style, ""));
        }
        lines
    }
}

impl LineStyle {
    pub fn font_size(self) -> f32 {
        match self {
            Self::Title => 24.0,
            Self::Heading => 16.0,
            Self::TaskTitle => 14.0,
            Self::Detail | Self::Blank => 12.0,
        }
    }

    /// How many average-width characters fit across the text column.
    pub fn columns(self) -> usize {
        let text_width = PAGE_WIDTH_MM - 2.0 * MARGIN_MM;
        let glyph = self.font_size() * PT_TO_MM * AVG_GLYPH_EM;
        ((text_width / glyph) as usize).max(1)
    }
}

/// Greedy word wrap to `budget` display columns. Words wider than a line are
/// broken mid-word.
fn wrap(text: &str, budget: usize) -> Vec<String> {
    let mut lines = vec![];
    let mut current = String::new();
    let mut width = 0;

    for word in text.split_whitespace() {
        let word_width: usize = word.chars().map(|c| c.width().unwrap_or(0)).sum();
        if width > 0 && width + 1 + word_width <= budget {
            current.push(' ');
            current.push_str(word);
            width += 1 + word_width;
            continue;
        }
        if width > 0 {
            lines.push(std::mem::take(&mut current));
            width = 0;
        }
        for c in word.chars() {
            let w = c.width().unwrap_or(0);
            if width + w > budget && width > 0 {
                lines.push(std::mem::take(&mut current));
                width = 0;
            }
            current.push(c);
            width += w;
        }
    }
    if width > 0 || lines.is_empty() {
        lines.push(current);
    }
    lines
}

pub type Page = Vec<Line>;

/// Builds the report for a snapshot of tasks, in collection order.
///
/// Only `file_name` depends on `generated_at`.
pub fn generate(tasks: &[Task], generated_at: DateTime<Utc>) -> Report {
    let completed = tasks.iter().filter(|t| t.status == TaskStatus::Done).count();

    Report {
        title: REPORT_TITLE.to_string(),
        file_name: report_file_name(generated_at),
        generated_at,
        summary: Summary {
            total: tasks.len(),
            completed,
            pending: tasks.len() - completed,
            total_hours: sum_hours(tasks.iter().map(|t| t.hours_spent)),
        },
        sections: tasks.iter().map(section_for).collect(),
    }
}

pub fn report_file_name(generated_at: DateTime<Utc>) -> String {
    let date = generated_at.with_timezone(project_timezone()).format("%Y-%m-%d");
    format!("task-report-{date}.pdf")
}

/// Sums in ascending order so the total does not depend on input order.
fn sum_hours(hours: impl Iterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = hours.filter(|h| h.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values.into_iter().sum()
}

fn section_for(task: &Task) -> TaskSection {
    TaskSection {
        title: task.title.clone(),
        description: task
            .description
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string),
        status: task.status,
        hours_spent: task.hours_spent,
        due_date: task.due_date.map(format_due_date),
    }
}

pub fn format_due_date(due: DateTime<Utc>) -> String {
    due.with_timezone(project_timezone())
        .format("%b %d, %Y")
        .to_string()
}

pub fn format_hours(hours: f64) -> String {
    if hours.fract() == 0.0 {
        format!("{hours:.0}")
    } else {
        let text = format!("{hours:.2}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

impl Report {
    fn header_block(&self) -> Vec<Line> {
        let mut lines = Line::wrapped(LineStyle::Title, &self.title);
        lines.extend([
            Line::blank(),
            Line::new(LineStyle::Heading, "Summary"),
            Line::new(LineStyle::Detail, format!("Total Tasks: {}", self.summary.total)),
            Line::new(
                LineStyle::Detail,
                format!("Completed Tasks: {}", self.summary.completed),
            ),
            Line::new(LineStyle::Detail, format!("Pending Tasks: {}", self.summary.pending)),
            Line::new(
                LineStyle::Detail,
                format!("Total Hours Spent: {}", format_hours(self.summary.total_hours)),
            ),
            Line::blank(),
        ]);
        lines
    }

    fn section_block(section: &TaskSection) -> Vec<Line> {
        let mut lines = Line::wrapped(LineStyle::TaskTitle, &section.title);
        if let Some(description) = section.description.as_deref() {
            lines.extend(Line::wrapped(
                LineStyle::Detail,
                &format!("Description: {description}"),
            ));
        }
        lines.push(Line::new(LineStyle::Detail, format!("Status: {}", section.status.label())));
        lines.push(Line::new(
            LineStyle::Detail,
            format!("Hours Spent: {}", format_hours(section.hours_spent)),
        ));
        if let Some(due) = section.due_date.as_deref() {
            lines.push(Line::new(LineStyle::Detail, format!("Due Date: {due}")));
        }
        lines.push(Line::blank());
        lines
    }

    /// Splits the report into pages of at most `lines_per_page` lines.
    ///
    /// A task section moves to the next page rather than being split, unless
    /// the section alone is longer than a page.
    pub fn layout(&self, lines_per_page: usize) -> Vec<Page> {
        let lines_per_page = lines_per_page.max(1);
        let mut pages: Vec<Page> = vec![];
        let mut current: Page = vec![];

        let blocks = std::iter::once(self.header_block())
            .chain(self.sections.iter().map(Self::section_block));

        for block in blocks {
            if !current.is_empty() && current.len() + block.len() > lines_per_page {
                pages.push(std::mem::take(&mut current));
            }
            for line in block {
                if current.len() == lines_per_page {
                    pages.push(std::mem::take(&mut current));
                }
                current.push(line);
            }
        }
        if !current.is_empty() {
            pages.push(current);
        }
        pages
    }
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

/// Renders the report onto A4 pages using the built-in Helvetica fonts.
#[instrument(skip(report), fields(sections = report.sections.len()))]
pub fn render_pdf(report: &Report) -> anyhow::Result<Vec<u8>> {
    let lines_per_page = (((PAGE_HEIGHT_MM - 2.0 * MARGIN_MM) / LINE_HEIGHT_MM) as usize).max(1);
    let pages = report.layout(lines_per_page.min(DEFAULT_LINES_PER_PAGE));

    let (doc, first_page, first_layer) = PdfDocument::new(
        report.title.as_str(),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let fonts = Fonts {
        regular: doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| anyhow!("failed loading Helvetica: {e:?}"))?,
        bold: doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| anyhow!("failed loading Helvetica-Bold: {e:?}"))?,
    };

    for (index, page) in pages.iter().enumerate() {
        let (page_ref, layer_ref) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1")
        };
        let layer = doc.get_page(page_ref).get_layer(layer_ref);

        let mut y = PAGE_HEIGHT_MM - MARGIN_MM;
        for line in page {
            let font = match line.style {
                LineStyle::Title | LineStyle::Heading | LineStyle::TaskTitle => &fonts.bold,
                LineStyle::Detail | LineStyle::Blank => &fonts.regular,
            };
            if line.style != LineStyle::Blank && !line.text.is_empty() {
                layer.use_text(
                    line.text.clone(),
                    line.style.font_size(),
                    Mm(MARGIN_MM),
                    Mm(y),
                    font,
                );
            }
            y -= LINE_HEIGHT_MM;
        }
    }

    debug!(pages = pages.len(), "rendered report pages");
    doc.save_to_bytes()
        .map_err(|e| anyhow!("failed serializing PDF: {e:?}"))
}

/// Renders and writes the report to `path`.
pub fn write_pdf(report: &Report, path: &Path) -> anyhow::Result<()> {
    let bytes = render_pdf(report)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    info!(file = %path.display(), "wrote task report");
    Ok(())
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

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 12, 0, 0).single().expect("valid")
    }

    #[test]
    fn empty_collection_yields_zero_summary() {
        let report = generate(&[], now());
        assert_eq!(
            report.summary,
            Summary {
                total: 0,
                completed: 0,
                pending: 0,
                total_hours: 0.0
            }
        );
        assert!(report.sections.is_empty());
        assert_eq!(report.layout(DEFAULT_LINES_PER_PAGE).len(), 1);
    }

    #[test]
    fn summary_counts_done_against_everything_else() {
        let tasks = vec![
            task("a", TaskStatus::Done, 1.5),
            task("b", TaskStatus::Running, 2.0),
            task("c", TaskStatus::Todo, 0.0),
        ];
        let report = generate(&tasks, now());

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.pending, 2);
        assert_eq!(report.summary.total_hours, 3.5);
        let titles: Vec<_> = report.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, ["a", "b", "c"]);
    }

    #[test]
    fn total_hours_ignores_order() {
        let mut tasks = vec![
            task("a", TaskStatus::Todo, 0.1),
            task("b", TaskStatus::Todo, 0.2),
            task("c", TaskStatus::Todo, 0.3),
            task("d", TaskStatus::Todo, 1e16),
        ];
        let forward = generate(&tasks, now()).summary.total_hours;
        tasks.reverse();
        let backward = generate(&tasks, now()).summary.total_hours;
        assert_eq!(forward.to_bits(), backward.to_bits());
    }

    #[test]
    fn file_name_and_sections_are_deterministic() {
        let tasks = vec![task("a", TaskStatus::Done, 1.0)];
        let first = generate(&tasks, now());
        let second = generate(&tasks, now());
        assert_eq!(first, second);
        assert!(first.file_name.starts_with("task-report-2026-05-"));
        assert!(first.file_name.ends_with(".pdf"));
    }

    #[test]
    fn section_renders_optional_fields_only_when_present() {
        let mut with_details = task("a", TaskStatus::Todo, 0.0);
        with_details.description = Some("notes".to_string());
        with_details.due_date = Some(Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).single().expect("valid"));
        let report = generate(&[with_details, task("b", TaskStatus::Todo, 0.0)], now());

        let detailed = Report::section_block(&report.sections[0]);
        assert!(detailed.iter().any(|l| l.text == "Description: notes"));
        assert!(detailed.iter().any(|l| l.text.starts_with("Due Date: Mar ")));

        let plain = Report::section_block(&report.sections[1]);
        assert!(!plain.iter().any(|l| l.text.starts_with("Description")));
        assert!(!plain.iter().any(|l| l.text.starts_with("Due Date")));
    }

    #[test]
    fn layout_keeps_sections_whole() {
        let tasks: Vec<Task> = (0..10)
            .map(|i| task(&format!("task {i}"), TaskStatus::Todo, 1.0))
            .collect();
        let report = generate(&tasks, now());
        let pages = report.layout(12);

        assert!(pages.len() > 1);
        assert!(pages.iter().all(|p| p.len() <= 12));
        for page in &pages[1..] {
            assert_eq!(page[0].style, LineStyle::TaskTitle);
        }
        let sections: usize = pages
            .iter()
            .flatten()
            .filter(|l| l.style == LineStyle::TaskTitle)
            .count();
        assert_eq!(sections, 10);
    }

    #[test]
    fn long_titles_and_multiline_descriptions_wrap() {
        let mut long = task(&"x".repeat(255), TaskStatus::Todo, 0.0);
        long.description = Some("line one\nline two ".repeat(20));
        let report = generate(&[long], now());

        let block = Report::section_block(&report.sections[0]);
        let titles = block.iter().filter(|l| l.style == LineStyle::TaskTitle).count();
        assert!(titles >= 255 / LineStyle::TaskTitle.columns());
        for line in &block {
            assert!(!line.text.contains('\n'), "{line:?}");
            assert!(line.text.chars().count() <= line.style.columns(), "{line:?}");
        }
        assert!(block.iter().any(|l| l.text == "Description: line one"));

        let pages = report.layout(12);
        let laid_out: usize = pages.iter().map(Vec::len).sum();
        assert_eq!(laid_out, report.header_block().len() + block.len());
        assert!(pages.iter().all(|p| p.len() <= 12));
    }

    #[test]
    fn wrap_prefers_word_boundaries() {
        assert_eq!(wrap("alpha beta gamma", 11), ["alpha beta", "gamma"]);
        assert_eq!(wrap("abcdefgh", 3), ["abc", "def", "gh"]);
        assert_eq!(wrap("", 10), [""]);
    }

    #[test]
    fn hours_format_drops_trailing_zeros() {
        assert_eq!(format_hours(3.0), "3");
        assert_eq!(format_hours(2.5), "2.5");
        assert_eq!(format_hours(0.25), "0.25");
    }

    #[test]
    fn renders_pdf_bytes() {
        let report = generate(&[task("a", TaskStatus::Done, 1.0)], now());
        let bytes = render_pdf(&report).expect("render");
        assert!(bytes.starts_with(b"%PDF"));
    }
}
