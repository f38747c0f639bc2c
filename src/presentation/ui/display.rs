use colored::{Color, Colorize};
use console::Term;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::BTreeMap;
use std::io;
use std::time::Duration;

use crate::domain::entities::conflict::ConflictState;
use crate::domain::entities::operation::{OperationResult, OperationStatus};
use crate::domain::entities::operation_record::OperationRecord;
use crate::infrastructure::config::ConfigSection;

#[derive(Debug, Clone, Copy)]
enum Level {
    Ok,
    Info,
    Warn,
    Error,
}

impl Level {
    fn mark(self) -> (&'static str, Color) {
        match self {
            Self::Ok => ("✓", Color::Green),
            Self::Info => ("::", Color::Blue),
            Self::Warn => ("⚠", Color::Yellow),
            Self::Error => ("✗", Color::Red),
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// 端末への表示と入力をまとめたヘルパー
pub struct DisplayHelper {
    pub use_color: bool,
    pub terminal: Term,
}

impl DisplayHelper {
    pub fn new(use_color: bool) -> Self {
        Self {
            use_color,
            terminal: Term::stdout(),
        }
    }

    pub fn success(&self, message: &str) {
        self.notice(Level::Ok, message);
    }

    pub fn error(&self, message: &str) {
        self.notice(Level::Error, message);
    }

    pub fn warning(&self, message: &str) {
        self.notice(Level::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.notice(Level::Info, message);
    }

    /// エラーだけ stderr に出す
    fn notice(&self, level: Level, message: &str) {
        let prefix = if self.use_color {
            let (mark, color) = level.mark();
            mark.color(color).bold().to_string()
        } else {
            format!("[{}]", level.tag())
        };
        match level {
            Level::Error => eprintln!("{} {}", prefix, message),
            _ => println!("{} {}", prefix, message),
        }
    }

    pub fn section_header(&self, title: &str) {
        if self.use_color {
            println!("\n{}", title.bold().underline());
        } else {
            println!("\n=== {} ===", title);
        }
    }

    pub fn format_branch(&self, branch: &str) -> String {
        self.highlight(branch, Color::Green)
    }

    pub fn format_path(&self, path: &str) -> String {
        self.highlight(path, Color::Cyan)
    }

    fn highlight(&self, text: &str, color: Color) -> String {
        if self.use_color {
            text.color(color).to_string()
        } else {
            format!("'{}'", text)
        }
    }

    /// Spinner shown while a git command runs; hidden without colour.
    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let pb = if self.use_color {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden())
        };

        if self.use_color {
            if let Ok(style) = ProgressStyle::default_spinner()
                .tick_strings(&["⠁", "⠂", "⠄", "⡀", "⢀", "⠠", "⠐", "⠈", "✓"])
                .template("{spinner:.green} {msg}")
            {
                pb.set_style(style);
            }
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(120));
        }

        pb
    }

    pub fn print_table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if rows.is_empty() {
            return;
        }

        let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(cell.chars().count());
                }
            }
        }

        let header = headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| format!("{:<w$}", h, w = *w))
            .collect::<Vec<_>>()
            .join("  ");
        if self.use_color {
            println!("{}", header.bold());
        } else {
            println!("{}", header);
        }

        let rule = if self.use_color { "─" } else { "-" };
        println!(
            "{}",
            widths.iter().map(|w| rule.repeat(*w)).collect::<Vec<_>>().join("  ")
        );

        for row in rows {
            let line = row
                .iter()
                .enumerate()
                .map(|(i, cell)| format!("{:<w$}", cell, w = widths.get(i).copied().unwrap_or(0)))
                .collect::<Vec<_>>()
                .join("  ");
            println!("{}", line.trim_end());
        }
    }

    pub fn print_indented(&self, message: &str, level: usize) {
        let indent = "  ".repeat(level);
        println!("{}{}", indent, message);
    }

    /// y/N 確認（既定は No）
    pub fn confirm(&self, message: &str) -> io::Result<bool> {
        let prompt = if self.use_color {
            format!("{} {} [y/N]: ", "?".yellow().bold(), message)
        } else {
            format!("[CONFIRM] {} [y/N]: ", message)
        };
        self.terminal.write_str(&prompt)?;
        let input = self.terminal.read_line()?;
        Ok(is_yes(&input))
    }

    /// 1行入力
    pub fn prompt(&self, message: &str) -> io::Result<String> {
        let prompt = if self.use_color {
            format!("{} {}: ", "?".cyan().bold(), message)
        } else {
            format!("{}: ", message)
        };
        self.terminal.write_str(&prompt)?;
        Ok(self.terminal.read_line()?.trim().to_string())
    }

    pub fn status_label(&self, status: OperationStatus) -> String {
        let (icon, color) = match status {
            OperationStatus::Success => ("✓", Color::Green),
            OperationStatus::Noop => ("·", Color::BrightBlack),
            OperationStatus::Conflict => ("!", Color::Yellow),
            OperationStatus::Failure => ("✗", Color::Red),
            OperationStatus::Cancelled => ("-", Color::Magenta),
        };
        if self.use_color {
            format!("{} {}", icon, status).as_str().color(color).bold().to_string()
        } else {
            format!("[{}]", status.as_str().to_uppercase())
        }
    }

    /// 操作結果を表示
    pub fn render_result(&self, result: &OperationResult, verbose: bool) {
        self.render_result_at(result, verbose, 0);
    }

    fn render_result_at(&self, result: &OperationResult, verbose: bool, level: usize) {
        let branch = result
            .branch
            .as_deref()
            .map(|b| format!(" ({})", self.format_branch(b)))
            .unwrap_or_default();
        self.print_indented(
            &format!(
                "{} {} {}{}: {}",
                self.status_label(result.status()),
                result.kind,
                result.outcome,
                branch,
                result.message
            ),
            level,
        );

        for (key, value) in &result.metadata {
            self.print_indented(&format!("{} = {}", key, value), level + 2);
        }

        if verbose && !result.output.trim().is_empty() {
            for line in result.output.lines() {
                let line = if self.use_color {
                    line.dimmed().to_string()
                } else {
                    line.to_string()
                };
                self.print_indented(&line, level + 2);
            }
        }

        for step in &result.steps {
            self.render_result_at(step, verbose, level + 1);
        }

        if level == 0 {
            if let Some(conflict) = result.conflict_state() {
                self.render_conflict(conflict);
            }
        }
    }

    pub fn render_conflict(&self, conflict: &ConflictState) {
        self.warning(&format!(
            "conflict in {}",
            self.format_path(&conflict.repository_path.display().to_string())
        ));
        for path in &conflict.conflicted_paths {
            self.print_indented(&format!("both modified: {}", path), 2);
        }
        if conflict.choices.is_empty() {
            self.print_indented("resolve the files by hand, then `git stash drop`", 1);
        } else {
            let choices = conflict
                .choices
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(" / ");
            self.print_indented(&format!("choices: {}", choices), 1);
        }
    }

    /// 1日分の操作ログを表示
    pub fn render_records(&self, records: &[OperationRecord]) {
        if records.is_empty() {
            self.info("no operations recorded");
            return;
        }
        for record in records {
            let branch = record.branch.as_deref().unwrap_or("-");
            println!(
                "{}  {:<13} {:<24} {}  {}  {}",
                record.timestamp.format("%H:%M:%S"),
                record.operation.as_str(),
                branch,
                self.status_label(record.status),
                record.repository_path.display(),
                record.message
            );
        }
    }

    pub fn render_sections(&self, sections: &BTreeMap<String, ConfigSection>) {
        for (key, section) in sections {
            if section.description.is_empty() {
                self.section_header(key);
            } else {
                self.section_header(&format!("{} - {}", key, section.description));
            }
            let rows = section
                .configs
                .iter()
                .map(|entry| {
                    vec![
                        entry.number.to_string(),
                        entry.name.clone().or_else(|| entry.id.clone()).unwrap_or_default(),
                        entry.repo.clone(),
                        entry.base_branch.clone(),
                        entry.feature_branch.clone().unwrap_or_default(),
                    ]
                })
                .collect::<Vec<_>>();
            self.print_table(&["No", "Name", "Repository", "Base", "Feature"], &rows);
        }
    }
}

pub fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
