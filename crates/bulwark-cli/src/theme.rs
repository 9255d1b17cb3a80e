//! Terminal styling for command output and approval prompts.

use bulwark_core::{RiskLevel, Timestamp};
use colored::Colorize;

/// Colored formatting helpers.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(60).dimmed().to_string()
    }

    fn risk_color(risk: RiskLevel, s: &str) -> String {
        match risk.get() {
            0..=1 => s.green().to_string(),
            2..=3 => s.yellow().to_string(),
            4 => s.red().to_string(),
            _ => s.red().bold().to_string(),
        }
    }

    /// A box tinted by risk, wide enough for the approval prompt.
    pub(crate) fn approval_box(title: &str, content: &str, risk: RiskLevel) -> String {
        const WIDTH: usize = 64;
        let inner = WIDTH.saturating_sub(2);
        let top = format!("╭{}╮", "─".repeat(inner));
        let bottom = format!("╰{}╯", "─".repeat(inner));
        let empty = format!("│{:w$}│", "", w = inner);

        let pad_line = |text: &str| -> String {
            let visible_len = strip_ansi(text).chars().count();
            let padding = WIDTH.saturating_sub(4).saturating_sub(visible_len);
            format!("│ {text}{:p$} │", "", p = padding)
        };

        let mut lines = vec![
            Self::risk_color(risk, &top),
            pad_line(&title.bold().to_string()),
            Self::risk_color(risk, &empty),
        ];
        for line in content.lines() {
            lines.push(pad_line(line));
        }
        lines.push(Self::risk_color(risk, &bottom));
        lines.join("\n")
    }

    /// `key: value` with the key in bold.
    pub(crate) fn kv(key: &str, value: &str) -> String {
        format!("{}: {}", key.bold(), value)
    }

    /// `n/5`, colored by severity.
    pub(crate) fn risk_level(level: RiskLevel) -> String {
        Self::risk_color(level, &format!("{level}/5"))
    }

    /// Format an identifier, shortened to its first eight characters.
    pub(crate) fn short_id(id: &str) -> String {
        let raw = id.rsplit(':').next().unwrap_or(id);
        let short: String = raw.chars().take(8).collect();
        format!("{}", short.cyan())
    }

    /// Format a timestamp.
    pub(crate) fn timestamp(ts: &Timestamp) -> String {
        ts.0.format("%Y-%m-%d %H:%M:%S").to_string().dimmed().to_string()
    }
}

/// Visible text only, for padding colored lines.
fn strip_ansi(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut in_escape = false;
    for c in s.chars() {
        if in_escape {
            if c.is_ascii_alphabetic() {
                in_escape = false;
            }
        } else if c == '\x1b' {
            in_escape = true;
        } else {
            result.push(c);
        }
    }
    result
}
