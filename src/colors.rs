//! Terminal colour control and status markers.
//!
//! `NO_COLOR` disables colour outright, `CLICOLOR_FORCE` (non-zero) forces it,
//! `CLICOLOR=0` disables it. Otherwise colour follows whether stdout is a TTY.

use colored::{ColoredString, Colorize, control};

/// Configure `colored` from the environment. Call once, early in `main`.
pub fn init_colors() {
    control::set_override(colors_enabled(
        |key| std::env::var(key).ok(),
        std::io::IsTerminal::is_terminal(&std::io::stdout()),
    ));
}

fn colors_enabled<F>(var: F, is_tty: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    if var("NO_COLOR").is_some() {
        return false;
    }
    if var("CLICOLOR_FORCE").is_some_and(|v| v != "0") {
        return true;
    }
    if var("CLICOLOR").is_some_and(|v| v == "0") {
        return false;
    }
    is_tty
}

pub fn ok() -> ColoredString {
    "✓".green()
}

pub fn fail() -> ColoredString {
    "✗".red()
}

pub fn warn() -> ColoredString {
    "⚠".yellow()
}

pub fn skip() -> ColoredString {
    "-".dimmed()
}
