//! Colored terminal reporting. Progress lines go to stdout with a
//! `[stage]` prefix; warnings and errors go to stderr so they survive
//! output redirection in scripts.

use colored::{ColoredString, Colorize};
use std::fmt::Display;

/// Prints a progress line for a pipeline stage, e.g. `[parse] 42 posts`.
pub fn info(stage: &str, message: impl Display) {
    println!("{} {}", prefix(stage), message);
}

/// Prints a permissive-mode degradation. Strict mode promotes these to
/// fatal errors before they ever reach this function.
pub fn warn(message: impl Display) {
    eprintln!("{} {}", "[warn]".bright_yellow().bold(), message);
}

/// Prints a fatal error. The caller is responsible for exiting with the
/// matching code.
pub fn error(message: impl Display) {
    eprintln!("{} {}", "[error]".bright_red().bold(), message);
}

fn prefix(stage: &str) -> ColoredString {
    format!("[{}]", stage).bright_blue().bold()
}
