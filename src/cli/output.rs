use crate::errors::{GsError, Result};
use console::style;
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

static JSON_MODE: AtomicBool = AtomicBool::new(false);

/// Centralized output formatting utilities for consistent CLI presentation.
///
/// In JSON mode the human helpers are silent and commands emit one JSON
/// document on stdout through [`Output::json`]. Errors always go to stderr.
pub struct Output;

impl Output {
    pub fn set_json(enabled: bool) {
        JSON_MODE.store(enabled, Ordering::Relaxed);
    }

    pub fn is_json() -> bool {
        JSON_MODE.load(Ordering::Relaxed)
    }

    /// Print a value as pretty JSON on stdout
    pub fn json<T: Serialize>(value: &T) -> Result<()> {
        let rendered = serde_json::to_string_pretty(value).map_err(GsError::Json)?;
        println!("{rendered}");
        Ok(())
    }

    /// Print a success message with checkmark
    pub fn success<T: Display>(message: T) {
        if !Self::is_json() {
            println!("{} {}", style("✓").green(), message);
        }
    }

    /// Print an error message with X mark
    pub fn error<T: Display>(message: T) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    /// Print a warning message with warning emoji
    pub fn warning<T: Display>(message: T) {
        if !Self::is_json() {
            println!("{} {}", style("⚠").yellow(), message);
        }
    }

    /// Print an info message with info emoji
    pub fn info<T: Display>(message: T) {
        if !Self::is_json() {
            println!("{} {}", style("ℹ").cyan(), message);
        }
    }

    /// Print a sub-item with arrow prefix
    pub fn sub_item<T: Display>(message: T) {
        if !Self::is_json() {
            println!("  {} {}", style("→").dim(), message);
        }
    }

    /// Print a bullet point
    pub fn bullet<T: Display>(message: T) {
        if !Self::is_json() {
            println!("  {} {}", style("•").dim(), message);
        }
    }

    /// Print a section header
    pub fn section<T: Display>(title: T) {
        if !Self::is_json() {
            println!("\n{}", style(title).bold().underlined());
        }
    }

    /// Print a tip/suggestion
    pub fn tip<T: Display>(message: T) {
        if !Self::is_json() {
            println!("{} {}", style("TIP:").cyan(), style(message).dim());
        }
    }

    /// Print a plain line
    pub fn line<T: Display>(message: T) {
        if !Self::is_json() {
            println!("{message}");
        }
    }

    /// Print next steps guidance
    pub fn next_steps(steps: &[&str]) {
        if Self::is_json() {
            return;
        }
        println!();
        Self::tip("Next steps:");
        for step in steps {
            Self::bullet(step);
        }
    }

    /// Print a command example
    pub fn command_example<T: Display>(command: T) {
        if !Self::is_json() {
            println!("  {}", style(command).yellow());
        }
    }

    /// Print empty line for spacing
    pub fn spacing() {
        if !Self::is_json() {
            println!();
        }
    }
}

/// First eight characters of a commit or operation id
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
