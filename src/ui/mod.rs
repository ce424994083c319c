//! Terminal output for the CLI

pub mod report;
pub mod table;

pub use report::{render_migration, render_table_heading};

use owo_colors::Style;
use std::sync::OnceLock;

static PALETTE: OnceLock<Palette> = OnceLock::new();

/// Styles for schema changes and command status
#[derive(Debug, Clone)]
pub struct Palette {
    /// Created tables and added columns
    pub added: Style,
    /// Dropped columns
    pub removed: Style,
    /// Stale columns and type drift
    pub attention: Style,
    pub failure: Style,
    /// Table names
    pub table: Style,
}

impl Palette {
    pub fn new(colored: bool) -> Self {
        if !colored {
            return Self {
                added: Style::new(),
                removed: Style::new(),
                attention: Style::new(),
                failure: Style::new(),
                table: Style::new(),
            };
        }
        Self {
            added: Style::new().green(),
            removed: Style::new().red(),
            attention: Style::new().yellow(),
            failure: Style::new().red().bold(),
            table: Style::new().cyan().bold(),
        }
    }
}

/// Palette for this process, colored only when the terminal supports it
pub fn palette() -> &'static Palette {
    PALETTE.get_or_init(|| Palette::new(console::colors_enabled()))
}

/// Report a finished command
pub fn done(message: &str) {
    println!("{} {}", palette().added.style("✔"), message);
}

/// Report something the user should look at. Goes to stderr so piped output
/// stays clean.
pub fn notice(message: &str) {
    eprintln!("{} {}", palette().attention.style("!"), message);
}

/// Report a failed command with its full cause chain
pub fn fail(err: &anyhow::Error) {
    eprintln!("{} {:#}", palette().failure.style("error:"), err);
}
