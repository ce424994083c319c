//! Migration report rendering

use super::palette;
use crate::migrate::MigrationReport;

/// One line per schema change, then a summary line
pub fn render_migration(report: &MigrationReport) -> String {
    let palette = palette();
    let mut lines = Vec::new();

    for table in &report.created_tables {
        lines.push(format!("{} table {}", palette.added.style("+"), palette.table.style(table)));
    }
    for change in &report.added_columns {
        lines.push(format!("{} {}.{}", palette.added.style("+"), change.table, change.column));
    }
    for change in &report.dropped_columns {
        lines.push(format!(
            "{} {}.{} (column and data dropped)",
            palette.removed.style("-"),
            change.table,
            change.column
        ));
    }
    for change in &report.stale_columns {
        lines.push(format!(
            "{} {}.{} is no longer declared; kept (use --drop-stale to remove)",
            palette.attention.style("?"),
            change.table,
            change.column
        ));
    }
    for drift in &report.type_drift {
        lines.push(format!(
            "{} {}.{} is stored as {} but declared {}",
            palette.attention.style("~"),
            drift.table,
            drift.column,
            drift.actual,
            drift.declared
        ));
    }

    lines.push(match report.ddl_count() {
        0 => "schema already up to date".to_string(),
        1 => "1 schema change applied".to_string(),
        n => format!("{} schema changes applied", n),
    });
    lines.join("\n")
}

/// Heading printed above a table's column listing
pub fn render_table_heading(table: &str, rows: usize) -> String {
    let noun = if rows == 1 { "row" } else { "rows" };
    format!("{} ({} {})", palette().table.style(table), rows, noun)
}
