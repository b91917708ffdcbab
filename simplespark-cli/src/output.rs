//! Output formatting for CLI
//!
//! Every command prints through these helpers so table, JSON and YAML
//! output stay consistent.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Progress spinners only make sense for human-readable output
    pub fn is_interactive(&self) -> bool {
        *self == OutputFormat::Table
    }
}

/// Print rows as a table, or the full value as JSON/YAML
pub fn print_output<T, R>(data: &T, rows: Vec<R>, format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => print_table(rows),
        OutputFormat::Json => print_json(data)?,
        OutputFormat::Yaml => print_yaml(data)?,
    }
    Ok(())
}

/// Print a single item as JSON/YAML. Returns `false` for table output,
/// where the caller prints its own summary.
pub fn print_structured<T: Serialize>(data: &T, format: OutputFormat) -> anyhow::Result<bool> {
    match format {
        OutputFormat::Table => Ok(false),
        OutputFormat::Json => print_json(data).map(|_| true),
        OutputFormat::Yaml => print_yaml(data).map(|_| true),
    }
}

/// Print data as a table using the tabled crate
pub fn print_table<T: Tabled>(data: Vec<T>) {
    if data.is_empty() {
        println!("{}", "No machines found".yellow());
        return;
    }

    let table = Table::new(data);
    println!("{}", table);
}

/// Print data as pretty-printed JSON
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    println!("{}", json);
    Ok(())
}

/// Print data as YAML
pub fn print_yaml<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(data)?;
    println!("{}", yaml);
    Ok(())
}

/// Print a success message with green checkmark
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print an error message with red X
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message with blue i
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a warning message with yellow triangle
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Format a duration in milliseconds (e.g. "850ms", "42s", "3m 5s")
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        return format!("{}ms", ms);
    }

    let secs = ms / 1000;
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let m = secs / 60;
        let s = secs % 60;
        if s > 0 {
            format!("{}m {}s", m, s)
        } else {
            format!("{}m", m)
        }
    } else {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        if m > 0 {
            format!("{}h {}m", h, m)
        } else {
            format!("{}h", h)
        }
    }
}

/// Format megabytes into a human-readable size
pub fn format_memory_mb(mb: u64) -> String {
    if mb >= 1024 {
        format!("{:.1} GB", mb as f64 / 1024.0)
    } else {
        format!("{} MB", mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_ms() {
        assert_eq!(format_duration_ms(850), "850ms");
        assert_eq!(format_duration_ms(42_000), "42s");
        assert_eq!(format_duration_ms(185_000), "3m 5s");
        assert_eq!(format_duration_ms(120_000), "2m");
        assert_eq!(format_duration_ms(3_660_000), "1h 1m");
    }

    #[test]
    fn test_format_memory_mb() {
        assert_eq!(format_memory_mb(512), "512 MB");
        assert_eq!(format_memory_mb(6144), "6.0 GB");
    }

    #[test]
    fn test_interactive_formats() {
        assert!(OutputFormat::Table.is_interactive());
        assert!(!OutputFormat::Json.is_interactive());
    }
}
