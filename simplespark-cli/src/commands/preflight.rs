use crate::commands::orchestrator;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use simplespark_core::process::ToolCheck;
use simplespark_core::SimpleSparkConfig;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct ToolRow {
    tool: String,
    status: String,
    version: String,
}

impl From<&ToolCheck> for ToolRow {
    fn from(check: &ToolCheck) -> Self {
        Self {
            tool: check.tool.clone(),
            status: if check.available() { "ok" } else { "missing" }.to_string(),
            version: check.version.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

pub async fn handle_preflight_command(config: &SimpleSparkConfig, format: OutputFormat) -> Result<()> {
    let checks = orchestrator(config, None).preflight().await;
    let rows: Vec<ToolRow> = checks.iter().map(ToolRow::from).collect();
    if !output::print_structured(&rows, format)? {
        output::print_table(rows);
    }

    let missing: Vec<&str> = checks
        .iter()
        .filter(|c| !c.available())
        .map(|c| c.tool.as_str())
        .collect();

    if !missing.is_empty() {
        anyhow::bail!("Missing required tools: {}", missing.join(", "));
    }

    if format == OutputFormat::Table {
        output::print_success("All required tools are installed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_row() {
        let row = ToolRow::from(&ToolCheck {
            tool: "aws".to_string(),
            version: None,
        });
        assert_eq!(row.status, "missing");
        assert_eq!(row.version, "-");

        let row = ToolRow::from(&ToolCheck {
            tool: "docker".to_string(),
            version: Some("Docker version 1.13.1".to_string()),
        });
        assert_eq!(row.status, "ok");
    }
}
