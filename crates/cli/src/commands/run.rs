//! Single-cycle execution for external schedulers

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use surge_lib::{CycleError, CycleReport, HealthRegistry, SurgeWatch};
use tabled::Tabled;

use crate::config::load_watch_config;
use crate::output::{color_bool, format_ts, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled, serde::Serialize)]
struct ReportRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Run one watch cycle; a failed cycle exits non-zero
pub async fn run_once(config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
    let config = load_watch_config(config_path)?;

    let health = HealthRegistry::new();
    health.register_all().await;
    let watch = SurgeWatch::from_config(&config, health)?;

    match watch.run_cycle().await {
        Ok(report) => {
            print_report(&report, format);
            Ok(())
        }
        Err(CycleError::Busy { key }) => {
            print_warning(&format!("Another cycle holds {}, skipped", key));
            Ok(())
        }
        Err(e) => Err(e).context("Watch cycle failed"),
    }
}

fn print_report(report: &CycleReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            println!("{}", "Watch Cycle".bold());
            let rows = vec![
                ReportRow {
                    field: "Samples",
                    value: report.samples.to_string(),
                },
                ReportRow {
                    field: "Increases",
                    value: report.detected.to_string(),
                },
                ReportRow {
                    field: "New",
                    value: report.fresh.to_string(),
                },
                ReportRow {
                    field: "Alerted",
                    value: color_bool(report.alerted),
                },
                ReportRow {
                    field: "Details",
                    value: report.details.to_string(),
                },
                ReportRow {
                    field: "Watermark",
                    value: report
                        .watermark
                        .as_ref()
                        .map(format_ts)
                        .unwrap_or_else(|| "-".to_string()),
                },
                ReportRow {
                    field: "Archived",
                    value: format!(
                        "{} written, {} failed",
                        report.archive.written, report.archive.failed
                    ),
                },
            ];
            print_table(&rows, format);
        }
    }
}
