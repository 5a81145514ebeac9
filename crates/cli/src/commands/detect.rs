//! Offline increase detection over a series file

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use surge_lib::anomaly::{dedupe, detect_increases, Alerter};
use surge_lib::{parse_timestamp, Sample, Scope};
use tabled::Tabled;

use crate::output::{color_delta, format_ts, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct IncreaseRow {
    #[tabled(rename = "From")]
    prev_ts: String,
    #[tabled(rename = "To")]
    curr_ts: String,
    #[tabled(rename = "Count")]
    counts: String,
    #[tabled(rename = "Rise")]
    delta: String,
}

#[derive(Serialize)]
struct DetectSummary<'a> {
    samples: usize,
    detected: usize,
    fresh: &'a [surge_lib::AnomalyEvent],
    watermark: Option<String>,
}

/// Read samples from a JSON file
pub fn load_series(path: &Path) -> Result<Vec<Sample>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn detect_file(
    path: &Path,
    watermark: Option<&str>,
    payload: bool,
    format: OutputFormat,
) -> Result<()> {
    let samples = load_series(path)?;
    let watermark = watermark
        .map(|raw| parse_timestamp(raw).with_context(|| format!("Invalid watermark {:?}", raw)))
        .transpose()?;

    let detected = detect_increases(&samples);
    let detected_count = detected.len();
    let outcome = dedupe(detected, watermark);

    if payload {
        let alerter = Alerter::new(&Scope::Account("preview".to_string()));
        print_json(&alerter.build_payload(&outcome.fresh, &[])?);
        return Ok(());
    }

    match format {
        OutputFormat::Json => print_json(&DetectSummary {
            samples: samples.len(),
            detected: detected_count,
            fresh: &outcome.fresh,
            watermark: outcome.watermark.as_ref().map(format_ts),
        }),
        OutputFormat::Table => {
            println!(
                "{} samples, {} increases, {} new",
                samples.len(),
                detected_count,
                outcome.fresh.len().to_string().bold()
            );
            let rows: Vec<IncreaseRow> = outcome
                .fresh
                .iter()
                .map(|e| IncreaseRow {
                    prev_ts: format_ts(&e.prev_timestamp),
                    curr_ts: format_ts(&e.curr_timestamp),
                    counts: format!("{} → {}", e.prev_count, e.curr_count),
                    delta: color_delta(e.prev_count, e.curr_count),
                })
                .collect();
            if !rows.is_empty() {
                println!(
                    "{}",
                    tabled::Table::new(rows)
                        .with(tabled::settings::Style::rounded())
                        .to_string()
                );
            }
            if let Some(ts) = outcome.watermark {
                println!("Watermark after alert: {}", format_ts(&ts));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_series() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"timestamp":"2024-01-01T00:01:00Z","count":5}},{{"timestamp":"2024-01-01T00:02:00Z","count":8}}]"#
        )
        .unwrap();

        let samples = load_series(file.path()).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(detect_increases(&samples).len(), 1);
    }

    #[test]
    fn test_load_series_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_series(file.path()).is_err());
    }
}
