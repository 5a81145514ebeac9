//! Watermark and archive inspection

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use surge_lib::anomaly::WatermarkStore;
use surge_lib::archive::SeriesArchiver;
use surge_lib::store::KvStore;
use surge_lib::parse_timestamp;
use tabled::Tabled;

use crate::output::{
    format_ts, print_info, print_json, print_success, print_table, print_warning, OutputFormat,
};

#[derive(Serialize)]
struct WatermarkView {
    key: String,
    watermark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unparseable: Option<String>,
}

#[derive(Tabled, Serialize)]
struct PointRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Count")]
    count: u64,
}

pub async fn show_watermark(store: Arc<dyn KvStore>, format: OutputFormat) -> Result<()> {
    let watermarks = WatermarkStore::new(store);
    let read = watermarks
        .get_watermark()
        .await
        .context("Failed to read watermark")?;

    let view = WatermarkView {
        key: watermarks.key().to_string(),
        watermark: read.value.as_ref().map(format_ts),
        unparseable: match (read.value, read.raw()) {
            (None, Some(raw)) => Some(raw.to_string()),
            _ => None,
        },
    };

    match format {
        OutputFormat::Json => print_json(&view),
        OutputFormat::Table => match (&view.watermark, &view.unparseable) {
            (Some(ts), _) => print_info(&format!("{} = {}", view.key, ts)),
            (None, Some(raw)) => print_warning(&format!(
                "{} holds {:?}, which is not a timestamp; cycles treat it as unset",
                view.key, raw
            )),
            (None, None) => print_info("No watermark set; the next cycle alerts on every increase"),
        },
    }
    Ok(())
}

/// Move the watermark forward; it never moves backward
pub async fn set_watermark(
    store: Arc<dyn KvStore>,
    timestamp: &str,
    format: OutputFormat,
) -> Result<()> {
    let next = parse_timestamp(timestamp)
        .with_context(|| format!("Invalid timestamp {:?}", timestamp))?;

    let watermarks = WatermarkStore::new(store);
    let read = watermarks.get_watermark().await?;
    let written = watermarks
        .set_watermark(&read, next)
        .await
        .context("Failed to write watermark")?;

    if !written {
        bail!(
            "Watermark is already {}; clear it first to move it backward",
            read.value.as_ref().map(format_ts).unwrap_or_default()
        );
    }

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "watermark": format_ts(&next) })),
        OutputFormat::Table => print_success(&format!("Watermark set to {}", format_ts(&next))),
    }
    Ok(())
}

/// Remove the watermark; refuses to act without `--yes`
pub async fn clear_watermark(store: Arc<dyn KvStore>, yes: bool) -> Result<()> {
    if !yes {
        print_warning("The next cycle will re-alert on every increase in its window");
        bail!("Refusing to clear the watermark without --yes");
    }

    WatermarkStore::new(store)
        .clear()
        .await
        .context("Failed to clear watermark")?;
    print_success("Watermark cleared");
    Ok(())
}

pub async fn list_archive(store: Arc<dyn KvStore>, format: OutputFormat) -> Result<()> {
    let points = SeriesArchiver::new(store)
        .list()
        .await
        .context("Failed to read archive")?;

    let rows: Vec<PointRow> = points
        .iter()
        .map(|p| PointRow {
            timestamp: format_ts(&p.timestamp),
            count: p.count,
        })
        .collect();

    print_table(&rows, format);
    Ok(())
}

pub async fn get_archived(
    store: Arc<dyn KvStore>,
    timestamp: &str,
    format: OutputFormat,
) -> Result<()> {
    let ts = parse_timestamp(timestamp)
        .with_context(|| format!("Invalid timestamp {:?}", timestamp))?;

    let count = SeriesArchiver::new(store)
        .lookup(&ts)
        .await
        .context("Failed to read archive")?;

    match (count, format) {
        (Some(count), OutputFormat::Json) => print_json(&PointRow {
            timestamp: format_ts(&ts),
            count,
        }),
        (Some(count), OutputFormat::Table) => {
            print_info(&format!("{} = {}", format_ts(&ts), count))
        }
        (None, _) => bail!("No archived point for {} (expired or never sampled)", format_ts(&ts)),
    }
    Ok(())
}
