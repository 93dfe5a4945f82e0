//! Local disk metrics: I/O counters from the kernel's diskstats interface
//! and SMART health from the sidecar JSON artifact (or, when configured,
//! the Proxmox disk API).

use crate::collectors::{disk_api, local_hostname};
use crate::metrics::MetricsCollector;
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use tracing::warn;

const DISKSTATS_PATH: &str = "/proc/diskstats";

/// A sidecar file older than this is treated as absent.
const SIDECAR_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// Sidecar artifact written by the SMART scraper script.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SmartReport {
    hostname: String,
    disks: Vec<SmartDisk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SmartDisk {
    device: String,
    model: String,
    serial: String,
    #[serde(rename = "type")]
    kind: String,
    healthy: bool,
    temperature: Option<f64>,
    power_on_hours: Option<f64>,
    data_written_bytes: Option<f64>,
    available_spare_percent: Option<f64>,
    percentage_used: Option<f64>,
}

/// Collect disk I/O counters and SMART metrics.
pub async fn collect(mx: &MetricsCollector, nodes: &[String]) {
    collect_io(mx).await;

    match mx.smart.source.as_str() {
        "api" => disk_api::collect(mx, nodes).await,
        _ => collect_smart_sidecar(mx, &mx.smart.sidecar_path),
    }
}

async fn collect_io(mx: &MetricsCollector) {
    let content = match tokio::fs::read_to_string(DISKSTATS_PATH).await {
        Ok(content) => content,
        Err(_) => return,
    };
    emit_diskstats(mx, &content, local_hostname());
}

/// Emit I/O counters from diskstats content. Each line carries at least 14
/// whitespace fields; field 3 (1-indexed) is the device name and fields
/// 4, 6, 8, 10 and 13 are reads completed, sectors read, writes completed,
/// sectors written and milliseconds spent on I/O. A field that fails to
/// parse drops only its own sample.
pub(crate) fn emit_diskstats(mx: &MetricsCollector, content: &str, hostname: &str) {
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }

        let device = fields[2];
        if !is_physical_device(device) {
            continue;
        }

        let labels = &[hostname, device];

        if let Ok(reads) = fields[3].parse::<f64>() {
            mx.disk_reads_completed.with_label_values(labels).set(reads);
        }
        if let Ok(sectors_read) = fields[5].parse::<f64>() {
            mx.disk_read_bytes
                .with_label_values(labels)
                .set(sectors_read * 512.0);
        }
        if let Ok(writes) = fields[7].parse::<f64>() {
            mx.disk_writes_completed
                .with_label_values(labels)
                .set(writes);
        }
        if let Ok(sectors_written) = fields[9].parse::<f64>() {
            mx.disk_write_bytes
                .with_label_values(labels)
                .set(sectors_written * 512.0);
        }
        if let Ok(io_ms) = fields[12].parse::<f64>() {
            mx.disk_io_time
                .with_label_values(labels)
                .set(io_ms / 1000.0);
        }
    }
}

/// Whole physical disks only: no partitions and no virtual devices.
///
/// NVMe whole disks end in a digit (`nvme0n1`), their partitions append
/// `p<digits>` (`nvme0n1p1`); for every other naming scheme a trailing
/// digit marks a partition.
pub(crate) fn is_physical_device(name: &str) -> bool {
    const VIRTUAL_PREFIXES: [&str; 4] = ["loop", "ram", "zd", "dm-"];
    if VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return false;
    }

    if let Some(rest) = name.strip_prefix("nvme") {
        return !is_nvme_partition(rest);
    }

    !name.chars().next_back().is_some_and(|c| c.is_ascii_digit())
}

fn is_nvme_partition(suffix: &str) -> bool {
    match suffix.rfind('p') {
        Some(idx) if idx > 0 => {
            let after = &suffix[idx + 1..];
            !after.is_empty() && after.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

/// Read the sidecar SMART artifact if it exists and is fresh. A stale or
/// missing file is not an error; the scraper script may simply not be
/// installed.
pub(crate) fn collect_smart_sidecar(mx: &MetricsCollector, path: &str) {
    let modified = match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(_) => return,
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) if age <= SIDECAR_MAX_AGE => {}
        _ => return,
    }

    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(_) => return,
    };
    let report: SmartReport = match serde_json::from_slice(&content) {
        Ok(report) => report,
        Err(e) => {
            warn!("Failed to parse SMART sidecar file {path}: {e}");
            return;
        }
    };

    emit_smart_report(mx, &report);
}

pub(crate) fn emit_smart_report(mx: &MetricsCollector, report: &SmartReport) {
    let hostname = if report.hostname.is_empty() {
        local_hostname()
    } else {
        report.hostname.as_str()
    };

    for disk in &report.disks {
        let labels = &[
            hostname,
            disk.device.as_str(),
            disk.model.as_str(),
            disk.serial.as_str(),
            disk.kind.as_str(),
        ];

        let health = if disk.healthy { 1.0 } else { 0.0 };
        mx.disk_health.with_label_values(labels).set(health);

        if let Some(temperature) = disk.temperature.filter(|v| *v != 0.0) {
            mx.disk_temperature
                .with_label_values(labels)
                .set(temperature);
        }
        if let Some(hours) = disk.power_on_hours.filter(|v| *v != 0.0) {
            mx.disk_power_on_hours.with_label_values(labels).set(hours);
        }
        if let Some(written) = disk.data_written_bytes.filter(|v| *v != 0.0) {
            mx.disk_data_written.with_label_values(labels).set(written);
        }
        if let Some(spare) = disk.available_spare_percent.filter(|v| *v != 0.0) {
            mx.disk_available_spare.with_label_values(labels).set(spare);
        }
        // NVMe wear starts at 0% and that is worth reporting
        match disk.percentage_used {
            Some(used) if disk.kind == "nvme" || used != 0.0 => {
                mx.disk_percentage_used.with_label_values(labels).set(used);
            }
            _ => {}
        }
    }
}
