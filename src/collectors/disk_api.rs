//! Disk SMART metrics via the Proxmox API.
//!
//! `/nodes/{node}/disks/list` provides the inventory plus a coarse health
//! verdict and the SSD wearout (remaining-life percent); the per-disk
//! `/nodes/{node}/disks/smart` detail is either free text (NVMe) or a
//! structured ATA attribute table, each parsed accordingly.

use crate::metrics::MetricsCollector;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

static NVME_TEMPERATURE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Temperature:\s+(\d+)\s+Celsius").expect("valid regex"));
static NVME_AVAILABLE_SPARE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Available Spare:\s+(\d+)%").expect("valid regex"));
static NVME_PERCENTAGE_USED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Percentage Used:\s+(\d+)%").expect("valid regex"));
static NVME_DATA_WRITTEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Data Units Written:\s+([\d,]+)").expect("valid regex"));
static NVME_POWER_ON_HOURS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Power On Hours:\s+([\d,]+)").expect("valid regex"));

/// One NVMe data unit is 1000 × 512 bytes; smartctl reports them in
/// thousands, so a reported unit is 524 288 bytes.
const NVME_DATA_UNIT_BYTES: f64 = 524_288.0;

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
struct PveDisk {
    devpath: String,
    serial: String,
    model: String,
    #[serde(rename = "type")]
    kind: String,
    health: String,
    wearout: f64,
}

/// `/nodes/{node}/disks/smart` payload; `type` selects which of the two
/// representations is populated.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SmartDetail {
    #[serde(rename = "type")]
    kind: String,
    text: String,
    attributes: Vec<AtaSmartAttr>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct AtaSmartAttr {
    pub id: String,
    pub name: String,
    pub raw: String,
    pub normalized: f64,
}

/// Collect SMART metrics for every node's disks via the API.
pub async fn collect(mx: &MetricsCollector, nodes: &[String]) {
    join_all(nodes.iter().map(|node| collect_node(mx, node))).await;
}

async fn collect_node(mx: &MetricsCollector, node: &str) {
    let disks: Vec<PveDisk> = match mx.client.get(&format!("/nodes/{node}/disks/list")).await {
        Ok(disks) => disks,
        Err(e) => {
            warn!("Failed to fetch disk list for node {node}: {e}");
            return;
        }
    };

    for disk in &disks {
        let labels = disk_labels(node, disk);

        let health = if disk.health == "PASSED" { 1.0 } else { 0.0 };
        mx.disk_health.with_label_values(&labels).set(health);

        // wearout is remaining life; the exported quantity is life used
        if disk.wearout >= 0.0 {
            mx.disk_percentage_used
                .with_label_values(&labels)
                .set(100.0 - disk.wearout);
        }
    }

    join_all(disks.iter().map(|disk| collect_detail(mx, node, disk))).await;
}

async fn collect_detail(mx: &MetricsCollector, node: &str, disk: &PveDisk) {
    let path = format!("/nodes/{node}/disks/smart?disk={}", disk.devpath);
    let detail: SmartDetail = match mx.client.get(&path).await {
        Ok(detail) => detail,
        Err(_) => return,
    };

    let labels = disk_labels(node, disk);
    match detail.kind.as_str() {
        "text" => emit_nvme_smart_text(mx, &detail.text, &labels),
        "ata" => emit_ata_smart_attrs(mx, &detail.attributes, &labels),
        _ => {}
    }
}

fn disk_labels<'a>(node: &'a str, disk: &'a PveDisk) -> [&'a str; 5] {
    [
        node,
        disk.devpath.as_str(),
        disk.model.as_str(),
        disk.serial.as_str(),
        disk.kind.as_str(),
    ]
}

/// Extract the leading number from an ATA raw value like
/// `"31 (Min/Max 21/39)"`.
pub(crate) fn parse_first_number(raw: &str) -> Option<f64> {
    raw.split_whitespace().next()?.parse().ok()
}

/// Parse the NVMe SMART text block line by line.
pub(crate) fn emit_nvme_smart_text(mx: &MetricsCollector, text: &str, labels: &[&str; 5]) {
    for line in text.lines() {
        let line = line.trim();

        if let Some(m) = NVME_TEMPERATURE_RE.captures(line) {
            if let Ok(v) = m[1].parse::<f64>() {
                mx.disk_temperature.with_label_values(labels).set(v);
            }
        }
        if let Some(m) = NVME_AVAILABLE_SPARE_RE.captures(line) {
            if let Ok(v) = m[1].parse::<f64>() {
                mx.disk_available_spare.with_label_values(labels).set(v);
            }
        }
        if let Some(m) = NVME_PERCENTAGE_USED_RE.captures(line) {
            if let Ok(v) = m[1].parse::<f64>() {
                mx.disk_percentage_used.with_label_values(labels).set(v);
            }
        }
        if let Some(m) = NVME_DATA_WRITTEN_RE.captures(line) {
            if let Ok(units) = m[1].replace(',', "").parse::<f64>() {
                mx.disk_data_written
                    .with_label_values(labels)
                    .set(units * NVME_DATA_UNIT_BYTES);
            }
        }
        if let Some(m) = NVME_POWER_ON_HOURS_RE.captures(line) {
            if let Ok(v) = m[1].replace(',', "").parse::<f64>() {
                mx.disk_power_on_hours.with_label_values(labels).set(v);
            }
        }
    }
}

/// Map the structured ATA attribute table onto the disk metric family.
pub(crate) fn emit_ata_smart_attrs(
    mx: &MetricsCollector,
    attrs: &[AtaSmartAttr],
    labels: &[&str; 5],
) {
    for attr in attrs {
        let raw = attr.raw.trim();

        match attr.name.as_str() {
            "Temperature_Celsius" | "Drive_Temperature" => {
                if let Some(v) = parse_first_number(raw).filter(|v| *v >= 0.0) {
                    mx.disk_temperature.with_label_values(labels).set(v);
                }
            }
            "Power_On_Hours" => {
                if let Some(v) = parse_first_number(raw).filter(|v| *v >= 0.0) {
                    mx.disk_power_on_hours.with_label_values(labels).set(v);
                }
            }
            "Host_Writes_32MiB" => {
                if attr.id.trim() == "241" {
                    if let Some(v) = parse_first_number(raw).filter(|v| *v >= 0.0) {
                        mx.disk_data_written
                            .with_label_values(labels)
                            .set(v * 32.0 * 1024.0 * 1024.0);
                    }
                }
            }
            "Available_Reservd_Space" => {
                mx.disk_available_spare
                    .with_label_values(labels)
                    .set(attr.normalized);
            }
            "Media_Wearout_Indicator" => {
                mx.disk_percentage_used
                    .with_label_values(labels)
                    .set(100.0 - attr.normalized);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::test_collector;

    const NVME_TEXT: &str = "\
SMART/Health Information (NVMe Log 0x02)
Critical Warning:                   0x00
Temperature:                        71 Celsius
Available Spare:                    100%
Available Spare Threshold:          10%
Percentage Used:                    37%
Data Units Read:                    15,079,412 [7.72 TB]
Data Units Written:                 124,766,241 [63.8 TB]
Power Cycles:                       166
Power On Hours:                     9,672
Temperature Sensor 1:               71 Celsius
";

    #[test]
    fn nvme_text_parsing() {
        let mx = test_collector();
        let labels = ["pve1", "/dev/nvme0n1", "Samsung SSD 970", "S59BNM0R", "nvme"];
        emit_nvme_smart_text(&mx, NVME_TEXT, &labels);

        assert_eq!(mx.disk_temperature.with_label_values(&labels).get(), 71.0);
        assert_eq!(
            mx.disk_available_spare.with_label_values(&labels).get(),
            100.0
        );
        assert_eq!(
            mx.disk_percentage_used.with_label_values(&labels).get(),
            37.0
        );
        assert_eq!(
            mx.disk_data_written.with_label_values(&labels).get(),
            124_766_241.0 * 524_288.0
        );
        assert_eq!(
            mx.disk_power_on_hours.with_label_values(&labels).get(),
            9672.0
        );
    }

    #[test]
    fn ata_attribute_mapping() {
        let mx = test_collector();
        let labels = ["pve1", "/dev/sda", "INTEL_SSDSC2KG019T8", "PHYG8306", "ssd"];
        let attrs = vec![
            AtaSmartAttr {
                id: "194".into(),
                name: "Temperature_Celsius".into(),
                raw: "31 (Min/Max 21/39)".into(),
                normalized: 100.0,
            },
            AtaSmartAttr {
                id: "  9".into(),
                name: "Power_On_Hours".into(),
                raw: "58046".into(),
                normalized: 100.0,
            },
            AtaSmartAttr {
                id: "241".into(),
                name: "Host_Writes_32MiB".into(),
                raw: "43161060".into(),
                normalized: 100.0,
            },
            AtaSmartAttr {
                id: "170".into(),
                name: "Available_Reservd_Space".into(),
                raw: "1".into(),
                normalized: 99.0,
            },
            AtaSmartAttr {
                id: "233".into(),
                name: "Media_Wearout_Indicator".into(),
                raw: "0".into(),
                normalized: 93.0,
            },
        ];

        emit_ata_smart_attrs(&mx, &attrs, &labels);

        assert_eq!(mx.disk_temperature.with_label_values(&labels).get(), 31.0);
        assert_eq!(
            mx.disk_power_on_hours.with_label_values(&labels).get(),
            58046.0
        );
        assert_eq!(
            mx.disk_data_written.with_label_values(&labels).get(),
            43161060.0 * 32.0 * 1024.0 * 1024.0
        );
        assert_eq!(
            mx.disk_available_spare.with_label_values(&labels).get(),
            99.0
        );
        assert_eq!(
            mx.disk_percentage_used.with_label_values(&labels).get(),
            7.0
        );
    }

    #[test]
    fn first_number_extraction() {
        assert_eq!(parse_first_number("31 (Min/Max 21/39)"), Some(31.0));
        assert_eq!(parse_first_number("58046"), Some(58046.0));
        assert_eq!(parse_first_number(""), None);
        assert_eq!(parse_first_number("n/a"), None);
    }
}
