//! Last-backup timestamp reconstruction from the vzdump task history.
//!
//! Single-guest tasks carry the VMID in their `id` field, so a successful
//! task maps straight to `(vmid, endtime)`. Batch tasks (one vzdump run
//! covering many guests) have an empty `id`; the only record of the
//! per-guest outcomes is the task log, which is fetched and walked line by
//! line. At most [`MAX_BATCH_LOG_FETCHES`] batch logs are inspected per node
//! to bound the per-scrape cost; on clusters with more batch jobs than that
//! the oldest ones are simply not consulted.

use crate::collectors::{GuestInfo, GuestKind};
use crate::metrics::MetricsCollector;
use chrono::{Local, LocalResult, NaiveDateTime, TimeZone};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

/// Upper bound on batch-log inspections per node and scrape.
const MAX_BATCH_LOG_FETCHES: usize = 5;

static BACKUP_FINISHED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Finished Backup of VM (\d+)").expect("valid regex"));
static BACKUP_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Backup finished at (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})").expect("valid regex")
});

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskEntry {
    /// VMID as a string for single-guest tasks, empty for batch tasks
    id: String,
    upid: String,
    endtime: i64,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskLogLine {
    t: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GuestIdName {
    vmid: i64,
    name: String,
}

/// Collect last-successful-backup timestamps for every guest.
///
/// `guests` is the inventory pre-fetched from `/cluster/resources`; when
/// that call failed the map arrives empty and the inventory is rebuilt here
/// from the per-node guest listings.
pub async fn collect(
    mx: &MetricsCollector,
    nodes: &[String],
    guests: &HashMap<String, GuestInfo>,
) {
    let fallback;
    let guests = if guests.is_empty() {
        fallback = fetch_guests_fallback(mx, nodes).await;
        &fallback
    } else {
        guests
    };

    let total_guests = guests.len();

    // Per-node maps merge into a global max-endtime-per-vmid map.
    let node_maps = join_all(
        nodes
            .iter()
            .map(|node| collect_node_backups(mx, node, total_guests)),
    )
    .await;

    let mut backups: HashMap<String, i64> = HashMap::new();
    for node_map in node_maps {
        for (vmid, endtime) in node_map {
            let entry = backups.entry(vmid).or_insert(endtime);
            if endtime > *entry {
                *entry = endtime;
            }
        }
    }

    for (vmid, endtime) in &backups {
        // A guest missing from the inventory was deleted since its backup
        let guest = match guests.get(vmid) {
            Some(guest) => guest,
            None => continue,
        };
        let labels = &[guest.node.as_str(), vmid.as_str(), guest.name.as_str()];
        match guest.kind {
            GuestKind::Qemu => mx
                .vm_last_backup
                .with_label_values(labels)
                .set(*endtime as f64),
            GuestKind::Lxc => mx
                .lxc_last_backup
                .with_label_values(labels)
                .set(*endtime as f64),
        }
    }
}

/// Rebuild the guest inventory from per-node `/qemu` and `/lxc` listings.
async fn fetch_guests_fallback(
    mx: &MetricsCollector,
    nodes: &[String],
) -> HashMap<String, GuestInfo> {
    let node_maps = join_all(nodes.iter().map(|node| fetch_node_guests(mx, node))).await;

    let mut guests = HashMap::new();
    for node_map in node_maps {
        guests.extend(node_map);
    }
    guests
}

async fn fetch_node_guests(mx: &MetricsCollector, node: &str) -> HashMap<String, GuestInfo> {
    let mut guests = HashMap::new();

    for kind in [GuestKind::Qemu, GuestKind::Lxc] {
        let path = format!("/nodes/{node}/{}", kind.as_str());
        if let Ok(entries) = mx.client.get::<Vec<GuestIdName>>(&path).await {
            for entry in entries {
                guests.insert(
                    entry.vmid.to_string(),
                    GuestInfo {
                        node: node.to_string(),
                        name: entry.name,
                        kind,
                    },
                );
            }
        }
    }

    guests
}

/// Scan one node's vzdump task history and return its local
/// vmid → max-endtime map.
async fn collect_node_backups(
    mx: &MetricsCollector,
    node: &str,
    total_guests: usize,
) -> HashMap<String, i64> {
    let path = format!("/nodes/{node}/tasks?typefilter=vzdump&limit=50");
    let tasks: Vec<TaskEntry> = match mx.client.get(&path).await {
        Ok(tasks) => tasks,
        Err(_) => return HashMap::new(),
    };

    let mut backups: HashMap<String, i64> = HashMap::new();
    let mut batch_upids: Vec<String> = Vec::new();

    for task in tasks {
        if task.status != "OK" {
            continue;
        }
        if !task.id.is_empty() {
            // Single-guest backup, the task record is enough
            let entry = backups.entry(task.id).or_insert(task.endtime);
            if task.endtime > *entry {
                *entry = task.endtime;
            }
        } else if !task.upid.is_empty() && batch_upids.len() < MAX_BATCH_LOG_FETCHES {
            batch_upids.push(task.upid);
        }
    }

    let batch_maps = join_all(
        batch_upids
            .iter()
            .map(|upid| parse_backup_log(mx, node, upid, total_guests)),
    )
    .await;

    for batch_map in batch_maps {
        for (vmid, timestamp) in batch_map {
            let entry = backups.entry(vmid).or_insert(timestamp);
            if timestamp > *entry {
                *entry = timestamp;
            }
        }
    }

    backups
}

/// Fetch one batch task log and recover per-guest completion timestamps.
async fn parse_backup_log(
    mx: &MetricsCollector,
    node: &str,
    upid: &str,
    total_guests: usize,
) -> HashMap<String, i64> {
    let path = format!("/nodes/{node}/tasks/{upid}/log?limit=1000000");
    let lines: Vec<TaskLogLine> = match mx.client.get(&path).await {
        Ok(lines) => lines,
        Err(_) => return HashMap::new(),
    };

    scan_backup_log(lines.iter().map(|l| l.t.as_str()), total_guests)
}

/// Walk log lines keeping a running current-VMID: a "Finished Backup of
/// VM <id>" line sets it, the next "Backup finished at <ts>" line records
/// the timestamp and clears it. Unparseable lines are skipped; the walk
/// stops early once every guest in the inventory has been seen.
pub(crate) fn scan_backup_log<'a>(
    lines: impl Iterator<Item = &'a str>,
    total_guests: usize,
) -> HashMap<String, i64> {
    let mut backups: HashMap<String, i64> = HashMap::new();
    let mut current_vmid: Option<String> = None;

    for line in lines {
        if let Some(m) = BACKUP_FINISHED_RE.captures(line) {
            current_vmid = Some(m[1].to_string());
            continue;
        }

        let vmid = match &current_vmid {
            Some(vmid) if line.contains("Backup finished at") => vmid.clone(),
            _ => continue,
        };
        let timestamp = match BACKUP_TIME_RE
            .captures(line)
            .and_then(|m| parse_backup_time(&m[1]))
        {
            Some(ts) => ts,
            None => continue,
        };

        let entry = backups.entry(vmid).or_insert(timestamp);
        if timestamp > *entry {
            *entry = timestamp;
        }
        current_vmid = None;

        if total_guests > 0 && backups.len() >= total_guests {
            break;
        }
    }

    backups
}

/// vzdump writes completion timestamps in the node's local time.
pub(crate) fn parse_backup_time(raw: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()?;
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        LocalResult::None => None,
    }
}
