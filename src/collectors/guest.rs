//! Guest (QEMU VM and LXC container) metrics.
//!
//! Every node is walked concurrently; on each node the `/qemu` and `/lxc`
//! listings provide the base samples, and each *running* guest gets exactly
//! one `/status/current` call whose body is reused for every detail family
//! (balloon, PSI, block devices and NICs for QEMU; swap and PSI for LXC).

use crate::collectors::GuestKind;
use crate::metrics::MetricsCollector;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

/// One entry of `/nodes/{node}/qemu` or `/nodes/{node}/lxc`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GuestListEntry {
    vmid: i64,
    name: String,
    status: String,
    uptime: f64,
    cpu: f64,
    cpus: f64,
    mem: f64,
    maxmem: f64,
    disk: f64,
    maxdisk: f64,
    netin: f64,
    netout: f64,
    diskread: f64,
    diskwrite: f64,
}

/// Disk counters shared by both guest kinds in `status/current`; the listing
/// values are stale for running guests, so the detail body wins.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailDiskIo {
    diskread: f64,
    diskwrite: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HaInfo {
    managed: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BalloonInfo {
    actual: f64,
    max_mem: f64,
    total_mem: f64,
    major_page_faults: f64,
    minor_page_faults: f64,
    mem_swapped_in: f64,
    mem_swapped_out: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlockStat {
    rd_bytes: f64,
    wr_bytes: f64,
    rd_operations: f64,
    wr_operations: f64,
    failed_rd_operations: f64,
    failed_wr_operations: f64,
    flush_operations: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NicStat {
    netin: f64,
    netout: f64,
}

/// QEMU view of `status/current`. PSI values arrive as JSON numbers.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QemuDetail {
    balloon: f64,
    freemem: f64,
    pid: f64,
    memhost: f64,
    ha: HaInfo,
    ballooninfo: BalloonInfo,
    pressurecpufull: f64,
    pressurecpusome: f64,
    pressureiofull: f64,
    pressureiosome: f64,
    pressurememoryfull: f64,
    pressurememorysome: f64,
    blockstat: HashMap<String, BlockStat>,
    nics: HashMap<String, NicStat>,
}

/// LXC view of `status/current`. PSI values arrive as decimal strings and
/// are dropped silently when they fail to parse.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LxcDetail {
    swap: f64,
    maxswap: f64,
    pid: f64,
    ha: HaInfo,
    pressurecpufull: String,
    pressurecpusome: String,
    pressureiofull: String,
    pressureiosome: String,
    pressurememoryfull: String,
    pressurememorysome: String,
}

/// Collect guest metrics for every node concurrently, emitting per-node
/// VM and container counts after each resource pass completes.
pub async fn collect(mx: &MetricsCollector, nodes: &[String]) {
    join_all(nodes.iter().map(|node| async move {
        let vm_count = collect_resources(mx, node, GuestKind::Qemu).await;
        mx.node_vm_count
            .with_label_values(&[node.as_str()])
            .set(vm_count as f64);

        let lxc_count = collect_resources(mx, node, GuestKind::Lxc).await;
        mx.node_lxc_count
            .with_label_values(&[node.as_str()])
            .set(lxc_count as f64);
    }))
    .await;
}

/// Collect metrics for one guest kind on one node; returns the guest count.
async fn collect_resources(mx: &MetricsCollector, node: &str, kind: GuestKind) -> usize {
    let path = format!("/nodes/{node}/{}", kind.as_str());
    let guests: Vec<GuestListEntry> = match mx.client.get(&path).await {
        Ok(guests) => guests,
        Err(e) => {
            warn!("Failed to fetch {} list for node {node}: {e}", kind.as_str());
            return 0;
        }
    };

    let count = guests.len();
    join_all(
        guests
            .into_iter()
            .map(|guest| collect_guest(mx, node, kind, guest)),
    )
    .await;
    count
}

async fn collect_guest(mx: &MetricsCollector, node: &str, kind: GuestKind, guest: GuestListEntry) {
    let running = guest.status == "running";
    let status = if running { 1.0 } else { 0.0 };
    let vmid = guest.vmid.to_string();
    let labels = [node, vmid.as_str(), guest.name.as_str()];

    // Fetch the detail body once; it serves disk counters plus every
    // kind-specific family below.
    let mut disk_read = guest.diskread;
    let mut disk_write = guest.diskwrite;
    let mut detail_body: Option<Vec<u8>> = None;
    if running {
        let detail_path = format!("/nodes/{node}/{}/{}/status/current", kind.as_str(), guest.vmid);
        match mx.client.get_raw(&detail_path).await {
            Ok(body) => {
                if let Ok(envelope) =
                    serde_json::from_slice::<crate::client::ApiResponse<DetailDiskIo>>(&body)
                {
                    disk_read = envelope.data.diskread;
                    disk_write = envelope.data.diskwrite;
                }
                detail_body = Some(body);
            }
            Err(e) => {
                warn!(
                    "Failed to fetch status/current for {}/{} on {node}: {e}",
                    kind.as_str(),
                    guest.vmid
                );
            }
        }
    }

    match kind {
        GuestKind::Lxc => {
            mx.lxc_status.with_label_values(&labels).set(status);
            mx.lxc_uptime.with_label_values(&labels).set(guest.uptime);
            mx.lxc_cpu.with_label_values(&labels).set(guest.cpu);
            mx.lxc_cpus.with_label_values(&labels).set(guest.cpus);
            mx.lxc_memory_used.with_label_values(&labels).set(guest.mem);
            mx.lxc_memory_max
                .with_label_values(&labels)
                .set(guest.maxmem);
            mx.lxc_disk_used.with_label_values(&labels).set(guest.disk);
            mx.lxc_disk_max
                .with_label_values(&labels)
                .set(guest.maxdisk);
            mx.lxc_net_in.with_label_values(&labels).set(guest.netin);
            mx.lxc_net_out.with_label_values(&labels).set(guest.netout);
            mx.lxc_disk_read.with_label_values(&labels).set(disk_read);
            mx.lxc_disk_write.with_label_values(&labels).set(disk_write);

            if let Some(body) = detail_body {
                emit_lxc_detail(mx, &body, &labels);
            }
        }
        GuestKind::Qemu => {
            mx.vm_status.with_label_values(&labels).set(status);
            mx.vm_uptime.with_label_values(&labels).set(guest.uptime);
            mx.vm_cpu.with_label_values(&labels).set(guest.cpu);
            mx.vm_cpus.with_label_values(&labels).set(guest.cpus);
            mx.vm_memory_used.with_label_values(&labels).set(guest.mem);
            mx.vm_memory_max
                .with_label_values(&labels)
                .set(guest.maxmem);
            mx.vm_disk_max.with_label_values(&labels).set(guest.maxdisk);
            mx.vm_net_in.with_label_values(&labels).set(guest.netin);
            mx.vm_net_out.with_label_values(&labels).set(guest.netout);
            mx.vm_disk_read.with_label_values(&labels).set(disk_read);
            mx.vm_disk_write.with_label_values(&labels).set(disk_write);

            if let Some(body) = detail_body {
                emit_qemu_detail(mx, &body, &labels);
            }
        }
    }
}

/// Parse LXC swap, HA, PID and PSI samples from an already fetched
/// `status/current` body.
fn emit_lxc_detail(mx: &MetricsCollector, body: &[u8], labels: &[&str; 3]) {
    let detail: LxcDetail =
        match serde_json::from_slice::<crate::client::ApiResponse<LxcDetail>>(body) {
            Ok(envelope) => envelope.data,
            Err(_) => return,
        };

    mx.lxc_swap_used.with_label_values(labels).set(detail.swap);
    mx.lxc_swap_max
        .with_label_values(labels)
        .set(detail.maxswap);
    mx.lxc_ha_managed
        .with_label_values(labels)
        .set(detail.ha.managed as f64);
    mx.lxc_pid.with_label_values(labels).set(detail.pid);

    let pressures = [
        (&mx.lxc_pressure_cpu_full, &detail.pressurecpufull),
        (&mx.lxc_pressure_cpu_some, &detail.pressurecpusome),
        (&mx.lxc_pressure_io_full, &detail.pressureiofull),
        (&mx.lxc_pressure_io_some, &detail.pressureiosome),
        (&mx.lxc_pressure_memory_full, &detail.pressurememoryfull),
        (&mx.lxc_pressure_memory_some, &detail.pressurememorysome),
    ];
    for (gauge, raw) in pressures {
        if let Ok(value) = raw.parse::<f64>() {
            gauge.with_label_values(labels).set(value);
        }
    }
}

/// Parse the full QEMU detail family from an already fetched
/// `status/current` body.
fn emit_qemu_detail(mx: &MetricsCollector, body: &[u8], labels: &[&str; 3]) {
    let detail: QemuDetail =
        match serde_json::from_slice::<crate::client::ApiResponse<QemuDetail>>(body) {
            Ok(envelope) => envelope.data,
            Err(_) => return,
        };

    mx.vm_balloon.with_label_values(labels).set(detail.balloon);
    mx.vm_memory_free
        .with_label_values(labels)
        .set(detail.freemem);
    mx.vm_ha_managed
        .with_label_values(labels)
        .set(detail.ha.managed as f64);
    mx.vm_pid.with_label_values(labels).set(detail.pid);
    mx.vm_memory_host
        .with_label_values(labels)
        .set(detail.memhost);

    mx.vm_pressure_cpu_full
        .with_label_values(labels)
        .set(detail.pressurecpufull);
    mx.vm_pressure_cpu_some
        .with_label_values(labels)
        .set(detail.pressurecpusome);
    mx.vm_pressure_io_full
        .with_label_values(labels)
        .set(detail.pressureiofull);
    mx.vm_pressure_io_some
        .with_label_values(labels)
        .set(detail.pressureiosome);
    mx.vm_pressure_memory_full
        .with_label_values(labels)
        .set(detail.pressurememoryfull);
    mx.vm_pressure_memory_some
        .with_label_values(labels)
        .set(detail.pressurememorysome);

    mx.vm_balloon_actual
        .with_label_values(labels)
        .set(detail.ballooninfo.actual);
    mx.vm_balloon_max
        .with_label_values(labels)
        .set(detail.ballooninfo.max_mem);
    mx.vm_balloon_total
        .with_label_values(labels)
        .set(detail.ballooninfo.total_mem);
    mx.vm_balloon_major_faults
        .with_label_values(labels)
        .set(detail.ballooninfo.major_page_faults);
    mx.vm_balloon_minor_faults
        .with_label_values(labels)
        .set(detail.ballooninfo.minor_page_faults);
    mx.vm_balloon_swapped_in
        .with_label_values(labels)
        .set(detail.ballooninfo.mem_swapped_in);
    mx.vm_balloon_swapped_out
        .with_label_values(labels)
        .set(detail.ballooninfo.mem_swapped_out);

    for (device, stats) in &detail.blockstat {
        let device_labels = [labels[0], labels[1], labels[2], device.as_str()];
        mx.vm_block_read_bytes
            .with_label_values(&device_labels)
            .set(stats.rd_bytes);
        mx.vm_block_write_bytes
            .with_label_values(&device_labels)
            .set(stats.wr_bytes);
        mx.vm_block_read_ops
            .with_label_values(&device_labels)
            .set(stats.rd_operations);
        mx.vm_block_write_ops
            .with_label_values(&device_labels)
            .set(stats.wr_operations);
        mx.vm_block_failed_read_ops
            .with_label_values(&device_labels)
            .set(stats.failed_rd_operations);
        mx.vm_block_failed_write_ops
            .with_label_values(&device_labels)
            .set(stats.failed_wr_operations);
        mx.vm_block_flush_ops
            .with_label_values(&device_labels)
            .set(stats.flush_operations);
    }

    for (interface, stats) in &detail.nics {
        let nic_labels = [labels[0], labels[1], labels[2], interface.as_str()];
        mx.vm_nic_in
            .with_label_values(&nic_labels)
            .set(stats.netin);
        mx.vm_nic_out
            .with_label_values(&nic_labels)
            .set(stats.netout);
    }
}
