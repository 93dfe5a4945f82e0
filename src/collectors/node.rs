//! Node-level metrics.
//!
//! The basic samples come from the `/nodes` body the orchestrator already
//! fetched; the detailed ones need one `/nodes/{node}/status` call per node,
//! issued concurrently.

use crate::metrics::MetricsCollector;
use futures::future::join_all;
use serde::Deserialize;
use tracing::warn;

/// One entry of the `/nodes` listing.
#[derive(Debug, Deserialize)]
pub struct NodeListEntry {
    pub node: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub uptime: f64,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub maxcpu: f64,
    #[serde(default)]
    pub mem: f64,
    #[serde(default)]
    pub maxmem: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NodeStatus {
    loadavg: Vec<String>,
    wait: f64,
    idle: f64,
    ksm: KsmInfo,
    cpuinfo: CpuInfo,
    rootfs: FsUsage,
    swap: FsUsage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KsmInfo {
    shared: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuInfo {
    cores: f64,
    sockets: f64,
    /// Proxmox reports the frequency as a string
    mhz: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FsUsage {
    total: f64,
    used: f64,
    free: f64,
}

/// Emit node metrics from the pre-fetched `/nodes` body, then fetch the
/// per-node status detail concurrently.
pub async fn collect(mx: &MetricsCollector, nodes: &[NodeListEntry]) {
    for node in nodes {
        let up = if node.status == "online" { 1.0 } else { 0.0 };
        let labels = &[node.node.as_str()];

        mx.node_up.with_label_values(labels).set(up);
        mx.node_uptime.with_label_values(labels).set(node.uptime);
        mx.node_cpu_load.with_label_values(labels).set(node.cpu);
        mx.node_cpus.with_label_values(labels).set(node.maxcpu);
        mx.node_memory_total.with_label_values(labels).set(node.maxmem);
        mx.node_memory_used.with_label_values(labels).set(node.mem);
        mx.node_memory_free
            .with_label_values(labels)
            .set(node.maxmem - node.mem);
    }

    join_all(nodes.iter().map(|node| collect_detail(mx, &node.node))).await;
}

/// Fetch `/nodes/{node}/status` and emit the detailed samples. Partial field
/// failures (missing load strings, unparseable MHz) drop only the affected
/// sample.
async fn collect_detail(mx: &MetricsCollector, node: &str) {
    let status: NodeStatus = match mx.client.get(&format!("/nodes/{node}/status")).await {
        Ok(status) => status,
        Err(e) => {
            warn!("Failed to fetch node status for {node}: {e}");
            return;
        }
    };

    let labels = &[node];

    if status.loadavg.len() >= 3 {
        if let Ok(load1) = status.loadavg[0].parse::<f64>() {
            mx.node_load1.with_label_values(labels).set(load1);
        }
        if let Ok(load5) = status.loadavg[1].parse::<f64>() {
            mx.node_load5.with_label_values(labels).set(load5);
        }
        if let Ok(load15) = status.loadavg[2].parse::<f64>() {
            mx.node_load15.with_label_values(labels).set(load15);
        }
    }

    mx.node_iowait.with_label_values(labels).set(status.wait);
    mx.node_idle.with_label_values(labels).set(status.idle);

    if let Ok(mhz) = status.cpuinfo.mhz.parse::<f64>() {
        mx.node_cpu_mhz.with_label_values(labels).set(mhz);
    }

    mx.node_rootfs_total
        .with_label_values(labels)
        .set(status.rootfs.total);
    mx.node_rootfs_used
        .with_label_values(labels)
        .set(status.rootfs.used);
    mx.node_rootfs_free
        .with_label_values(labels)
        .set(status.rootfs.free);

    mx.node_cpu_cores
        .with_label_values(labels)
        .set(status.cpuinfo.cores);
    mx.node_cpu_sockets
        .with_label_values(labels)
        .set(status.cpuinfo.sockets);

    mx.node_ksm_shared
        .with_label_values(labels)
        .set(status.ksm.shared);

    mx.node_swap_total
        .with_label_values(labels)
        .set(status.swap.total);
    mx.node_swap_used
        .with_label_values(labels)
        .set(status.swap.used);
    mx.node_swap_free
        .with_label_values(labels)
        .set(status.swap.free);
}
