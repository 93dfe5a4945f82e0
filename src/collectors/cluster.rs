//! Cluster-wide metrics: quorum/HA status, replication jobs and node
//! certificate expiry.

use crate::metrics::MetricsCollector;
use futures::future::join_all;
use serde::Deserialize;
use tracing::warn;

/// One entry of `/cluster/status`; the response mixes one cluster-type
/// entry with per-node entries.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClusterStatusEntry {
    #[serde(rename = "type")]
    kind: String,
    quorate: i64,
    online: i64,
    nodes: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HaResource {
    state: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplicationJob {
    id: String,
    guest: i64,
    last_sync: i64,
    duration: f64,
    fail_count: i64,
    error: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CertificateInfo {
    filename: String,
    notafter: i64,
}

/// Collect cluster quorum and HA resource metrics.
pub async fn collect(mx: &MetricsCollector) {
    let entries: Vec<ClusterStatusEntry> = match mx.client.get("/cluster/status").await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to fetch cluster status: {e}");
            return;
        }
    };

    let mut nodes_total: i64 = 0;
    let mut nodes_online: i64 = 0;
    let mut has_cluster_entry = false;
    for entry in &entries {
        match entry.kind.as_str() {
            "cluster" => {
                mx.cluster_quorate.set(entry.quorate as f64);
                nodes_total = entry.nodes;
                has_cluster_entry = true;
            }
            "node" => {
                if nodes_total == 0 {
                    nodes_total += 1;
                }
                if entry.online == 1 {
                    nodes_online += 1;
                }
            }
            _ => {}
        }
    }

    // A standalone node has no cluster entry and is always quorate
    if !has_cluster_entry {
        mx.cluster_quorate.set(1.0);
    }

    mx.cluster_nodes_total.set(nodes_total as f64);
    mx.cluster_nodes_online.set(nodes_online as f64);

    // HA may not be configured at all
    let resources: Vec<HaResource> = match mx.client.get("/cluster/ha/resources").await {
        Ok(resources) => resources,
        Err(_) => {
            mx.ha_resources_total.set(0.0);
            mx.ha_resources_active.set(0.0);
            return;
        }
    };

    let active = resources.iter().filter(|r| r.state == "started").count();
    mx.ha_resources_total.set(resources.len() as f64);
    mx.ha_resources_active.set(active as f64);
}

/// Collect replication job metrics; silently absent when replication is not
/// configured.
pub async fn collect_replication(mx: &MetricsCollector) {
    let jobs: Vec<ReplicationJob> = match mx.client.get("/cluster/replication").await {
        Ok(jobs) => jobs,
        Err(_) => return,
    };

    for job in &jobs {
        let guest = job.guest.to_string();
        let labels = &[guest.as_str(), job.id.as_str()];

        if job.last_sync > 0 {
            mx.replication_last_sync
                .with_label_values(labels)
                .set(job.last_sync as f64);
        }

        mx.replication_duration
            .with_label_values(labels)
            .set(job.duration);

        let status = if job.fail_count > 0 || !job.error.is_empty() {
            0.0
        } else {
            1.0
        };
        mx.replication_status.with_label_values(labels).set(status);
    }
}

/// Collect SSL certificate expiry for every node concurrently.
pub async fn collect_certificates(mx: &MetricsCollector, nodes: &[String]) {
    join_all(nodes.iter().map(|node| collect_node_certificate(mx, node))).await;
}

async fn collect_node_certificate(mx: &MetricsCollector, node: &str) {
    let certs: Vec<CertificateInfo> =
        match mx.client.get(&format!("/nodes/{node}/certificates/info")).await {
            Ok(certs) => certs,
            Err(e) => {
                warn!("Failed to fetch certificates for node {node}: {e}");
                return;
            }
        };

    let now = chrono::Utc::now().timestamp();

    // Prefer the certificate pveproxy actually serves
    let preferred = certs
        .iter()
        .find(|c| c.filename == "pveproxy-ssl.pem" || c.filename == "pve-ssl.pem")
        .or_else(|| certs.first());

    if let Some(cert) = preferred {
        mx.certificate_expiry
            .with_label_values(&[node])
            .set((cert.notafter - now) as f64);
    }
}
