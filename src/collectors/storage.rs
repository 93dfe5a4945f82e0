//! Storage metrics, one `/nodes/{node}/storage` call per node.

use crate::metrics::MetricsCollector;
use futures::future::join_all;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StorageEntry {
    storage: String,
    #[serde(rename = "type")]
    kind: String,
    total: f64,
    used: f64,
    avail: f64,
    active: i64,
    enabled: i64,
    shared: i64,
    used_fraction: f64,
}

/// Collect storage metrics for all nodes concurrently.
pub async fn collect(mx: &MetricsCollector, nodes: &[String]) {
    join_all(nodes.iter().map(|node| collect_node(mx, node))).await;
}

async fn collect_node(mx: &MetricsCollector, node: &str) {
    let storages: Vec<StorageEntry> = match mx.client.get(&format!("/nodes/{node}/storage")).await
    {
        Ok(storages) => storages,
        Err(e) => {
            warn!("Failed to fetch storage for node {node}: {e}");
            return;
        }
    };

    for storage in &storages {
        let labels = &[node, storage.storage.as_str(), storage.kind.as_str()];
        mx.storage_total.with_label_values(labels).set(storage.total);
        mx.storage_used.with_label_values(labels).set(storage.used);
        mx.storage_avail.with_label_values(labels).set(storage.avail);
        mx.storage_active
            .with_label_values(labels)
            .set(storage.active as f64);
        mx.storage_enabled
            .with_label_values(labels)
            .set(storage.enabled as f64);
        mx.storage_shared
            .with_label_values(labels)
            .set(storage.shared as f64);
        mx.storage_used_fraction
            .with_label_values(labels)
            .set(storage.used_fraction);
    }
}
