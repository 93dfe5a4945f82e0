//! ZFS metrics: pool status via the Proxmox API plus ARC statistics from
//! the kernel's kstat pseudo-file.

use crate::collectors::local_hostname;
use crate::metrics::MetricsCollector;
use futures::future::join_all;
use serde::Deserialize;

const ARCSTATS_PATH: &str = "/proc/spl/kstat/zfs/arcstats";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ZfsPool {
    name: String,
    health: String,
    size: f64,
    alloc: f64,
    free: f64,
    frag: f64,
}

/// Collect ZFS pool metrics for all nodes concurrently, then the local ARC
/// statistics.
pub async fn collect(mx: &MetricsCollector, nodes: &[String]) {
    join_all(nodes.iter().map(|node| collect_pools(mx, node))).await;
    collect_arc(mx).await;
}

async fn collect_pools(mx: &MetricsCollector, node: &str) {
    // ZFS may not be installed or configured on this node
    let pools: Vec<ZfsPool> = match mx.client.get(&format!("/nodes/{node}/disks/zfs")).await {
        Ok(pools) => pools,
        Err(_) => return,
    };

    for pool in &pools {
        let health = if pool.health == "ONLINE" { 1.0 } else { 0.0 };
        let labels = &[node, pool.name.as_str()];
        mx.zfs_pool_health.with_label_values(labels).set(health);
        mx.zfs_pool_size.with_label_values(labels).set(pool.size);
        mx.zfs_pool_alloc.with_label_values(labels).set(pool.alloc);
        mx.zfs_pool_free.with_label_values(labels).set(pool.free);
        mx.zfs_pool_frag.with_label_values(labels).set(pool.frag);
    }
}

async fn collect_arc(mx: &MetricsCollector) {
    // Absent whenever the ZFS kernel module is not loaded
    let content = match tokio::fs::read_to_string(ARCSTATS_PATH).await {
        Ok(content) => content,
        Err(_) => return,
    };
    emit_arcstats(mx, &content, local_hostname());
}

/// Scan the arcstats kstat text (`name  type  value` lines) for the
/// whitelisted counters and derive the hit-ratio percent. Non-numeric
/// values drop only their own sample.
pub(crate) fn emit_arcstats(mx: &MetricsCollector, content: &str, hostname: &str) {
    let labels = &[hostname];
    let mut hits = 0.0;
    let mut misses = 0.0;

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let name = match fields.next() {
            Some(name) => name,
            None => continue,
        };
        let value = match fields.nth(1).and_then(|v| v.parse::<f64>().ok()) {
            Some(value) => value,
            None => continue,
        };

        match name {
            "size" => mx.zfs_arc_size.with_label_values(labels).set(value),
            "c_min" => mx.zfs_arc_min_size.with_label_values(labels).set(value),
            "c_max" => mx.zfs_arc_max_size.with_label_values(labels).set(value),
            "c" => mx.zfs_arc_target_size.with_label_values(labels).set(value),
            "hits" => {
                hits = value;
                mx.zfs_arc_hits.with_label_values(labels).set(value);
            }
            "misses" => {
                misses = value;
                mx.zfs_arc_misses.with_label_values(labels).set(value);
            }
            "l2_hits" => mx.zfs_arc_l2_hits.with_label_values(labels).set(value),
            "l2_misses" => mx.zfs_arc_l2_misses.with_label_values(labels).set(value),
            "l2_size" => mx.zfs_arc_l2_size.with_label_values(labels).set(value),
            "l2_hdr_size" => {
                mx.zfs_arc_l2_header_size.with_label_values(labels).set(value)
            }
            _ => {}
        }
    }

    let total = hits + misses;
    if total > 0.0 {
        mx.zfs_arc_hit_ratio
            .with_label_values(labels)
            .set(hits / total * 100.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::test_collector;

    const ARCSTATS_FIXTURE: &str = "\
13 1 0x01 123 33456 8383834 383838383
name                            type data
hits                            4    9000
misses                          4    1000
demand_data_hits                4    500
size                            4    536870912
c                               4    1073741824
c_min                           4    33554432
c_max                           4    2147483648
l2_hits                         4    10
l2_misses                       4    20
l2_size                         4    0
l2_hdr_size                     4    0
garbage                         4    not_a_number
";

    #[test]
    fn arc_hit_ratio_is_derived_from_hits_and_misses() {
        let mx = test_collector();
        emit_arcstats(&mx, ARCSTATS_FIXTURE, "pve1");

        assert_eq!(mx.zfs_arc_hits.with_label_values(&["pve1"]).get(), 9000.0);
        assert_eq!(mx.zfs_arc_misses.with_label_values(&["pve1"]).get(), 1000.0);
        assert_eq!(
            mx.zfs_arc_hit_ratio.with_label_values(&["pve1"]).get(),
            90.0
        );
        assert_eq!(
            mx.zfs_arc_size.with_label_values(&["pve1"]).get(),
            536870912.0
        );
        assert_eq!(
            mx.zfs_arc_target_size.with_label_values(&["pve1"]).get(),
            1073741824.0
        );
    }

    #[test]
    fn no_ratio_without_traffic() {
        let mx = test_collector();
        emit_arcstats(&mx, "name type data\nsize 4 1024\n", "pve1");

        assert_eq!(mx.zfs_arc_size.with_label_values(&["pve1"]).get(), 1024.0);
        // hit ratio vec must have no children when hits + misses == 0
        let encoded = mx.encode().unwrap();
        assert!(!encoded.contains("pve_zfs_arc_hit_ratio_percent{"));
    }
}
