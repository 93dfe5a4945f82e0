//! End-to-end scrape scenarios against a mocked Proxmox API.

use chrono::TimeZone;
use mockito::{Server, ServerGuard};
use pve_exporter::client::PveClient;
use pve_exporter::config::{ProxmoxConfig, SmartConfig};
use pve_exporter::metrics::MetricsCollector;
use std::sync::Arc;

fn token_config() -> ProxmoxConfig {
    ProxmoxConfig {
        host: "localhost".to_string(),
        port: 8006,
        user: String::new(),
        password: String::new(),
        token_id: "monitor@pve!exporter".to_string(),
        token_secret: "test-secret".to_string(),
        insecure_skip_verify: true,
        timeout_seconds: 5,
    }
}

fn collector_for(server: &ServerGuard) -> MetricsCollector {
    let client =
        PveClient::with_base_url(token_config(), format!("{}/api2/json", server.url())).unwrap();
    MetricsCollector::new(Arc::new(client), SmartConfig::default()).unwrap()
}

/// Find a sample of `family` whose label block contains every fragment, and
/// return its value. Robust against label ordering in the text format.
fn metric_value(output: &str, family: &str, label_fragments: &[&str]) -> Option<f64> {
    output
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find(|line| {
            let rest = line.strip_prefix(family);
            matches!(rest, Some(rest) if rest.starts_with('{') || rest.starts_with(' '))
                && label_fragments.iter().all(|f| line.contains(f))
        })
        .and_then(|line| line.rsplit(' ').next()?.parse().ok())
}

fn local_timestamp(raw: &str) -> f64 {
    let naive = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap();
    chrono::Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap()
        .timestamp() as f64
}

#[tokio::test]
async fn test_minimal_single_node_cluster() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let _status = server
        .mock("GET", "/api2/json/nodes/pve1/status")
        .with_status(200)
        .with_body(
            r#"{"data": {
                "loadavg": ["0.50", "0.40", "0.30"],
                "wait": 0.01,
                "idle": 0.95,
                "ksm": {"shared": 123456},
                "cpuinfo": {"cores": 4, "sockets": 1, "mhz": "2400.000"},
                "rootfs": {"total": 100000000000, "used": 40000000000, "free": 60000000000},
                "swap": {"total": 4294967296, "used": 0, "free": 4294967296}
            }}"#,
        )
        .create_async()
        .await;

    let _qemu = server
        .mock("GET", "/api2/json/nodes/pve1/qemu")
        .with_status(200)
        .with_body(r#"{"data": []}"#)
        .create_async()
        .await;

    let _lxc = server
        .mock("GET", "/api2/json/nodes/pve1/lxc")
        .with_status(200)
        .with_body(r#"{"data": []}"#)
        .create_async()
        .await;

    let _storage = server
        .mock("GET", "/api2/json/nodes/pve1/storage")
        .with_status(200)
        .with_body(
            r#"{"data": [{"storage": "local", "type": "dir", "total": 1000000000000,
                          "used": 500000000000, "avail": 500000000000, "active": 1,
                          "enabled": 1, "shared": 0, "used_fraction": 0.5}]}"#,
        )
        .create_async()
        .await;

    let _cluster = server
        .mock("GET", "/api2/json/cluster/status")
        .with_status(200)
        .with_body(
            r#"{"data": [
                {"type": "cluster", "name": "mycluster", "quorate": 1, "nodes": 1},
                {"type": "node", "name": "pve1", "online": 1}
            ]}"#,
        )
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    assert!(output.contains("pve_up 1"));
    assert_eq!(
        metric_value(&output, "pve_node_up", &[r#"node="pve1""#]),
        Some(1.0)
    );
    assert_eq!(
        metric_value(&output, "pve_node_cpus_total", &[r#"node="pve1""#]),
        Some(4.0)
    );
    assert_eq!(
        metric_value(&output, "pve_node_memory_free_bytes", &[r#"node="pve1""#]),
        Some(8000000000.0)
    );
    assert_eq!(
        metric_value(&output, "pve_node_load1", &[r#"node="pve1""#]),
        Some(0.5)
    );
    assert_eq!(
        metric_value(&output, "pve_node_cpu_mhz", &[r#"node="pve1""#]),
        Some(2400.0)
    );
    assert_eq!(
        metric_value(&output, "pve_node_vm_count", &[r#"node="pve1""#]),
        Some(0.0)
    );

    // Storage accounting stays consistent
    let total = metric_value(&output, "pve_storage_total_bytes", &[r#"storage="local""#]).unwrap();
    let used = metric_value(&output, "pve_storage_used_bytes", &[r#"storage="local""#]).unwrap();
    let avail =
        metric_value(&output, "pve_storage_available_bytes", &[r#"storage="local""#]).unwrap();
    assert!(used + avail <= total);
    assert_eq!(
        metric_value(&output, "pve_storage_used_fraction", &[r#"storage="local""#]),
        Some(0.5)
    );

    assert!(output.contains("pve_cluster_quorate 1"));
    assert!(output.contains("pve_cluster_nodes_total 1"));
    assert!(output.contains("pve_cluster_nodes_online 1"));
    // HA endpoint is down, so the counts fall back to zero
    assert!(output.contains("pve_ha_resources_total 0"));
    assert!(output.contains("pve_ha_resources_active 0"));

    // Prometheus text format
    assert!(output.contains("# HELP"));
    assert!(output.contains("# TYPE"));
}

#[tokio::test]
async fn test_running_qemu_with_balloon_and_block_devices() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let _qemu = server
        .mock("GET", "/api2/json/nodes/pve1/qemu")
        .with_status(200)
        .with_body(
            r#"{"data": [{"vmid": 100, "name": "web", "status": "running", "uptime": 3600,
                          "cpu": 0.1, "cpus": 2, "mem": 1073741824, "maxmem": 2147483648,
                          "disk": 0, "maxdisk": 34359738368, "netin": 1000, "netout": 2000,
                          "diskread": 3000, "diskwrite": 4000}]}"#,
        )
        .create_async()
        .await;

    let _current = server
        .mock("GET", "/api2/json/nodes/pve1/qemu/100/status/current")
        .with_status(200)
        .with_body(
            r#"{"data": {
                "diskread": 3500, "diskwrite": 4500,
                "balloon": 2147483648, "freemem": 1073741824, "pid": 12345,
                "memhost": 2200000000, "ha": {"managed": 1},
                "ballooninfo": {"actual": 2147483648, "max_mem": 2147483648,
                                "total_mem": 2147483648, "major_page_faults": 42,
                                "minor_page_faults": 4242, "mem_swapped_in": 0,
                                "mem_swapped_out": 0},
                "pressurecpufull": 0.01, "pressurecpusome": 0.05,
                "pressureiofull": 0, "pressureiosome": 0,
                "pressurememoryfull": 0, "pressurememorysome": 0,
                "blockstat": {"scsi0": {"rd_bytes": 1000000, "wr_bytes": 2000000,
                                        "rd_operations": 100, "wr_operations": 200,
                                        "failed_rd_operations": 0, "failed_wr_operations": 0,
                                        "flush_operations": 50}},
                "nics": {"net0": {"netin": 5000, "netout": 6000}}
            }}"#,
        )
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    let vm = &[r#"vmid="100""#, r#"name="web""#];
    assert_eq!(metric_value(&output, "pve_vm_status", vm), Some(1.0));
    assert_eq!(
        metric_value(&output, "pve_vm_balloon_actual_bytes", vm),
        Some(2147483648.0)
    );
    assert_eq!(
        metric_value(&output, "pve_vm_memory_free_bytes", vm),
        Some(1073741824.0)
    );
    assert_eq!(
        metric_value(&output, "pve_vm_balloon_major_page_faults_total", vm),
        Some(42.0)
    );
    assert_eq!(metric_value(&output, "pve_vm_ha_managed", vm), Some(1.0));
    assert_eq!(metric_value(&output, "pve_vm_pid", vm), Some(12345.0));
    assert_eq!(
        metric_value(&output, "pve_vm_pressure_cpu_full", vm),
        Some(0.01)
    );

    // The detail body wins over the stale listing counters
    assert_eq!(
        metric_value(&output, "pve_vm_disk_read_bytes_total", vm),
        Some(3500.0)
    );

    assert_eq!(
        metric_value(
            &output,
            "pve_vm_block_read_bytes_total",
            &[r#"vmid="100""#, r#"device="scsi0""#],
        ),
        Some(1000000.0)
    );
    assert_eq!(
        metric_value(
            &output,
            "pve_vm_block_flush_ops_total",
            &[r#"vmid="100""#, r#"device="scsi0""#],
        ),
        Some(50.0)
    );
    assert_eq!(
        metric_value(
            &output,
            "pve_vm_nic_in_bytes_total",
            &[r#"vmid="100""#, r#"interface="net0""#],
        ),
        Some(5000.0)
    );

    assert_eq!(
        metric_value(&output, "pve_node_vm_count", &[r#"node="pve1""#]),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_lxc_pressure_strings_parse_or_drop() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let _lxc = server
        .mock("GET", "/api2/json/nodes/pve1/lxc")
        .with_status(200)
        .with_body(
            r#"{"data": [{"vmid": 200, "name": "db", "status": "running", "uptime": 7200,
                          "cpu": 0.02, "cpus": 1, "mem": 268435456, "maxmem": 536870912,
                          "disk": 1073741824, "maxdisk": 8589934592, "netin": 100, "netout": 200,
                          "diskread": 300, "diskwrite": 400}]}"#,
        )
        .create_async()
        .await;

    let _current = server
        .mock("GET", "/api2/json/nodes/pve1/lxc/200/status/current")
        .with_status(200)
        .with_body(
            r#"{"data": {
                "swap": 1048576, "maxswap": 4194304, "pid": 999, "ha": {"managed": 0},
                "pressurecpusome": "0.75", "pressureiofull": "not_a_number"
            }}"#,
        )
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    let ct = &[r#"vmid="200""#, r#"name="db""#];
    assert_eq!(metric_value(&output, "pve_lxc_status", ct), Some(1.0));
    assert_eq!(
        metric_value(&output, "pve_lxc_swap_used_bytes", ct),
        Some(1048576.0)
    );
    assert_eq!(
        metric_value(&output, "pve_lxc_swap_max_bytes", ct),
        Some(4194304.0)
    );
    assert_eq!(
        metric_value(&output, "pve_lxc_pressure_cpu_some", ct),
        Some(0.75)
    );
    // The unparseable PSI string drops only its own sample
    assert_eq!(metric_value(&output, "pve_lxc_pressure_io_full", ct), None);

    assert_eq!(
        metric_value(&output, "pve_node_lxc_count", &[r#"node="pve1""#]),
        Some(1.0)
    );
}

#[tokio::test]
async fn test_batch_backup_log_parsing() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let _resources = server
        .mock("GET", "/api2/json/cluster/resources?type=vm")
        .with_status(200)
        .with_body(
            r#"{"data": [
                {"vmid": 100, "node": "pve1", "name": "a", "type": "qemu", "status": "stopped"},
                {"vmid": 200, "node": "pve1", "name": "b", "type": "lxc", "status": "stopped"}
            ]}"#,
        )
        .create_async()
        .await;

    // One successful batch task (empty id) plus a failed one that is skipped
    let _tasks = server
        .mock(
            "GET",
            "/api2/json/nodes/pve1/tasks?typefilter=vzdump&limit=50",
        )
        .with_status(200)
        .with_body(
            r#"{"data": [
                {"upid": "UPID:pve1:0001:vzdump:", "id": "", "starttime": 1705280000,
                 "endtime": 1705286000, "status": "OK"},
                {"upid": "UPID:pve1:0002:vzdump:", "id": "", "starttime": 1705100000,
                 "endtime": 1705100500, "status": "job errors"}
            ]}"#,
        )
        .create_async()
        .await;

    let _log = server
        .mock(
            "GET",
            "/api2/json/nodes/pve1/tasks/UPID:pve1:0001:vzdump:/log?limit=1000000",
        )
        .with_status(200)
        .with_body(
            r#"{"data": [
                {"n": 1, "t": "INFO: Starting Backup of VM 100 (qemu)"},
                {"n": 2, "t": "INFO: Finished Backup of VM 100 (00:02:11)"},
                {"n": 3, "t": "INFO: Backup finished at 2024-01-15 03:45:22"},
                {"n": 4, "t": "INFO: Starting Backup of VM 200 (lxc)"},
                {"n": 5, "t": "INFO: Finished Backup of VM 200 (00:00:48)"},
                {"n": 6, "t": "INFO: Backup finished at 2024-01-15 03:52:10"}
            ]}"#,
        )
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    assert_eq!(
        metric_value(
            &output,
            "pve_vm_last_backup_timestamp",
            &[r#"vmid="100""#, r#"name="a""#],
        ),
        Some(local_timestamp("2024-01-15 03:45:22"))
    );
    assert_eq!(
        metric_value(
            &output,
            "pve_lxc_last_backup_timestamp",
            &[r#"vmid="200""#, r#"name="b""#],
        ),
        Some(local_timestamp("2024-01-15 03:52:10"))
    );
}

#[tokio::test]
async fn test_single_guest_backup_fast_path() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let _resources = server
        .mock("GET", "/api2/json/cluster/resources?type=vm")
        .with_status(200)
        .with_body(
            r#"{"data": [{"vmid": 100, "node": "pve1", "name": "a", "type": "qemu", "status": "stopped"}]}"#,
        )
        .create_async()
        .await;

    // Two single-guest runs; the newer endtime wins
    let _tasks = server
        .mock(
            "GET",
            "/api2/json/nodes/pve1/tasks?typefilter=vzdump&limit=50",
        )
        .with_status(200)
        .with_body(
            r#"{"data": [
                {"upid": "UPID:pve1:0003:vzdump:", "id": "100", "starttime": 1705280000,
                 "endtime": 1705286000, "status": "OK"},
                {"upid": "UPID:pve1:0004:vzdump:", "id": "100", "starttime": 1705180000,
                 "endtime": 1705186000, "status": "OK"}
            ]}"#,
        )
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    assert_eq!(
        metric_value(
            &output,
            "pve_vm_last_backup_timestamp",
            &[r#"vmid="100""#],
        ),
        Some(1705286000.0)
    );
}

#[tokio::test]
async fn test_single_node_without_cluster_entry_is_quorate() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let _cluster = server
        .mock("GET", "/api2/json/cluster/status")
        .with_status(200)
        .with_body(r#"{"data": [{"type": "node", "name": "pve1", "online": 1}]}"#)
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    assert!(output.contains("pve_cluster_quorate 1"));
    assert!(output.contains("pve_cluster_nodes_total 1"));
    assert!(output.contains("pve_cluster_nodes_online 1"));
}

#[tokio::test]
async fn test_replication_job_status() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(r#"{"data": []}"#)
        .create_async()
        .await;

    let _replication = server
        .mock("GET", "/api2/json/cluster/replication")
        .with_status(200)
        .with_body(
            r#"{"data": [
                {"id": "100-0", "guest": 100, "last_sync": 1705286000, "duration": 12.5,
                 "fail_count": 0, "error": ""},
                {"id": "200-0", "guest": 200, "last_sync": 0, "duration": 3.0,
                 "fail_count": 2, "error": "command failed"}
            ]}"#,
        )
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    let healthy = &[r#"guest="100""#, r#"job="100-0""#];
    assert_eq!(
        metric_value(&output, "pve_replication_last_sync_timestamp", healthy),
        Some(1705286000.0)
    );
    assert_eq!(
        metric_value(&output, "pve_replication_duration_seconds", healthy),
        Some(12.5)
    );
    assert_eq!(
        metric_value(&output, "pve_replication_status", healthy),
        Some(1.0)
    );

    let failing = &[r#"guest="200""#, r#"job="200-0""#];
    assert_eq!(
        metric_value(&output, "pve_replication_status", failing),
        Some(0.0)
    );
    // A zero last-sync never becomes a sample
    assert_eq!(
        metric_value(&output, "pve_replication_last_sync_timestamp", failing),
        None
    );
}

#[tokio::test]
async fn test_certificate_expiry_prefers_pveproxy_cert() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let far_future = chrono::Utc::now().timestamp() + 90 * 24 * 3600;
    let _certs = server
        .mock("GET", "/api2/json/nodes/pve1/certificates/info")
        .with_status(200)
        .with_body(format!(
            r#"{{"data": [
                {{"filename": "pve-root-ca.pem", "notafter": 1}},
                {{"filename": "pveproxy-ssl.pem", "notafter": {far_future}}}
            ]}}"#,
        ))
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    let expiry =
        metric_value(&output, "pve_certificate_expiry_seconds", &[r#"node="pve1""#]).unwrap();
    // ~90 days out, give the scrape a generous minute of slack
    assert!(expiry > 89.0 * 24.0 * 3600.0 && expiry <= 90.0 * 24.0 * 3600.0 + 60.0);
}

#[tokio::test]
async fn test_zfs_pool_health() {
    let mut server = Server::new_async().await;

    let _nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(
            r#"{"data": [{"node": "pve1", "status": "online", "uptime": 1000,
                          "cpu": 0.25, "maxcpu": 4, "mem": 8000000000, "maxmem": 16000000000}]}"#,
        )
        .create_async()
        .await;

    let _zfs = server
        .mock("GET", "/api2/json/nodes/pve1/disks/zfs")
        .with_status(200)
        .with_body(
            r#"{"data": [
                {"name": "rpool", "health": "ONLINE", "size": 1000000000000,
                 "alloc": 400000000000, "free": 600000000000, "frag": 12},
                {"name": "tank", "health": "DEGRADED", "size": 2000000000000,
                 "alloc": 100000000000, "free": 1900000000000, "frag": 3}
            ]}"#,
        )
        .create_async()
        .await;

    let collector = collector_for(&server);
    collector.collect().await.unwrap();
    let output = collector.encode().unwrap();

    assert_eq!(
        metric_value(&output, "pve_zfs_pool_health_status", &[r#"pool="rpool""#]),
        Some(1.0)
    );
    assert_eq!(
        metric_value(&output, "pve_zfs_pool_health_status", &[r#"pool="tank""#]),
        Some(0.0)
    );
    assert_eq!(
        metric_value(&output, "pve_zfs_pool_frag_percent", &[r#"pool="rpool""#]),
        Some(12.0)
    );
}
