//! Prometheus metric definitions and the scrape orchestrator.
//!
//! [`MetricsCollector`] owns the registry and every descriptor handle; the
//! set of metric identities is fixed at construction and never changes.
//! Each scrape resets the labelled vectors (so series for disappeared
//! objects vanish), re-authenticates, pre-fetches the shared inventories
//! and fans out all sub-collectors concurrently.

use crate::client::PveClient;
use crate::collectors::{self, node::NodeListEntry, ClusterResource, GuestInfo, GuestKind};
use crate::config::SmartConfig;
use crate::error::{ExporterError, Result};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const NODE_LABELS: &[&str] = &["node"];
const GUEST_LABELS: &[&str] = &["node", "vmid", "name"];
const GUEST_DEVICE_LABELS: &[&str] = &["node", "vmid", "name", "device"];
const GUEST_IFACE_LABELS: &[&str] = &["node", "vmid", "name", "interface"];
const STORAGE_LABELS: &[&str] = &["node", "storage", "type"];
const POOL_LABELS: &[&str] = &["node", "pool"];
const SENSOR_LABELS: &[&str] = &["node", "chip", "adapter", "sensor"];
const DISK_LABELS: &[&str] = &["node", "device", "model", "serial", "type"];
const DISK_IO_LABELS: &[&str] = &["node", "device"];
const REPLICATION_LABELS: &[&str] = &["guest", "job"];

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, help))
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;
    Ok(gauge)
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<GaugeVec> {
    let vec = GaugeVec::new(Opts::new(name, help), labels)
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(|e| ExporterError::Metrics(e.to_string()))?;
    Ok(vec)
}

/// Process-wide collector: configuration, the shared API client and the
/// immutable descriptor catalogue.
pub struct MetricsCollector {
    pub(crate) client: Arc<PveClient>,
    pub(crate) smart: SmartConfig,
    registry: Registry,

    /// 1 when the last scrape pipeline ran to completion
    pub(crate) up: Gauge,

    // Node metrics
    pub(crate) node_up: GaugeVec,
    pub(crate) node_uptime: GaugeVec,
    pub(crate) node_cpu_load: GaugeVec,
    pub(crate) node_cpus: GaugeVec,
    pub(crate) node_memory_total: GaugeVec,
    pub(crate) node_memory_used: GaugeVec,
    pub(crate) node_memory_free: GaugeVec,
    pub(crate) node_swap_total: GaugeVec,
    pub(crate) node_swap_used: GaugeVec,
    pub(crate) node_swap_free: GaugeVec,
    pub(crate) node_vm_count: GaugeVec,
    pub(crate) node_lxc_count: GaugeVec,
    pub(crate) node_load1: GaugeVec,
    pub(crate) node_load5: GaugeVec,
    pub(crate) node_load15: GaugeVec,
    pub(crate) node_iowait: GaugeVec,
    pub(crate) node_idle: GaugeVec,
    pub(crate) node_cpu_mhz: GaugeVec,
    pub(crate) node_rootfs_total: GaugeVec,
    pub(crate) node_rootfs_used: GaugeVec,
    pub(crate) node_rootfs_free: GaugeVec,
    pub(crate) node_cpu_cores: GaugeVec,
    pub(crate) node_cpu_sockets: GaugeVec,
    pub(crate) node_ksm_shared: GaugeVec,

    // VM metrics
    pub(crate) vm_status: GaugeVec,
    pub(crate) vm_uptime: GaugeVec,
    pub(crate) vm_cpu: GaugeVec,
    pub(crate) vm_cpus: GaugeVec,
    pub(crate) vm_memory_used: GaugeVec,
    pub(crate) vm_memory_max: GaugeVec,
    pub(crate) vm_memory_free: GaugeVec,
    pub(crate) vm_memory_host: GaugeVec,
    pub(crate) vm_disk_max: GaugeVec,
    pub(crate) vm_net_in: GaugeVec,
    pub(crate) vm_net_out: GaugeVec,
    pub(crate) vm_disk_read: GaugeVec,
    pub(crate) vm_disk_write: GaugeVec,
    pub(crate) vm_ha_managed: GaugeVec,
    pub(crate) vm_pid: GaugeVec,
    pub(crate) vm_balloon: GaugeVec,
    pub(crate) vm_pressure_cpu_full: GaugeVec,
    pub(crate) vm_pressure_cpu_some: GaugeVec,
    pub(crate) vm_pressure_io_full: GaugeVec,
    pub(crate) vm_pressure_io_some: GaugeVec,
    pub(crate) vm_pressure_memory_full: GaugeVec,
    pub(crate) vm_pressure_memory_some: GaugeVec,
    pub(crate) vm_balloon_actual: GaugeVec,
    pub(crate) vm_balloon_max: GaugeVec,
    pub(crate) vm_balloon_total: GaugeVec,
    pub(crate) vm_balloon_major_faults: GaugeVec,
    pub(crate) vm_balloon_minor_faults: GaugeVec,
    pub(crate) vm_balloon_swapped_in: GaugeVec,
    pub(crate) vm_balloon_swapped_out: GaugeVec,
    pub(crate) vm_block_read_bytes: GaugeVec,
    pub(crate) vm_block_write_bytes: GaugeVec,
    pub(crate) vm_block_read_ops: GaugeVec,
    pub(crate) vm_block_write_ops: GaugeVec,
    pub(crate) vm_block_failed_read_ops: GaugeVec,
    pub(crate) vm_block_failed_write_ops: GaugeVec,
    pub(crate) vm_block_flush_ops: GaugeVec,
    pub(crate) vm_nic_in: GaugeVec,
    pub(crate) vm_nic_out: GaugeVec,
    pub(crate) vm_last_backup: GaugeVec,

    // LXC metrics
    pub(crate) lxc_status: GaugeVec,
    pub(crate) lxc_uptime: GaugeVec,
    pub(crate) lxc_cpu: GaugeVec,
    pub(crate) lxc_cpus: GaugeVec,
    pub(crate) lxc_memory_used: GaugeVec,
    pub(crate) lxc_memory_max: GaugeVec,
    pub(crate) lxc_disk_used: GaugeVec,
    pub(crate) lxc_disk_max: GaugeVec,
    pub(crate) lxc_net_in: GaugeVec,
    pub(crate) lxc_net_out: GaugeVec,
    pub(crate) lxc_disk_read: GaugeVec,
    pub(crate) lxc_disk_write: GaugeVec,
    pub(crate) lxc_swap_used: GaugeVec,
    pub(crate) lxc_swap_max: GaugeVec,
    pub(crate) lxc_ha_managed: GaugeVec,
    pub(crate) lxc_pid: GaugeVec,
    pub(crate) lxc_pressure_cpu_full: GaugeVec,
    pub(crate) lxc_pressure_cpu_some: GaugeVec,
    pub(crate) lxc_pressure_io_full: GaugeVec,
    pub(crate) lxc_pressure_io_some: GaugeVec,
    pub(crate) lxc_pressure_memory_full: GaugeVec,
    pub(crate) lxc_pressure_memory_some: GaugeVec,
    pub(crate) lxc_last_backup: GaugeVec,

    // Storage metrics
    pub(crate) storage_total: GaugeVec,
    pub(crate) storage_used: GaugeVec,
    pub(crate) storage_avail: GaugeVec,
    pub(crate) storage_active: GaugeVec,
    pub(crate) storage_enabled: GaugeVec,
    pub(crate) storage_shared: GaugeVec,
    pub(crate) storage_used_fraction: GaugeVec,

    // ZFS metrics
    pub(crate) zfs_pool_health: GaugeVec,
    pub(crate) zfs_pool_size: GaugeVec,
    pub(crate) zfs_pool_alloc: GaugeVec,
    pub(crate) zfs_pool_free: GaugeVec,
    pub(crate) zfs_pool_frag: GaugeVec,
    pub(crate) zfs_arc_size: GaugeVec,
    pub(crate) zfs_arc_min_size: GaugeVec,
    pub(crate) zfs_arc_max_size: GaugeVec,
    pub(crate) zfs_arc_target_size: GaugeVec,
    pub(crate) zfs_arc_hits: GaugeVec,
    pub(crate) zfs_arc_misses: GaugeVec,
    pub(crate) zfs_arc_hit_ratio: GaugeVec,
    pub(crate) zfs_arc_l2_hits: GaugeVec,
    pub(crate) zfs_arc_l2_misses: GaugeVec,
    pub(crate) zfs_arc_l2_size: GaugeVec,
    pub(crate) zfs_arc_l2_header_size: GaugeVec,

    // Hardware sensor metrics
    pub(crate) sensor_temperature: GaugeVec,
    pub(crate) sensor_fan_rpm: GaugeVec,
    pub(crate) sensor_voltage: GaugeVec,
    pub(crate) sensor_power: GaugeVec,

    // Disk SMART metrics
    pub(crate) disk_temperature: GaugeVec,
    pub(crate) disk_power_on_hours: GaugeVec,
    pub(crate) disk_health: GaugeVec,
    pub(crate) disk_data_written: GaugeVec,
    pub(crate) disk_available_spare: GaugeVec,
    pub(crate) disk_percentage_used: GaugeVec,

    // Disk I/O metrics
    pub(crate) disk_read_bytes: GaugeVec,
    pub(crate) disk_write_bytes: GaugeVec,
    pub(crate) disk_reads_completed: GaugeVec,
    pub(crate) disk_writes_completed: GaugeVec,
    pub(crate) disk_io_time: GaugeVec,

    // Cluster/HA metrics
    pub(crate) cluster_quorate: Gauge,
    pub(crate) cluster_nodes_total: Gauge,
    pub(crate) cluster_nodes_online: Gauge,
    pub(crate) ha_resources_total: Gauge,
    pub(crate) ha_resources_active: Gauge,

    // Replication metrics
    pub(crate) replication_last_sync: GaugeVec,
    pub(crate) replication_duration: GaugeVec,
    pub(crate) replication_status: GaugeVec,

    // Certificate metrics
    pub(crate) certificate_expiry: GaugeVec,
}

impl MetricsCollector {
    /// Create the collector and register every descriptor.
    pub fn new(client: Arc<PveClient>, smart: SmartConfig) -> Result<Self> {
        let registry = Registry::new();
        let r = &registry;

        Ok(Self {
            up: gauge(
                r,
                "pve_up",
                "Whether the last scrape of the Proxmox API was successful (1 = success, 0 = failure)",
            )?,

            node_up: gauge_vec(r, "pve_node_up", "Node is up and reachable", NODE_LABELS)?,
            node_uptime: gauge_vec(
                r,
                "pve_node_uptime_seconds",
                "Node uptime in seconds",
                NODE_LABELS,
            )?,
            node_cpu_load: gauge_vec(r, "pve_node_cpu_load", "Node CPU load", NODE_LABELS)?,
            node_cpus: gauge_vec(r, "pve_node_cpus_total", "Total number of CPUs", NODE_LABELS)?,
            node_memory_total: gauge_vec(
                r,
                "pve_node_memory_total_bytes",
                "Total memory in bytes",
                NODE_LABELS,
            )?,
            node_memory_used: gauge_vec(
                r,
                "pve_node_memory_used_bytes",
                "Used memory in bytes",
                NODE_LABELS,
            )?,
            node_memory_free: gauge_vec(
                r,
                "pve_node_memory_free_bytes",
                "Free memory in bytes",
                NODE_LABELS,
            )?,
            node_swap_total: gauge_vec(
                r,
                "pve_node_swap_total_bytes",
                "Total swap in bytes",
                NODE_LABELS,
            )?,
            node_swap_used: gauge_vec(
                r,
                "pve_node_swap_used_bytes",
                "Used swap in bytes",
                NODE_LABELS,
            )?,
            node_swap_free: gauge_vec(
                r,
                "pve_node_swap_free_bytes",
                "Free swap in bytes",
                NODE_LABELS,
            )?,
            node_vm_count: gauge_vec(r, "pve_node_vm_count", "Number of QEMU VMs", NODE_LABELS)?,
            node_lxc_count: gauge_vec(
                r,
                "pve_node_lxc_count",
                "Number of LXC containers",
                NODE_LABELS,
            )?,
            node_load1: gauge_vec(r, "pve_node_load1", "Node load average 1 minute", NODE_LABELS)?,
            node_load5: gauge_vec(r, "pve_node_load5", "Node load average 5 minutes", NODE_LABELS)?,
            node_load15: gauge_vec(
                r,
                "pve_node_load15",
                "Node load average 15 minutes",
                NODE_LABELS,
            )?,
            node_iowait: gauge_vec(r, "pve_node_iowait", "Node I/O wait ratio", NODE_LABELS)?,
            node_idle: gauge_vec(r, "pve_node_idle", "Node idle CPU ratio", NODE_LABELS)?,
            node_cpu_mhz: gauge_vec(r, "pve_node_cpu_mhz", "CPU frequency in MHz", NODE_LABELS)?,
            node_rootfs_total: gauge_vec(
                r,
                "pve_node_rootfs_total_bytes",
                "Node root filesystem total size in bytes",
                NODE_LABELS,
            )?,
            node_rootfs_used: gauge_vec(
                r,
                "pve_node_rootfs_used_bytes",
                "Node root filesystem used in bytes",
                NODE_LABELS,
            )?,
            node_rootfs_free: gauge_vec(
                r,
                "pve_node_rootfs_free_bytes",
                "Node root filesystem free in bytes",
                NODE_LABELS,
            )?,
            node_cpu_cores: gauge_vec(
                r,
                "pve_node_cpu_cores",
                "Number of CPU cores per socket",
                NODE_LABELS,
            )?,
            node_cpu_sockets: gauge_vec(
                r,
                "pve_node_cpu_sockets",
                "Number of CPU sockets",
                NODE_LABELS,
            )?,
            node_ksm_shared: gauge_vec(
                r,
                "pve_node_ksm_shared_bytes",
                "KSM shared memory in bytes",
                NODE_LABELS,
            )?,

            vm_status: gauge_vec(
                r,
                "pve_vm_status",
                "VM status (1=running, 0=stopped)",
                GUEST_LABELS,
            )?,
            vm_uptime: gauge_vec(
                r,
                "pve_vm_uptime_seconds",
                "VM uptime in seconds",
                GUEST_LABELS,
            )?,
            vm_cpu: gauge_vec(r, "pve_vm_cpu_usage", "VM CPU usage", GUEST_LABELS)?,
            vm_cpus: gauge_vec(
                r,
                "pve_vm_cpus",
                "Number of CPUs allocated to VM",
                GUEST_LABELS,
            )?,
            vm_memory_used: gauge_vec(
                r,
                "pve_vm_memory_used_bytes",
                "VM memory usage in bytes",
                GUEST_LABELS,
            )?,
            vm_memory_max: gauge_vec(
                r,
                "pve_vm_memory_max_bytes",
                "VM maximum memory in bytes",
                GUEST_LABELS,
            )?,
            vm_memory_free: gauge_vec(
                r,
                "pve_vm_memory_free_bytes",
                "VM free memory in bytes (from guest agent/balloon)",
                GUEST_LABELS,
            )?,
            vm_memory_host: gauge_vec(
                r,
                "pve_vm_memory_host_bytes",
                "VM host memory allocation in bytes",
                GUEST_LABELS,
            )?,
            vm_disk_max: gauge_vec(
                r,
                "pve_vm_disk_max_bytes",
                "VM maximum disk in bytes",
                GUEST_LABELS,
            )?,
            vm_net_in: gauge_vec(
                r,
                "pve_vm_network_in_bytes_total",
                "VM network input in bytes",
                GUEST_LABELS,
            )?,
            vm_net_out: gauge_vec(
                r,
                "pve_vm_network_out_bytes_total",
                "VM network output in bytes",
                GUEST_LABELS,
            )?,
            vm_disk_read: gauge_vec(
                r,
                "pve_vm_disk_read_bytes_total",
                "VM disk read in bytes",
                GUEST_LABELS,
            )?,
            vm_disk_write: gauge_vec(
                r,
                "pve_vm_disk_write_bytes_total",
                "VM disk write in bytes",
                GUEST_LABELS,
            )?,
            vm_ha_managed: gauge_vec(
                r,
                "pve_vm_ha_managed",
                "VM is managed by HA (1=yes, 0=no)",
                GUEST_LABELS,
            )?,
            vm_pid: gauge_vec(r, "pve_vm_pid", "VM process ID", GUEST_LABELS)?,
            vm_balloon: gauge_vec(
                r,
                "pve_vm_balloon_bytes",
                "VM balloon target in bytes",
                GUEST_LABELS,
            )?,
            vm_pressure_cpu_full: gauge_vec(
                r,
                "pve_vm_pressure_cpu_full",
                "VM CPU pressure full ratio",
                GUEST_LABELS,
            )?,
            vm_pressure_cpu_some: gauge_vec(
                r,
                "pve_vm_pressure_cpu_some",
                "VM CPU pressure some ratio",
                GUEST_LABELS,
            )?,
            vm_pressure_io_full: gauge_vec(
                r,
                "pve_vm_pressure_io_full",
                "VM I/O pressure full ratio",
                GUEST_LABELS,
            )?,
            vm_pressure_io_some: gauge_vec(
                r,
                "pve_vm_pressure_io_some",
                "VM I/O pressure some ratio",
                GUEST_LABELS,
            )?,
            vm_pressure_memory_full: gauge_vec(
                r,
                "pve_vm_pressure_memory_full",
                "VM memory pressure full ratio",
                GUEST_LABELS,
            )?,
            vm_pressure_memory_some: gauge_vec(
                r,
                "pve_vm_pressure_memory_some",
                "VM memory pressure some ratio",
                GUEST_LABELS,
            )?,
            vm_balloon_actual: gauge_vec(
                r,
                "pve_vm_balloon_actual_bytes",
                "VM balloon actual memory in bytes",
                GUEST_LABELS,
            )?,
            vm_balloon_max: gauge_vec(
                r,
                "pve_vm_balloon_max_bytes",
                "VM balloon maximum memory in bytes",
                GUEST_LABELS,
            )?,
            vm_balloon_total: gauge_vec(
                r,
                "pve_vm_balloon_total_bytes",
                "VM balloon total guest memory in bytes",
                GUEST_LABELS,
            )?,
            vm_balloon_major_faults: gauge_vec(
                r,
                "pve_vm_balloon_major_page_faults_total",
                "VM major page faults",
                GUEST_LABELS,
            )?,
            vm_balloon_minor_faults: gauge_vec(
                r,
                "pve_vm_balloon_minor_page_faults_total",
                "VM minor page faults",
                GUEST_LABELS,
            )?,
            vm_balloon_swapped_in: gauge_vec(
                r,
                "pve_vm_balloon_mem_swapped_in_bytes",
                "VM memory swapped in",
                GUEST_LABELS,
            )?,
            vm_balloon_swapped_out: gauge_vec(
                r,
                "pve_vm_balloon_mem_swapped_out_bytes",
                "VM memory swapped out",
                GUEST_LABELS,
            )?,
            vm_block_read_bytes: gauge_vec(
                r,
                "pve_vm_block_read_bytes_total",
                "VM block device read in bytes",
                GUEST_DEVICE_LABELS,
            )?,
            vm_block_write_bytes: gauge_vec(
                r,
                "pve_vm_block_write_bytes_total",
                "VM block device write in bytes",
                GUEST_DEVICE_LABELS,
            )?,
            vm_block_read_ops: gauge_vec(
                r,
                "pve_vm_block_read_ops_total",
                "VM block device read operations",
                GUEST_DEVICE_LABELS,
            )?,
            vm_block_write_ops: gauge_vec(
                r,
                "pve_vm_block_write_ops_total",
                "VM block device write operations",
                GUEST_DEVICE_LABELS,
            )?,
            vm_block_failed_read_ops: gauge_vec(
                r,
                "pve_vm_block_failed_read_ops_total",
                "VM block device failed read operations",
                GUEST_DEVICE_LABELS,
            )?,
            vm_block_failed_write_ops: gauge_vec(
                r,
                "pve_vm_block_failed_write_ops_total",
                "VM block device failed write operations",
                GUEST_DEVICE_LABELS,
            )?,
            vm_block_flush_ops: gauge_vec(
                r,
                "pve_vm_block_flush_ops_total",
                "VM block device flush operations",
                GUEST_DEVICE_LABELS,
            )?,
            vm_nic_in: gauge_vec(
                r,
                "pve_vm_nic_in_bytes_total",
                "VM NIC input in bytes",
                GUEST_IFACE_LABELS,
            )?,
            vm_nic_out: gauge_vec(
                r,
                "pve_vm_nic_out_bytes_total",
                "VM NIC output in bytes",
                GUEST_IFACE_LABELS,
            )?,
            vm_last_backup: gauge_vec(
                r,
                "pve_vm_last_backup_timestamp",
                "Unix timestamp of last successful backup",
                GUEST_LABELS,
            )?,

            lxc_status: gauge_vec(
                r,
                "pve_lxc_status",
                "LXC status (1=running, 0=stopped)",
                GUEST_LABELS,
            )?,
            lxc_uptime: gauge_vec(
                r,
                "pve_lxc_uptime_seconds",
                "LXC uptime in seconds",
                GUEST_LABELS,
            )?,
            lxc_cpu: gauge_vec(r, "pve_lxc_cpu_usage", "LXC CPU usage", GUEST_LABELS)?,
            lxc_cpus: gauge_vec(
                r,
                "pve_lxc_cpus",
                "Number of CPUs allocated to LXC",
                GUEST_LABELS,
            )?,
            lxc_memory_used: gauge_vec(
                r,
                "pve_lxc_memory_used_bytes",
                "LXC memory usage in bytes",
                GUEST_LABELS,
            )?,
            lxc_memory_max: gauge_vec(
                r,
                "pve_lxc_memory_max_bytes",
                "LXC maximum memory in bytes",
                GUEST_LABELS,
            )?,
            lxc_disk_used: gauge_vec(
                r,
                "pve_lxc_disk_used_bytes",
                "LXC disk usage in bytes",
                GUEST_LABELS,
            )?,
            lxc_disk_max: gauge_vec(
                r,
                "pve_lxc_disk_max_bytes",
                "LXC maximum disk in bytes",
                GUEST_LABELS,
            )?,
            lxc_net_in: gauge_vec(
                r,
                "pve_lxc_network_in_bytes_total",
                "LXC network input in bytes",
                GUEST_LABELS,
            )?,
            lxc_net_out: gauge_vec(
                r,
                "pve_lxc_network_out_bytes_total",
                "LXC network output in bytes",
                GUEST_LABELS,
            )?,
            lxc_disk_read: gauge_vec(
                r,
                "pve_lxc_disk_read_bytes_total",
                "LXC disk read in bytes",
                GUEST_LABELS,
            )?,
            lxc_disk_write: gauge_vec(
                r,
                "pve_lxc_disk_write_bytes_total",
                "LXC disk write in bytes",
                GUEST_LABELS,
            )?,
            lxc_swap_used: gauge_vec(
                r,
                "pve_lxc_swap_used_bytes",
                "LXC swap usage in bytes",
                GUEST_LABELS,
            )?,
            lxc_swap_max: gauge_vec(
                r,
                "pve_lxc_swap_max_bytes",
                "LXC maximum swap in bytes",
                GUEST_LABELS,
            )?,
            lxc_ha_managed: gauge_vec(
                r,
                "pve_lxc_ha_managed",
                "LXC is managed by HA (1=yes, 0=no)",
                GUEST_LABELS,
            )?,
            lxc_pid: gauge_vec(r, "pve_lxc_pid", "LXC process ID", GUEST_LABELS)?,
            lxc_pressure_cpu_full: gauge_vec(
                r,
                "pve_lxc_pressure_cpu_full",
                "LXC CPU pressure full ratio",
                GUEST_LABELS,
            )?,
            lxc_pressure_cpu_some: gauge_vec(
                r,
                "pve_lxc_pressure_cpu_some",
                "LXC CPU pressure some ratio",
                GUEST_LABELS,
            )?,
            lxc_pressure_io_full: gauge_vec(
                r,
                "pve_lxc_pressure_io_full",
                "LXC I/O pressure full ratio",
                GUEST_LABELS,
            )?,
            lxc_pressure_io_some: gauge_vec(
                r,
                "pve_lxc_pressure_io_some",
                "LXC I/O pressure some ratio",
                GUEST_LABELS,
            )?,
            lxc_pressure_memory_full: gauge_vec(
                r,
                "pve_lxc_pressure_memory_full",
                "LXC memory pressure full ratio",
                GUEST_LABELS,
            )?,
            lxc_pressure_memory_some: gauge_vec(
                r,
                "pve_lxc_pressure_memory_some",
                "LXC memory pressure some ratio",
                GUEST_LABELS,
            )?,
            lxc_last_backup: gauge_vec(
                r,
                "pve_lxc_last_backup_timestamp",
                "Unix timestamp of last successful backup",
                GUEST_LABELS,
            )?,

            storage_total: gauge_vec(
                r,
                "pve_storage_total_bytes",
                "Total storage size in bytes",
                STORAGE_LABELS,
            )?,
            storage_used: gauge_vec(
                r,
                "pve_storage_used_bytes",
                "Used storage in bytes",
                STORAGE_LABELS,
            )?,
            storage_avail: gauge_vec(
                r,
                "pve_storage_available_bytes",
                "Available storage in bytes",
                STORAGE_LABELS,
            )?,
            storage_active: gauge_vec(
                r,
                "pve_storage_active",
                "Storage is active (1=active, 0=inactive)",
                STORAGE_LABELS,
            )?,
            storage_enabled: gauge_vec(
                r,
                "pve_storage_enabled",
                "Storage is enabled (1=enabled, 0=disabled)",
                STORAGE_LABELS,
            )?,
            storage_shared: gauge_vec(
                r,
                "pve_storage_shared",
                "Storage is shared (1=shared, 0=local)",
                STORAGE_LABELS,
            )?,
            storage_used_fraction: gauge_vec(
                r,
                "pve_storage_used_fraction",
                "Storage used fraction (0.0-1.0)",
                STORAGE_LABELS,
            )?,

            zfs_pool_health: gauge_vec(
                r,
                "pve_zfs_pool_health_status",
                "ZFS pool health status (1=ONLINE, 0=Other)",
                POOL_LABELS,
            )?,
            zfs_pool_size: gauge_vec(
                r,
                "pve_zfs_pool_size_bytes",
                "ZFS pool total size in bytes",
                POOL_LABELS,
            )?,
            zfs_pool_alloc: gauge_vec(
                r,
                "pve_zfs_pool_alloc_bytes",
                "ZFS pool allocated size in bytes",
                POOL_LABELS,
            )?,
            zfs_pool_free: gauge_vec(
                r,
                "pve_zfs_pool_free_bytes",
                "ZFS pool free size in bytes",
                POOL_LABELS,
            )?,
            zfs_pool_frag: gauge_vec(
                r,
                "pve_zfs_pool_frag_percent",
                "ZFS pool fragmentation percentage",
                POOL_LABELS,
            )?,
            zfs_arc_size: gauge_vec(r, "pve_zfs_arc_size_bytes", "ZFS ARC size in bytes", NODE_LABELS)?,
            zfs_arc_min_size: gauge_vec(
                r,
                "pve_zfs_arc_min_size_bytes",
                "ZFS ARC minimum size in bytes",
                NODE_LABELS,
            )?,
            zfs_arc_max_size: gauge_vec(
                r,
                "pve_zfs_arc_max_size_bytes",
                "ZFS ARC maximum size in bytes",
                NODE_LABELS,
            )?,
            zfs_arc_target_size: gauge_vec(
                r,
                "pve_zfs_arc_target_size_bytes",
                "ZFS ARC target size (c) in bytes",
                NODE_LABELS,
            )?,
            zfs_arc_hits: gauge_vec(r, "pve_zfs_arc_hits_total", "ZFS ARC hits total", NODE_LABELS)?,
            zfs_arc_misses: gauge_vec(
                r,
                "pve_zfs_arc_misses_total",
                "ZFS ARC misses total",
                NODE_LABELS,
            )?,
            zfs_arc_hit_ratio: gauge_vec(
                r,
                "pve_zfs_arc_hit_ratio_percent",
                "ZFS ARC hit ratio in percent (0-100)",
                NODE_LABELS,
            )?,
            zfs_arc_l2_hits: gauge_vec(
                r,
                "pve_zfs_arc_l2_hits_total",
                "ZFS L2ARC hits total",
                NODE_LABELS,
            )?,
            zfs_arc_l2_misses: gauge_vec(
                r,
                "pve_zfs_arc_l2_misses_total",
                "ZFS L2ARC misses total",
                NODE_LABELS,
            )?,
            zfs_arc_l2_size: gauge_vec(
                r,
                "pve_zfs_arc_l2_size_bytes",
                "ZFS L2ARC size in bytes",
                NODE_LABELS,
            )?,
            zfs_arc_l2_header_size: gauge_vec(
                r,
                "pve_zfs_arc_l2_header_size_bytes",
                "ZFS L2ARC header size in bytes",
                NODE_LABELS,
            )?,

            sensor_temperature: gauge_vec(
                r,
                "pve_sensor_temperature_celsius",
                "Hardware sensor temperature in Celsius",
                SENSOR_LABELS,
            )?,
            sensor_fan_rpm: gauge_vec(
                r,
                "pve_sensor_fan_rpm",
                "Hardware sensor fan speed in RPM",
                SENSOR_LABELS,
            )?,
            sensor_voltage: gauge_vec(
                r,
                "pve_sensor_voltage_volts",
                "Hardware sensor voltage in Volts",
                SENSOR_LABELS,
            )?,
            sensor_power: gauge_vec(
                r,
                "pve_sensor_power_watts",
                "Hardware sensor power consumption in Watts",
                SENSOR_LABELS,
            )?,

            disk_temperature: gauge_vec(
                r,
                "pve_disk_temperature_celsius",
                "Disk temperature in Celsius",
                DISK_LABELS,
            )?,
            disk_power_on_hours: gauge_vec(
                r,
                "pve_disk_power_on_hours",
                "Disk power on hours",
                DISK_LABELS,
            )?,
            disk_health: gauge_vec(
                r,
                "pve_disk_health_status",
                "Disk health status (1=healthy, 0=failing)",
                DISK_LABELS,
            )?,
            disk_data_written: gauge_vec(
                r,
                "pve_disk_data_written_bytes",
                "Total data written to disk in bytes (NVMe TBW)",
                DISK_LABELS,
            )?,
            disk_available_spare: gauge_vec(
                r,
                "pve_disk_available_spare_percent",
                "NVMe available spare percentage",
                DISK_LABELS,
            )?,
            disk_percentage_used: gauge_vec(
                r,
                "pve_disk_percentage_used",
                "NVMe percentage of life used",
                DISK_LABELS,
            )?,

            disk_read_bytes: gauge_vec(
                r,
                "pve_disk_read_bytes_total",
                "Total bytes read from disk",
                DISK_IO_LABELS,
            )?,
            disk_write_bytes: gauge_vec(
                r,
                "pve_disk_write_bytes_total",
                "Total bytes written to disk",
                DISK_IO_LABELS,
            )?,
            disk_reads_completed: gauge_vec(
                r,
                "pve_disk_reads_completed_total",
                "Total read operations completed",
                DISK_IO_LABELS,
            )?,
            disk_writes_completed: gauge_vec(
                r,
                "pve_disk_writes_completed_total",
                "Total write operations completed",
                DISK_IO_LABELS,
            )?,
            disk_io_time: gauge_vec(
                r,
                "pve_disk_io_time_seconds_total",
                "Total time spent doing I/O operations",
                DISK_IO_LABELS,
            )?,

            cluster_quorate: gauge(r, "pve_cluster_quorate", "Cluster has quorum (1=yes, 0=no)")?,
            cluster_nodes_total: gauge(
                r,
                "pve_cluster_nodes_total",
                "Total number of nodes in cluster",
            )?,
            cluster_nodes_online: gauge(
                r,
                "pve_cluster_nodes_online",
                "Number of online nodes in cluster",
            )?,
            ha_resources_total: gauge(
                r,
                "pve_ha_resources_total",
                "Total number of HA managed resources",
            )?,
            ha_resources_active: gauge(
                r,
                "pve_ha_resources_active",
                "Number of active HA resources",
            )?,

            replication_last_sync: gauge_vec(
                r,
                "pve_replication_last_sync_timestamp",
                "Unix timestamp of last successful replication",
                REPLICATION_LABELS,
            )?,
            replication_duration: gauge_vec(
                r,
                "pve_replication_duration_seconds",
                "Duration of last replication in seconds",
                REPLICATION_LABELS,
            )?,
            replication_status: gauge_vec(
                r,
                "pve_replication_status",
                "Replication status (1=OK, 0=error)",
                REPLICATION_LABELS,
            )?,

            certificate_expiry: gauge_vec(
                r,
                "pve_certificate_expiry_seconds",
                "Seconds until SSL certificate expires",
                NODE_LABELS,
            )?,

            client,
            smart,
            registry,
        })
    }

    /// Run one scrape: reset, authenticate, pre-fetch, fan out, join.
    pub async fn collect(&self) -> Result<()> {
        self.reset_all();

        match self.collect_internal().await {
            Ok(()) => {
                self.up.set(1.0);
                Ok(())
            }
            Err(e) => {
                warn!("Scrape failed: {e}");
                self.up.set(0.0);
                Err(e)
            }
        }
    }

    async fn collect_internal(&self) -> Result<()> {
        // Every scrape reissues authentication
        self.client.ensure_session().await?;

        // The node list is fetched exactly once and reused downstream
        let nodes: Vec<NodeListEntry> = self.client.get("/nodes").await?;
        let node_names: Vec<String> = nodes.iter().map(|n| n.node.clone()).collect();
        info!("Collecting metrics for {} node(s)", node_names.len());

        let guests = self.fetch_guest_inventory().await;

        tokio::join!(
            collectors::node::collect(self, &nodes),
            collectors::guest::collect(self, &node_names),
            collectors::storage::collect(self, &node_names),
            collectors::zfs::collect(self, &node_names),
            collectors::sensors::collect(self),
            collectors::disk::collect(self, &node_names),
            collectors::backup::collect(self, &node_names, &guests),
            collectors::cluster::collect(self),
            collectors::cluster::collect_replication(self),
            collectors::cluster::collect_certificates(self, &node_names),
        );

        Ok(())
    }

    /// Single `/cluster/resources?type=vm` call building the vmid-keyed guest
    /// inventory. On failure the map stays empty and the backup collector
    /// falls back to per-node enumeration.
    async fn fetch_guest_inventory(&self) -> HashMap<String, GuestInfo> {
        let resources: Vec<ClusterResource> =
            match self.client.get("/cluster/resources?type=vm").await {
                Ok(resources) => resources,
                Err(e) => {
                    debug!("Cluster resource inventory unavailable: {e}");
                    return HashMap::new();
                }
            };

        let mut guests = HashMap::new();
        for resource in resources {
            if let Some(kind) = GuestKind::from_api(&resource.kind) {
                guests.insert(
                    resource.vmid.to_string(),
                    GuestInfo {
                        node: resource.node,
                        name: resource.name,
                        kind,
                    },
                );
            }
        }
        guests
    }

    /// Drop every labelled series from the previous scrape and zero the
    /// scalars, so objects that disappeared upstream disappear here too.
    fn reset_all(&self) {
        self.up.set(0.0);

        self.node_up.reset();
        self.node_uptime.reset();
        self.node_cpu_load.reset();
        self.node_cpus.reset();
        self.node_memory_total.reset();
        self.node_memory_used.reset();
        self.node_memory_free.reset();
        self.node_swap_total.reset();
        self.node_swap_used.reset();
        self.node_swap_free.reset();
        self.node_vm_count.reset();
        self.node_lxc_count.reset();
        self.node_load1.reset();
        self.node_load5.reset();
        self.node_load15.reset();
        self.node_iowait.reset();
        self.node_idle.reset();
        self.node_cpu_mhz.reset();
        self.node_rootfs_total.reset();
        self.node_rootfs_used.reset();
        self.node_rootfs_free.reset();
        self.node_cpu_cores.reset();
        self.node_cpu_sockets.reset();
        self.node_ksm_shared.reset();

        self.vm_status.reset();
        self.vm_uptime.reset();
        self.vm_cpu.reset();
        self.vm_cpus.reset();
        self.vm_memory_used.reset();
        self.vm_memory_max.reset();
        self.vm_memory_free.reset();
        self.vm_memory_host.reset();
        self.vm_disk_max.reset();
        self.vm_net_in.reset();
        self.vm_net_out.reset();
        self.vm_disk_read.reset();
        self.vm_disk_write.reset();
        self.vm_ha_managed.reset();
        self.vm_pid.reset();
        self.vm_balloon.reset();
        self.vm_pressure_cpu_full.reset();
        self.vm_pressure_cpu_some.reset();
        self.vm_pressure_io_full.reset();
        self.vm_pressure_io_some.reset();
        self.vm_pressure_memory_full.reset();
        self.vm_pressure_memory_some.reset();
        self.vm_balloon_actual.reset();
        self.vm_balloon_max.reset();
        self.vm_balloon_total.reset();
        self.vm_balloon_major_faults.reset();
        self.vm_balloon_minor_faults.reset();
        self.vm_balloon_swapped_in.reset();
        self.vm_balloon_swapped_out.reset();
        self.vm_block_read_bytes.reset();
        self.vm_block_write_bytes.reset();
        self.vm_block_read_ops.reset();
        self.vm_block_write_ops.reset();
        self.vm_block_failed_read_ops.reset();
        self.vm_block_failed_write_ops.reset();
        self.vm_block_flush_ops.reset();
        self.vm_nic_in.reset();
        self.vm_nic_out.reset();
        self.vm_last_backup.reset();

        self.lxc_status.reset();
        self.lxc_uptime.reset();
        self.lxc_cpu.reset();
        self.lxc_cpus.reset();
        self.lxc_memory_used.reset();
        self.lxc_memory_max.reset();
        self.lxc_disk_used.reset();
        self.lxc_disk_max.reset();
        self.lxc_net_in.reset();
        self.lxc_net_out.reset();
        self.lxc_disk_read.reset();
        self.lxc_disk_write.reset();
        self.lxc_swap_used.reset();
        self.lxc_swap_max.reset();
        self.lxc_ha_managed.reset();
        self.lxc_pid.reset();
        self.lxc_pressure_cpu_full.reset();
        self.lxc_pressure_cpu_some.reset();
        self.lxc_pressure_io_full.reset();
        self.lxc_pressure_io_some.reset();
        self.lxc_pressure_memory_full.reset();
        self.lxc_pressure_memory_some.reset();
        self.lxc_last_backup.reset();

        self.storage_total.reset();
        self.storage_used.reset();
        self.storage_avail.reset();
        self.storage_active.reset();
        self.storage_enabled.reset();
        self.storage_shared.reset();
        self.storage_used_fraction.reset();

        self.zfs_pool_health.reset();
        self.zfs_pool_size.reset();
        self.zfs_pool_alloc.reset();
        self.zfs_pool_free.reset();
        self.zfs_pool_frag.reset();
        self.zfs_arc_size.reset();
        self.zfs_arc_min_size.reset();
        self.zfs_arc_max_size.reset();
        self.zfs_arc_target_size.reset();
        self.zfs_arc_hits.reset();
        self.zfs_arc_misses.reset();
        self.zfs_arc_hit_ratio.reset();
        self.zfs_arc_l2_hits.reset();
        self.zfs_arc_l2_misses.reset();
        self.zfs_arc_l2_size.reset();
        self.zfs_arc_l2_header_size.reset();

        self.sensor_temperature.reset();
        self.sensor_fan_rpm.reset();
        self.sensor_voltage.reset();
        self.sensor_power.reset();

        self.disk_temperature.reset();
        self.disk_power_on_hours.reset();
        self.disk_health.reset();
        self.disk_data_written.reset();
        self.disk_available_spare.reset();
        self.disk_percentage_used.reset();

        self.disk_read_bytes.reset();
        self.disk_write_bytes.reset();
        self.disk_reads_completed.reset();
        self.disk_writes_completed.reset();
        self.disk_io_time.reset();

        self.cluster_quorate.set(0.0);
        self.cluster_nodes_total.set(0.0);
        self.cluster_nodes_online.set(0.0);
        self.ha_resources_total.set(0.0);
        self.ha_resources_active.set(0.0);

        self.replication_last_sync.reset();
        self.replication_duration.reset();
        self.replication_status.reset();

        self.certificate_expiry.reset();
    }

    /// Encode all registered metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();

        let mut buffer = Vec::with_capacity(16 * 1024);
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| ExporterError::Metrics(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| ExporterError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ProxmoxConfig;

    /// Collector wired to an unreachable API, for exercising the pure
    /// emission paths.
    pub(crate) fn test_collector() -> MetricsCollector {
        let config = ProxmoxConfig {
            host: "localhost".to_string(),
            port: 8006,
            user: "root@pam".to_string(),
            password: "test".to_string(),
            token_id: String::new(),
            token_secret: String::new(),
            insecure_skip_verify: true,
            timeout_seconds: 5,
        };
        let client = PveClient::new(config).unwrap();
        MetricsCollector::new(Arc::new(client), SmartConfig::default()).unwrap()
    }

    #[test]
    fn descriptors_register_without_collision() {
        let mx = test_collector();
        let encoded = mx.encode().unwrap();
        // scalar gauges are always present
        assert!(encoded.contains("pve_up"));
        assert!(encoded.contains("pve_cluster_quorate"));
    }

    #[test]
    fn reset_clears_labelled_series() {
        let mx = test_collector();
        mx.node_up.with_label_values(&["pve1"]).set(1.0);
        assert!(mx.encode().unwrap().contains(r#"pve_node_up{node="pve1"}"#));

        mx.reset_all();
        assert!(!mx.encode().unwrap().contains(r#"pve_node_up{node="pve1"}"#));
    }
}
