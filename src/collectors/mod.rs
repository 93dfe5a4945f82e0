//! Per-domain sub-collectors.
//!
//! Each sub-collector is a free function taking the shared
//! [`MetricsCollector`](crate::metrics::MetricsCollector) plus whatever
//! pre-fetched inventory the scrape orchestrator supplies. Sub-collectors
//! tolerate partial failure: a failed request aborts that sub-collector (or
//! its per-node worker), never the scrape.

pub mod backup;
pub mod cluster;
pub mod disk;
pub mod disk_api;
pub mod guest;
pub mod node;
pub mod sensors;
pub mod storage;
pub mod zfs;

use once_cell::sync::Lazy;
use serde::Deserialize;

/// Guest kind as reported by the cluster resource inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }

    pub fn from_api(kind: &str) -> Option<Self> {
        match kind {
            "qemu" => Some(GuestKind::Qemu),
            "lxc" => Some(GuestKind::Lxc),
            _ => None,
        }
    }
}

/// VM or container inventory entry shared between sub-collectors, keyed by
/// stringified VMID. Populated once per scrape from `/cluster/resources`
/// (or per-node enumeration when that call fails).
#[derive(Debug, Clone)]
pub struct GuestInfo {
    pub node: String,
    pub name: String,
    pub kind: GuestKind,
}

/// One entry of `/cluster/resources?type=vm`.
#[derive(Debug, Deserialize)]
pub struct ClusterResource {
    #[serde(default)]
    pub vmid: i64,
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

static HOSTNAME: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
});

/// Local hostname, resolved once per process. Used as the `node` label for
/// everything read from the local machine (sensors, diskstats, arcstats).
pub fn local_hostname() -> &'static str {
    &HOSTNAME
}
