//! # PVE Exporter
//!
//! A Prometheus metrics exporter for Proxmox VE clusters.
//!
//! ## Overview
//!
//! On each scrape the exporter authenticates to the Proxmox REST API, fans
//! out concurrent requests across the cluster and merges the results with
//! local host signals into one metric stream:
//!
//! - Node metrics (status, CPU, memory, swap, rootfs, KSM, load averages)
//! - Guest metrics for QEMU VMs and LXC containers, including balloon,
//!   PSI pressure, per-device block I/O and per-NIC traffic
//! - Storage, ZFS pool and ZFS ARC metrics
//! - Cluster quorum, HA resources, replication jobs, certificate expiry
//! - Last-backup timestamps reconstructed from the vzdump task history
//! - Local lm-sensors readings, disk I/O counters and SMART health
//!
//! ## Quick start
//!
//! ```no_run
//! use pve_exporter::{client::PveClient, config::Settings, metrics::MetricsCollector, server::start_server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(None)?;
//!
//!     let client = Arc::new(PveClient::new(settings.proxmox.clone())?);
//!     let metrics = Arc::new(MetricsCollector::new(client, settings.smart.clone())?);
//!
//!     start_server(&settings.server.bind_address(), &settings.server.metrics_path, "dev", metrics).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The exporter is configured through environment variables (`PVE_HOST`,
//! `PVE_TOKEN_ID`, ...) and an optional YAML file passed with `--config`;
//! file values override the environment. See [`config::Settings`].
//!
//! ## Modules
//!
//! - [`client`] - Proxmox API client and session handling
//! - [`collectors`] - per-domain sub-collectors
//! - [`config`] - configuration management
//! - [`error`] - error types
//! - [`metrics`] - metric registry and scrape orchestration
//! - [`server`] - HTTP server exposing `/metrics`
//! - [`selfupdate`] - GitHub-release self-update

pub mod client;
pub mod collectors;
pub mod config;
pub mod error;
pub mod metrics;
pub mod selfupdate;
pub mod server;

pub use error::{ExporterError, Result};
