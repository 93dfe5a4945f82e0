//! Self-update from GitHub releases.
//!
//! Downloads the latest release binary for the current platform next to the
//! running executable, smoke-tests it, swaps it in via a backup rename and
//! restarts the systemd unit. Entirely separate from metric collection.

use crate::error::{ExporterError, Result};
use serde::Deserialize;
use std::env::consts::{ARCH, OS};
use std::path::PathBuf;
use tokio::process::Command;

const RELEASE_API: &str = "https://api.github.com/repos/bigtcze/pve-exporter/releases/latest";

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Expected asset name for the current platform.
fn binary_name() -> String {
    format!("pve-exporter-{OS}-{ARCH}")
}

/// Whether `latest` is newer than `current`. Tags are "v1.2.3"; a plain
/// string comparison is enough for this scheme, and a dev build always
/// updates.
fn is_newer(current: &str, latest: &str) -> bool {
    if current == "dev" {
        return true;
    }
    latest.trim_start_matches('v') > current.trim_start_matches('v')
}

async fn fetch_latest_release(client: &reqwest::Client) -> Result<GitHubRelease> {
    let response = client
        .get(RELEASE_API)
        .header(reqwest::header::USER_AGENT, "pve-exporter")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(ExporterError::Upstream(response.status().as_u16()));
    }

    Ok(response.json().await?)
}

/// Run the self-update process. Returns without changes when the running
/// version is already the latest.
pub async fn self_update(current_version: &str) -> Result<()> {
    println!("Checking for updates...");

    let client = reqwest::Client::new();
    let release = fetch_latest_release(&client).await?;

    println!("Current version: {current_version}");
    println!("Latest version:  {}", release.tag_name);

    if !is_newer(current_version, &release.tag_name) {
        println!("Already running the latest version!");
        return Ok(());
    }

    let asset_name = binary_name();
    let download_url = release
        .assets
        .iter()
        .find(|asset| asset.name == asset_name)
        .map(|asset| asset.browser_download_url.clone())
        .ok_or_else(|| {
            ExporterError::Other(format!("no binary found for platform {OS}/{ARCH}"))
        })?;

    println!("Downloading {asset_name}...");

    let exec_path = std::env::current_exe()?.canonicalize()?;
    let exec_dir = exec_path
        .parent()
        .map(PathBuf::from)
        .ok_or_else(|| ExporterError::Other("executable has no parent directory".to_string()))?;

    let response = client.get(&download_url).send().await?;
    if !response.status().is_success() {
        return Err(ExporterError::Upstream(response.status().as_u16()));
    }
    let body = response.bytes().await?;

    // Staged in the same directory so the final rename is atomic
    let tmp_path = exec_dir.join(".pve-exporter-update");
    tokio::fs::write(&tmp_path, &body).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o755)).await?;
    }

    // Smoke-test before touching the live binary
    let check = Command::new(&tmp_path).arg("--version").output().await;
    match check {
        Ok(output) if output.status.success() => {
            print!("New binary verified: {}", String::from_utf8_lossy(&output.stdout));
        }
        _ => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(ExporterError::Other(
                "downloaded binary failed its --version check".to_string(),
            ));
        }
    }

    let backup_path = exec_path.with_extension("bak");
    tokio::fs::rename(&exec_path, &backup_path).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &exec_path).await {
        // Put the old binary back before reporting
        let _ = tokio::fs::rename(&backup_path, &exec_path).await;
        return Err(e.into());
    }
    let _ = tokio::fs::remove_file(&backup_path).await;

    println!("Update successful!");
    println!("Restarting service...");

    let restart = Command::new("systemctl")
        .args(["restart", "pve-exporter"])
        .status()
        .await;
    match restart {
        Ok(status) if status.success() => println!("Service restarted successfully!"),
        _ => println!("Please restart manually: systemctl restart pve-exporter"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_builds_always_update() {
        assert!(is_newer("dev", "v0.1.0"));
    }

    #[test]
    fn version_comparison_strips_the_v_prefix() {
        assert!(is_newer("0.2.0", "v0.3.0"));
        assert!(!is_newer("0.3.0", "v0.3.0"));
        assert!(!is_newer("v0.4.0", "v0.3.9"));
    }

    #[test]
    fn binary_name_matches_platform() {
        assert!(binary_name().starts_with("pve-exporter-"));
    }
}
