//! Host resource snapshot for the "Server Stats" button.

use std::path::{Path, PathBuf};

use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::formatting::{format_bytes, format_duration};

#[derive(Clone, Debug, PartialEq)]
pub struct DiskUsage {
    pub mount_point: PathBuf,
    pub total: u64,
    pub available: u64,
}

impl DiskUsage {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServerStats {
    pub cpu_percent: f32,
    pub cpu_count: usize,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk: Option<DiskUsage>,
    pub uptime_secs: u64,
    pub running_apps: usize,
}

impl ServerStats {
    /// Sample the host. Takes at least `MINIMUM_CPU_UPDATE_INTERVAL` for a CPU reading.
    pub async fn collect(data_dir: &Path, running_apps: usize) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let data_dir = data_dir.to_path_buf();
        let disk = tokio::task::spawn_blocking(move || disk_for(&data_dir))
            .await
            .ok()
            .flatten();

        Self {
            cpu_percent: sys.global_cpu_usage(),
            cpu_count: sys.cpus().len(),
            memory_used: sys.used_memory(),
            memory_total: sys.total_memory(),
            disk,
            uptime_secs: System::uptime(),
            running_apps,
        }
    }

    pub fn to_html(&self) -> String {
        let mut lines = vec!["📊 <b>Server Stats</b>\n".to_string()];
        lines.push(format!(
            "🖥 CPU: {:.1}% ({} cores)",
            self.cpu_percent, self.cpu_count
        ));
        lines.push(format!(
            "🧠 RAM: {} / {} ({:.1}%)",
            format_bytes(self.memory_used),
            format_bytes(self.memory_total),
            percent(self.memory_used, self.memory_total)
        ));
        match &self.disk {
            Some(d) => lines.push(format!(
                "💾 Disk: {} / {} ({:.1}%)",
                format_bytes(d.used()),
                format_bytes(d.total),
                percent(d.used(), d.total)
            )),
            None => lines.push("💾 Disk: unknown".to_string()),
        }
        lines.push(format!("⏱ Uptime: {}", format_duration(self.uptime_secs)));
        lines.push(format!("🚀 Running apps: {}", self.running_apps));
        lines.join("\n")
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / total as f64
}

fn disk_for(data_dir: &Path) -> Option<DiskUsage> {
    let target = data_dir
        .canonicalize()
        .unwrap_or_else(|_| data_dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    pick_disk(
        disks.list().iter().map(|d| DiskUsage {
            mount_point: d.mount_point().to_path_buf(),
            total: d.total_space(),
            available: d.available_space(),
        }),
        &target,
    )
}

/// The disk whose mount point is the longest prefix of `path`.
fn pick_disk(disks: impl IntoIterator<Item = DiskUsage>, path: &Path) -> Option<DiskUsage> {
    disks
        .into_iter()
        .filter(|d| path.starts_with(&d.mount_point))
        .max_by_key(|d| d.mount_point.components().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(mount: &str, total: u64, available: u64) -> DiskUsage {
        DiskUsage {
            mount_point: PathBuf::from(mount),
            total,
            available,
        }
    }

    #[test]
    fn picks_most_specific_mount() {
        let disks = vec![disk("/", 100, 50), disk("/srv", 10, 5), disk("/srv/other", 1, 1)];
        let picked = pick_disk(disks, Path::new("/srv/app/scripts")).unwrap();
        assert_eq!(picked.mount_point, PathBuf::from("/srv"));
        assert_eq!(picked.used(), 5);

        assert!(pick_disk(vec![disk("/data", 1, 1)], Path::new("/srv")).is_none());
    }

    #[test]
    fn renders_html() {
        let stats = ServerStats {
            cpu_percent: 12.34,
            cpu_count: 4,
            memory_used: 512 * 1024 * 1024,
            memory_total: 2 * 1024 * 1024 * 1024,
            disk: Some(disk("/", 1024, 256)),
            uptime_secs: 3_725,
            running_apps: 3,
        };
        let html = stats.to_html();
        assert!(html.contains("CPU: 12.3% (4 cores)"));
        assert!(html.contains("RAM: 512.0 MB / 2.0 GB (25.0%)"));
        assert!(html.contains("Disk: 768 B / 1.0 KB (75.0%)"));
        assert!(html.contains("Uptime: 1h 2m 5s"));
        assert!(html.contains("Running apps: 3"));
    }

    #[tokio::test]
    async fn collects_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let stats = ServerStats::collect(dir.path(), 0).await;
        assert!(stats.memory_total >= stats.memory_used);
        assert_eq!(stats.running_apps, 0);
    }
}
