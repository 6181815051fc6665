use crate::device::Target;
use anyhow::{anyhow, Result};
use nix::sys::statvfs::statvfs;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Helper to find the parent device of a partition (e.g., /dev/sda1 -> /dev/sda).
fn get_parent_device_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str.starts_with("/dev/sd") {
        if let Some(index) = path_str.rfind(|c: char| c.is_alphabetic()) {
            return PathBuf::from(&path_str[..=index]);
        }
    } else if path_str.starts_with("/dev/mmcblk") || path_str.starts_with("/dev/nvme") {
        if let Some(index) = path_str.rfind('p') {
            if path_str[index + 1..].chars().all(|c| c.is_ascii_digit()) && index + 1 < path_str.len() {
                return PathBuf::from(&path_str[..index]);
            }
        }
    }

    path.to_path_buf()
}

/// Short kernel name of a disk as reported by `sysinfo` (e.g., "sdb1").
fn kernel_name(disk: &sysinfo::Disk) -> String {
    let name = disk.name().to_string_lossy();
    name.strip_prefix("/dev/").unwrap_or(&name).to_string()
}

/// Whether kernel name `name` is `device` itself or one of its partitions
/// (`sdb1`, `mmcblk0p2`), and not another device sharing the prefix (`sdba`).
fn is_partition_of(name: &str, device: &str) -> bool {
    let Some(rest) = name.strip_prefix(device) else {
        return false;
    };
    let digits = rest.strip_prefix('p').unwrap_or(rest);
    rest.is_empty() || (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

fn system_disk_parent(disks: &Disks) -> Option<PathBuf> {
    disks
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .map(|disk| get_parent_device_path(&PathBuf::from("/dev/").join(kernel_name(disk))))
}

/// Returns `(total, free)` bytes of the filesystem mounted at `mountpoint`.
///
/// Free space counts the blocks available to unprivileged users.
pub fn fs_size(mountpoint: &Path) -> io::Result<(u64, u64)> {
    let stat = statvfs(mountpoint).map_err(io::Error::from)?;
    let block = stat.fragment_size() as u64;
    Ok((stat.blocks() as u64 * block, stat.blocks_available() as u64 * block))
}

/// Whether `path` is, or is a partition of, the disk holding `/`.
pub fn is_system_disk(path: &Path) -> bool {
    if !path.starts_with("/dev") {
        return false;
    }
    let disks = Disks::new_with_refreshed_list();
    system_disk_parent(&disks).is_some_and(|parent| get_parent_device_path(path) == parent)
}

/// Scans for block devices that can receive an image on a Linux system.
///
/// Devices are discovered by iterating through `/sys/block`. Loop devices,
/// devices reporting a size of zero (empty card readers) and the system drive
/// are skipped. Unless `include_internal` is set, only devices whose
/// `/sys/block/<device>/removable` flag is set are considered.
///
/// Each mounted partition of a device becomes a [`Target`] with its measured
/// free space. A device without mounted partitions becomes a single target
/// that needs formatting.
pub fn list_targets(include_internal: bool) -> Result<Vec<Target>> {
    let disks = Disks::new_with_refreshed_list();
    let system_disk_parent =
        system_disk_parent(&disks).ok_or_else(|| anyhow!("Could not determine system drive."))?;

    let mut targets = Vec::new();
    let block_dir = fs::read_dir("/sys/block")?;

    for entry in block_dir.filter_map(|entry| entry.ok()) {
        let device_name = entry.file_name().to_string_lossy().to_string();
        let device_path = PathBuf::from("/dev/").join(&device_name);

        if device_name.starts_with("loop") || device_path == system_disk_parent {
            continue;
        }

        let is_removable = read_sys_file(&device_name, "removable")
            .map(|s| s == "1")
            .unwrap_or(false);

        if !is_removable && !include_internal {
            continue;
        }

        let size_sectors = read_sys_file(&device_name, "size")
            .and_then(|s| {
                s.parse::<u64>()
                    .map_err(|_| io::Error::from(io::ErrorKind::InvalidData))
            })
            .unwrap_or(0);

        if size_sectors == 0 {
            continue;
        }

        let before = targets.len();
        for disk in disks.iter() {
            let name = kernel_name(disk);
            if !is_partition_of(&name, &device_name) || disk.mount_point().as_os_str().is_empty() {
                continue;
            }
            targets.push(
                Target::new(
                    format!("/dev/{}", name),
                    Some(disk.mount_point().to_path_buf()),
                    disk.total_space(),
                )
                .with_free(disk.available_space()),
            );
        }

        if targets.len() == before {
            targets.push(Target::new(
                device_path.to_string_lossy(),
                None,
                size_sectors * 512,
            ));
        }
    }

    tracing::debug!("Discovered {} targets.", targets.len());
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_map_to_their_parent_disk() {
        assert_eq!(get_parent_device_path(Path::new("/dev/sda1")), PathBuf::from("/dev/sda"));
        assert_eq!(get_parent_device_path(Path::new("/dev/sdb")), PathBuf::from("/dev/sdb"));
        assert_eq!(
            get_parent_device_path(Path::new("/dev/nvme0n1p2")),
            PathBuf::from("/dev/nvme0n1")
        );
        assert_eq!(
            get_parent_device_path(Path::new("/dev/mmcblk0p1")),
            PathBuf::from("/dev/mmcblk0")
        );
        assert_eq!(
            get_parent_device_path(Path::new("/dev/mmcblk0")),
            PathBuf::from("/dev/mmcblk0")
        );
    }

    #[test]
    fn partitions_are_matched_to_their_own_device() {
        assert!(is_partition_of("sda", "sda"));
        assert!(is_partition_of("sda1", "sda"));
        assert!(is_partition_of("sda12", "sda"));
        assert!(is_partition_of("mmcblk0p1", "mmcblk0"));
        assert!(is_partition_of("nvme0n1p3", "nvme0n1"));

        assert!(!is_partition_of("sdaa", "sda"));
        assert!(!is_partition_of("sdaa1", "sda"));
        assert!(!is_partition_of("sdap", "sda"));
        assert!(!is_partition_of("mmcblk01", "mmcblk0p"));
        assert!(!is_partition_of("sdb1", "sda"));
    }

    #[test]
    fn regular_files_are_never_the_system_disk() {
        assert!(!is_system_disk(Path::new("/tmp/stick.img")));
    }

    #[test]
    fn root_filesystem_has_a_size() {
        let (total, free) = fs_size(Path::new("/")).unwrap();
        assert!(total >= free);
    }
}
