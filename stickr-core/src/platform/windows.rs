use crate::device::Target;
use anyhow::{anyhow, Result};
use std::io;
use std::path::Path;
use sysinfo::Disks;

/// Returns `(total, free)` bytes of the volume mounted at `mountpoint`.
pub fn fs_size(mountpoint: &Path) -> io::Result<(u64, u64)> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .find(|disk| disk.mount_point() == mountpoint)
        .map(|disk| (disk.total_space(), disk.available_space()))
        .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
}

pub fn is_system_disk(_path: &Path) -> bool {
    false
}

/// Scans for block devices that can receive an image on a Windows system.
///
/// # Errors
///
/// Always fails: Windows device discovery is not implemented yet.
pub fn list_targets(_include_internal: bool) -> Result<Vec<Target>> {
    // TODO: Enumerate disks with `SetupDiGetClassDevsW` and query their
    // removable flag and size with `DeviceIoControl`.
    Err(anyhow!("Windows support is not yet implemented."))
}
