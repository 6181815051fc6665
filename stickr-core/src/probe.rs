use std::io;
use std::path::Path;

use crate::platform;
use crate::source;

/// Queries the registry needs answered by the host system.
pub trait Probe: Send + Sync {
    /// Returns `(total, free)` bytes for the filesystem mounted at `mountpoint`.
    fn fs_size(&self, mountpoint: &Path) -> io::Result<(u64, u64)>;

    /// Returns the boot label of an image, or `None` if it is not bootable.
    fn boot_label(&self, path: &Path) -> Option<String>;
}

/// The probe backed by the running system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemProbe;

impl Probe for SystemProbe {
    fn fs_size(&self, mountpoint: &Path) -> io::Result<(u64, u64)> {
        platform::fs_size(mountpoint)
    }

    fn boot_label(&self, path: &Path) -> Option<String> {
        match source::read_iso_label(path) {
            Ok(label) => label,
            Err(e) => {
                tracing::debug!("Could not probe {}: {}", path.display(), e);
                None
            }
        }
    }
}
