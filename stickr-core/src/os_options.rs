//! Direct I/O flags for opening target devices.
use std::fs::OpenOptions;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Bypasses the page cache when `direct` is set, so progress reflects bytes
/// that actually reached the device.
#[cfg(unix)]
pub(crate) fn direct_io(options: &mut OpenOptions, direct: bool) -> &mut OpenOptions {
    if direct {
        options.custom_flags(libc::O_DIRECT);
    }
    options
}

// FILE_FLAG_NO_BUFFERING needs `CreateFileW`, which `OpenOptions` does not
// expose. Writes stay buffered on Windows.
#[cfg(windows)]
pub(crate) fn direct_io(options: &mut OpenOptions, _direct: bool) -> &mut OpenOptions {
    options
}
