//! Free-space and persistence-capacity accounting.
//!
//! A target's status and persistence capacity are a pure function of the
//! current source's size, the target's capacity and its measured free space.
//! Recomputation is pull-based: it runs when the current source changes or a
//! refresh is requested, never from a filesystem watch.
use crate::device::{Target, TargetStatus};
use crate::probe::Probe;

/// Headroom kept free on the target beyond the source and persistence file.
pub const DEFAULT_PADDING: u64 = 10 * 1024 * 1024;

/// Largest persistence file the live system can address (4 GiB - 1).
pub const MAX_PERSISTENCE: u64 = 4 * 1024 * 1024 * 1024 - 1;

/// Classifies a target against a source of `source_size` bytes.
///
/// Returns the status and the persistence capacity, which is zero unless the
/// target is usable, and otherwise clamped to `0..=MAX_PERSISTENCE`.
pub fn assess(source_size: u64, capacity: u64, free: u64, padding: u64) -> (TargetStatus, u64) {
    if capacity < source_size {
        (TargetStatus::CannotUseAtAll, 0)
    } else if free < source_size {
        (TargetStatus::NeedsMoreSpace, 0)
    } else {
        let persist = (free - source_size).saturating_sub(padding);
        (TargetStatus::Usable, persist.min(MAX_PERSISTENCE))
    }
}

/// Re-measures `target` and reassesses it against the source.
///
/// An unmounted target or a failed measurement counts as zero free bytes.
/// Returns `true` when the free space or the status changed.
pub fn recompute_one(target: &mut Target, source_size: u64, padding: u64, probe: &dyn Probe) -> bool {
    let old_free = target.free;
    let old_status = target.status;

    target.free = match &target.mountpoint {
        Some(mountpoint) => match probe.fs_size(mountpoint) {
            Ok((_, free)) => free,
            Err(e) => {
                tracing::debug!(
                    "Could not measure {} at {}: {}",
                    target.id,
                    mountpoint.display(),
                    e
                );
                0
            }
        },
        None => 0,
    };

    let (status, persist) = assess(source_size, target.capacity, target.free, padding);
    target.status = status;
    target.persist = persist;

    tracing::debug!(
        "Target {}: {} free, {:?}, {} bytes for persistence",
        target.id,
        target.free,
        target.status,
        target.persist
    );

    old_free != target.free || old_status != target.status
}
