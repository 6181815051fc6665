use std::fmt;
use std::path::PathBuf;

/// How a target relates to the currently selected source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetStatus {
    /// Enough free space for the source, possibly with room for persistence.
    Usable,
    /// Large enough in total, but files must be removed first.
    NeedsMoreSpace,
    /// The filesystem must be (re)created before the target can be used.
    NeedsFormat,
    /// Smaller than the source, no amount of cleanup helps.
    CannotUseAtAll,
}

impl TargetStatus {
    /// Targets in these states are only changed by device events, never by a
    /// free-space recompute.
    pub fn is_terminal(self) -> bool {
        matches!(self, TargetStatus::NeedsFormat | TargetStatus::CannotUseAtAll)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TargetStatus::Usable => "ready",
            TargetStatus::NeedsMoreSpace => "needs more space",
            TargetStatus::NeedsFormat => "needs format",
            TargetStatus::CannotUseAtAll => "too small",
        };
        f.write_str(text)
    }
}

/// A writable device or partition that may receive a source.
///
/// Populated by the platform discovery functions in [`crate::platform`] or by
/// whatever device-event collaborator the caller plugs in. `free`, `status`
/// and `persist` are owned by the space accountant once the target is in a
/// [`crate::registry::Registry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// The device identifier (e.g., `/dev/sdb1`).
    pub id: String,
    /// Where the target's filesystem is mounted, if it is.
    pub mountpoint: Option<PathBuf>,
    /// Total size of the device in bytes.
    pub capacity: u64,
    /// Free bytes on the mounted filesystem at the last refresh.
    pub free: u64,
    pub status: TargetStatus,
    /// Bytes available for a persistence overlay at the last refresh.
    pub persist: u64,
}

impl Target {
    pub fn new(id: impl Into<String>, mountpoint: Option<PathBuf>, capacity: u64) -> Self {
        let status = if mountpoint.is_some() {
            TargetStatus::Usable
        } else {
            TargetStatus::NeedsFormat
        };
        Self {
            id: id.into(),
            mountpoint,
            capacity,
            free: 0,
            status,
            persist: 0,
        }
    }

    pub fn with_free(mut self, free: u64) -> Self {
        self.free = free;
        self
    }

    pub fn with_status(mut self, status: TargetStatus) -> Self {
        self.status = status;
        self
    }
}

fn gigabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount_info = match &self.mountpoint {
            Some(mp) => format!("[Mounted at {}]", mp.display()),
            None => "[Not mounted]".to_string(),
        };

        write!(
            f,
            "{:<15} {:.1} GB ({:.1} GB free) {} {}",
            self.id,
            gigabytes(self.capacity),
            gigabytes(self.free),
            mount_info,
            self.status,
        )
    }
}
