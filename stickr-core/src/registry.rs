//! The registry of known sources and targets.
//!
//! Mutation is single-writer: the registry takes `&mut self` for every change
//! and raises its signals synchronously before returning. Wrap it in a mutex
//! if several threads need to drive it.
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, error, warn};

use crate::device::{Target, TargetStatus};
use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::probe::Probe;
use crate::source::{AddOutcome, Rejection, Source, SourceKind};
use crate::space;

/// Tunables for the space accountant.
#[derive(Clone, Copy, Debug)]
pub struct RegistryOptions {
    /// Bytes kept free beyond the source and the persistence file.
    pub padding: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            padding: space::DEFAULT_PADDING,
        }
    }
}

pub struct Registry {
    sources: IndexMap<PathBuf, Source>,
    targets: IndexMap<String, Target>,
    current: Option<PathBuf>,
    probe: Arc<dyn Probe>,
    notifier: Notifier,
    options: RegistryOptions,
}

/// Drops `.` components and resolves `..` against the preceding component,
/// without touching the filesystem. `..` at the root stays at the root.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Expands a leading `~`, makes the path absolute and normalizes it, so
/// every spelling of a file maps to the same registry key.
fn expand_path(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) if rest.as_os_str().is_empty() => home,
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };
    normalize(&std::path::absolute(&expanded).unwrap_or(expanded))
}

impl Registry {
    pub fn new(probe: Arc<dyn Probe>, notifier: Notifier) -> Self {
        Self::with_options(probe, notifier, RegistryOptions::default())
    }

    pub fn with_options(probe: Arc<dyn Probe>, notifier: Notifier, options: RegistryOptions) -> Self {
        Self {
            sources: IndexMap::new(),
            targets: IndexMap::new(),
            current: None,
            probe,
            notifier,
            options,
        }
    }

    /// Offers an image file as a source.
    ///
    /// Only regular `.iso` files with a boot label and `.img` files are
    /// admitted. Rejections and duplicates are logged and reported through
    /// the returned [`AddOutcome`]; they leave the registry untouched.
    pub fn add_source(&mut self, path: impl AsRef<Path>) -> AddOutcome {
        let path = expand_path(path.as_ref());
        debug!("Registry told to add: {}", path.display());

        let size = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => metadata.len(),
            _ => {
                debug!("Not a regular file: {}", path.display());
                return AddOutcome::Rejected(Rejection::NotAFile);
            }
        };

        if self.sources.contains_key(&path) {
            warn!("Source already added: {}", path.display());
            return AddOutcome::AlreadyPresent(path);
        }

        let Some(ext) = path.extension().map(|e| e.to_string_lossy().into_owned()) else {
            error!(
                "{} has no extension, could not determine the file type.",
                path.display()
            );
            return AddOutcome::Rejected(Rejection::NoExtension);
        };

        let Some(kind) = SourceKind::from_extension(&ext) else {
            error!("Extension '{}' is not supported: {}", ext, path.display());
            return AddOutcome::Rejected(Rejection::UnknownExtension(ext));
        };

        let label = match kind {
            SourceKind::Iso => match self.probe.boot_label(&path) {
                Some(label) if !label.is_empty() => label,
                _ => {
                    warn!("{} is not a bootable image.", path.display());
                    return AddOutcome::Rejected(Rejection::NotBootable);
                }
            },
            SourceKind::Img => String::new(),
        };

        self.sources.insert(
            path.clone(),
            Source {
                path: path.clone(),
                size,
                label,
                kind,
            },
        );
        self.notifier.source_added(&path);
        AddOutcome::Added(path)
    }

    /// Selects the source targets are measured against, or none.
    ///
    /// Always recomputes every eligible target, even if the selection did not
    /// change, since free space may have.
    pub fn set_current_source(&mut self, path: Option<&Path>) -> Result<()> {
        if let Some(path) = path {
            if !self.sources.contains_key(path) {
                return Err(Error::InvalidReference(path.to_path_buf()));
            }
        }
        self.current = path.map(Path::to_path_buf);
        self.recompute_all();
        Ok(())
    }

    pub fn current_source(&self) -> Option<&Source> {
        self.current.as_ref().and_then(|path| self.sources.get(path))
    }

    pub fn source(&self, path: &Path) -> Option<&Source> {
        self.sources.get(path)
    }

    /// Sources in the order they were added.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.get(id)
    }

    /// Targets in the order they appeared.
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.values()
    }

    /// Registers a newly appeared device. Returns `false` if the id is
    /// already known.
    pub fn add_target(&mut self, target: Target) -> bool {
        if self.targets.contains_key(&target.id) {
            debug!("Target already known: {}", target.id);
            return false;
        }

        let id = target.id.clone();
        debug!("Target added: {}", id);
        self.targets.insert(id.clone(), target);
        self.notifier.target_added(&id);

        if let Ok(true) = self.recompute_one(&id) {
            self.notifier.target_changed(&id);
        }
        true
    }

    /// Handles a device disappearing from the system.
    ///
    /// The id is looked up first as a source path, then as a target id.
    /// Unknown ids are ignored.
    pub fn remove_device(&mut self, id: &str) {
        debug!("Device has been removed from the system: {}", id);

        let as_path = Path::new(id);
        if self.sources.shift_remove(as_path).is_some() {
            if self.current.as_deref() == Some(as_path) {
                debug!("Current source removed, clearing the selection.");
                self.current = None;
            }
            self.notifier.source_removed(id);
        } else if self.targets.shift_remove(id).is_some() {
            self.notifier.target_removed(id);
        }
    }

    /// Re-measures every eligible target against the current source and
    /// raises target-changed for those that changed.
    ///
    /// Does nothing when no source is selected. Targets that need formatting
    /// or are too small are skipped.
    pub fn recompute_all(&mut self) {
        let Some(source_size) = self.current_source().map(|s| s.size) else {
            debug!("No current source, nothing to recompute.");
            return;
        };

        for target in self.targets.values_mut() {
            if target.status.is_terminal() {
                continue;
            }
            if space::recompute_one(target, source_size, self.options.padding, self.probe.as_ref()) {
                self.notifier.target_changed(&target.id);
            }
        }
    }

    /// Explicit refresh, e.g. after the user freed space on a target.
    pub fn refresh(&mut self) {
        self.recompute_all();
    }

    /// Recomputes a single target without notifying. Returns whether it
    /// changed; `false` when no source is selected or the target is in a
    /// terminal state.
    pub fn recompute_one(&mut self, id: &str) -> Result<bool> {
        let source_size = self.current_source().map(|s| s.size);
        let target = self
            .targets
            .get_mut(id)
            .ok_or_else(|| Error::UnknownTarget(id.to_string()))?;

        match source_size {
            Some(size) if !target.status.is_terminal() => Ok(space::recompute_one(
                target,
                size,
                self.options.padding,
                self.probe.as_ref(),
            )),
            _ => Ok(false),
        }
    }

    /// Records the outcome of formatting a target.
    ///
    /// A successful format is the device event that releases a target from a
    /// terminal state: it is reassessed against the current source.
    pub fn finish_format(&mut self, id: &str, outcome: std::result::Result<(), String>) -> Result<()> {
        let target = self
            .targets
            .get_mut(id)
            .ok_or_else(|| Error::UnknownTarget(id.to_string()))?;

        match outcome {
            Ok(()) => {
                debug!("Format of {} finished.", id);
                target.status = TargetStatus::Usable;
                target.persist = 0;
                self.recompute_one(id)?;
                self.notifier.format_ended();
                self.notifier.target_changed(id);
            }
            Err(message) => {
                error!("Format of {} failed: {}", id, message);
                self.notifier.format_failed(&message);
            }
        }
        Ok(())
    }
}
