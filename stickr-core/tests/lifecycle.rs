use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use stickr_core::{
    BackendVariant, ChannelListener, Coordinator, Event, ImageWriter, InstallRequest, InstallState,
    Notifier, Probe, Registry, RegistryOptions, Target, TargetStatus,
};
use tempfile::NamedTempFile;

/// Every mountpoint reports the same free space.
struct FixedFree(u64);

impl Probe for FixedFree {
    fn fs_size(&self, _mountpoint: &Path) -> io::Result<(u64, u64)> {
        Ok((u64::MAX, self.0))
    }

    fn boot_label(&self, _path: &Path) -> Option<String> {
        None
    }
}

fn setup(free: u64) -> (Registry, Coordinator, Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    let notifier = Notifier::new().with(Arc::new(ChannelListener::new(tx)));
    let registry = Registry::with_options(
        Arc::new(FixedFree(free)),
        notifier.clone(),
        RegistryOptions { padding: 1024 },
    );
    let coordinator = Coordinator::new(
        Arc::new(ImageWriter::new().direct_io(false)),
        BackendVariant::Standard,
        notifier,
    );
    (registry, coordinator, rx)
}

fn image(len: usize) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".img").tempfile().unwrap();
    file.write_all(&vec![0x5A; len]).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn select_assess_install_and_remove() {
    let (mut registry, mut coordinator, rx) = setup(1 << 20);
    let img = image(64 * 1024);
    let device = NamedTempFile::new().unwrap();
    let id = device.path().to_string_lossy().into_owned();

    assert!(registry.add_source(img.path()).is_added());
    registry.add_target(Target::new(id.clone(), Some(PathBuf::from("/media/stick")), 1 << 30));
    registry.set_current_source(Some(img.path())).unwrap();

    let target = registry.target(&id).unwrap().clone();
    assert_eq!(target.status, TargetStatus::Usable);
    assert_eq!(target.persist, (1 << 20) - 64 * 1024 - 1024);

    coordinator
        .start(InstallRequest {
            source: registry.current_source().unwrap().clone(),
            persist: 0,
            target,
            device: None,
            allow_system_internal: true,
        })
        .unwrap();

    // The job holds its own copy of the target.
    registry.remove_device(&id);
    assert!(registry.target(&id).is_none());

    assert_eq!(coordinator.wait(), InstallState::Succeeded);
    assert_eq!(std::fs::read(device.path()).unwrap(), vec![0x5A; 64 * 1024]);

    let events: Vec<Event> = rx.try_iter().collect();
    assert!(events.contains(&Event::TargetRemoved(id)));
    assert_eq!(events.last(), Some(&Event::InstallSuccess));
}

#[test]
fn install_can_be_restarted_after_failure() {
    let (mut registry, mut coordinator, rx) = setup(1 << 20);
    let img = image(1024);
    registry.add_source(img.path());
    let source = registry.sources().next().unwrap().clone();
    let dir = tempfile::tempdir().unwrap();

    let request = InstallRequest {
        source,
        target: Target::new("missing", None, 0),
        persist: 0,
        device: Some(dir.path().join("no-such-device")),
        allow_system_internal: true,
    };

    coordinator.start(request.clone()).unwrap();
    assert_eq!(coordinator.wait(), InstallState::Failed);
    assert!(matches!(rx.try_iter().last(), Some(Event::InstallFailure(Some(_)))));

    let device = NamedTempFile::new().unwrap();
    coordinator
        .start(InstallRequest {
            device: Some(device.path().to_path_buf()),
            ..request
        })
        .unwrap();
    assert_eq!(
        coordinator.wait_timeout(Duration::from_secs(10)),
        Some(InstallState::Succeeded)
    );
}
