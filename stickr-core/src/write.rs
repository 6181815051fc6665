//! Contains the installer that writes an image onto a target device.
//!
//! Standard backends copy the image block by block onto the device, reporting
//! progress after every chunk and checking for cancellation in between.
//! Fastboot backends hand the image to the `fastboot` tool instead.
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::install::{InstallContext, InstallJob, Installer};
use crate::os_options::direct_io;
use crate::platform;

const BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB
const BLOCK_SIZE: usize = 512;
const FASTBOOT_POLL: Duration = Duration::from_millis(200);

/// Writes the job's source image onto its target.
#[derive(Clone, Debug)]
pub struct ImageWriter {
    direct_io: bool,
    fastboot_partition: String,
}

impl Default for ImageWriter {
    fn default() -> Self {
        Self {
            direct_io: true,
            fastboot_partition: "system".to_string(),
        }
    }
}

impl ImageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the device with `O_DIRECT` (the default). Turn off for targets
    /// on filesystems that reject unbuffered I/O.
    pub fn direct_io(mut self, enabled: bool) -> Self {
        self.direct_io = enabled;
        self
    }

    /// The partition `fastboot flash` writes to.
    pub fn fastboot_partition(mut self, partition: impl Into<String>) -> Self {
        self.fastboot_partition = partition.into();
        self
    }

    fn open_device(&self, device_path: &Path) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true);
        direct_io(&mut options, self.direct_io).open(device_path)
    }

    fn write_raw(&self, image_path: &Path, device_path: &Path, ctx: &InstallContext) -> Result<()> {
        let mut image_file = File::open(image_path)?;
        let image_len = image_file.metadata()?.len();

        let mut device_file = match self.open_device(device_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::ResourceBusy => {
                let message = format!(
                    "{} is busy. Unmount it and try again.",
                    device_path.display()
                );
                ctx.retry(&message);
                return Err(Error::InstallFailed(message));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Writing {} ({} bytes) to {}",
            image_path.display(),
            image_len,
            device_path.display()
        );
        ctx.message("Writing image...");

        // Align buffer to 512 bytes for O_DIRECT compatibility.
        let mut buf = vec![0u8; BUFFER_SIZE + BLOCK_SIZE];
        let offset = buf.as_ptr().align_offset(BLOCK_SIZE);
        let buffer = &mut buf[offset..offset + BUFFER_SIZE];

        let started = Instant::now();
        let mut written: u64 = 0;
        while written < image_len {
            ctx.token().check()?;

            let to_read = std::cmp::min(BUFFER_SIZE as u64, image_len - written) as usize;
            image_file.read_exact(&mut buffer[..to_read])?;

            // O_DIRECT needs whole blocks; pad the final chunk with zeros.
            let padded_size = if self.direct_io && to_read % BLOCK_SIZE != 0 {
                let pad = to_read.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
                buffer[to_read..pad].fill(0);
                pad
            } else {
                to_read
            };

            device_file.write_all(&buffer[..padded_size])?;
            written += to_read as u64;

            let elapsed = started.elapsed().as_secs_f64();
            let speed = if elapsed > 0.0 { written as f64 / elapsed } else { 0.0 };
            ctx.progress(written, image_len - written, speed);
        }

        ctx.message("Syncing...");
        ctx.pulse_start();
        let synced = device_file.flush().and_then(|()| device_file.sync_all());
        ctx.pulse_stop();
        synced?;

        debug!("Wrote {} bytes in {:?}", written, started.elapsed());
        Ok(())
    }

    fn flash_fastboot(&self, image_path: &Path, serial: Option<&Path>, ctx: &InstallContext) -> Result<()> {
        ctx.message("Flashing with fastboot...");
        ctx.pulse_start();
        let result = self.run_fastboot(image_path, serial, ctx);
        ctx.pulse_stop();
        result
    }

    fn run_fastboot(&self, image_path: &Path, serial: Option<&Path>, ctx: &InstallContext) -> Result<()> {
        let mut command = Command::new("fastboot");
        if let Some(serial) = serial {
            command.arg("-s").arg(serial);
        }
        command
            .args(["flash", &self.fastboot_partition])
            .arg(image_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        info!("Running fastboot flash {}", self.fastboot_partition);
        let mut child = command
            .spawn()
            .map_err(|e| Error::InstallFailed(format!("Failed to start fastboot: {}", e)))?;

        loop {
            if ctx.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::InstallCancelled);
            }

            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr);
                }
                return Err(Error::InstallFailed(format!(
                    "fastboot failed ({}): {}",
                    status,
                    stderr.trim()
                )));
            }

            thread::sleep(FASTBOOT_POLL);
        }
    }
}

impl Installer for ImageWriter {
    fn install(&self, job: &InstallJob, ctx: &InstallContext) -> Result<()> {
        let request = &job.request;

        if request.persist > 0 {
            warn!(
                "Persistence ({} bytes) is not supported for image writes, ignoring.",
                request.persist
            );
        }

        if job.fastboot {
            return self.flash_fastboot(&request.source.path, request.device.as_deref(), ctx);
        }

        let device = request
            .device
            .clone()
            .unwrap_or_else(|| PathBuf::from(&request.target.id));

        if !request.allow_system_internal && platform::is_system_disk(&device) {
            return Err(Error::InstallFailed(format!(
                "Refusing to write to {}: it holds the running system.",
                device.display()
            )));
        }

        self.write_raw(&request.source.path, &device, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Target;
    use crate::install::{CancelToken, InstallRequest};
    use crate::notify::{ChannelListener, Event, Notifier};
    use crate::source::{Source, SourceKind};
    use std::sync::Arc;
    use std::sync::mpsc::{self, Receiver};
    use tempfile::NamedTempFile;

    fn image(len: usize) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".img").tempfile().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    fn job(image: &Path, device: &Path) -> InstallJob {
        InstallJob {
            request: InstallRequest {
                source: Source {
                    path: image.to_path_buf(),
                    size: std::fs::metadata(image).unwrap().len(),
                    label: String::new(),
                    kind: SourceKind::Img,
                },
                target: Target::new("/dev/null-target", None, 0),
                persist: 0,
                device: Some(device.to_path_buf()),
                allow_system_internal: true,
            },
            fastboot: false,
        }
    }

    fn context() -> (InstallContext, Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let notifier = Notifier::new().with(Arc::new(ChannelListener::new(tx)));
        (InstallContext::new(notifier, CancelToken::new()), rx)
    }

    #[test]
    fn copies_the_image_and_reports_progress() {
        let image = image(BUFFER_SIZE * 2 + 1000);
        let device = NamedTempFile::new().unwrap();
        let (ctx, rx) = context();

        ImageWriter::new()
            .direct_io(false)
            .install(&job(image.path(), device.path()), &ctx)
            .unwrap();

        assert_eq!(
            std::fs::read(device.path()).unwrap(),
            std::fs::read(image.path()).unwrap()
        );

        let events: Vec<Event> = rx.try_iter().collect();
        let progress: Vec<(u64, u64)> = events
            .iter()
            .filter_map(|e| match e {
                Event::InstallProgress {
                    complete,
                    remaining,
                    ..
                } => Some((*complete, *remaining)),
                _ => None,
            })
            .collect();
        let total = (BUFFER_SIZE * 2 + 1000) as u64;
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[0], (BUFFER_SIZE as u64, total - BUFFER_SIZE as u64));
        assert_eq!(progress[2], (total, 0));
        assert_eq!(
            &events[events.len() - 3..],
            &[
                Event::InstallProgressMessage("Syncing...".to_string()),
                Event::InstallPulseStart,
                Event::InstallPulseStop,
            ]
        );
    }

    #[test]
    fn cancelled_before_first_chunk_writes_nothing() {
        let image = image(4096);
        let device = NamedTempFile::new().unwrap();
        let (ctx, _rx) = context();
        ctx.token().cancel();

        let result = ImageWriter::new()
            .direct_io(false)
            .install(&job(image.path(), device.path()), &ctx);

        assert!(matches!(result, Err(Error::InstallCancelled)));
        assert_eq!(std::fs::metadata(device.path()).unwrap().len(), 0);
    }

    #[test]
    fn missing_device_is_an_io_error() {
        let image = image(16);
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _rx) = context();

        let result = ImageWriter::new()
            .direct_io(false)
            .install(&job(image.path(), &dir.path().join("sdz")), &ctx);

        assert!(matches!(result, Err(Error::Io(_))));
    }
}
