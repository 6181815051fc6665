//! The core, UI-agnostic library for the `stickr` startup disk creator.
//!
//! `stickr-core` is designed to be used as a library by any front-end, whether it's
//! a command-line interface (like `stickr`) or a graphical user interface. It
//! keeps track of the images that can be installed and the devices they can be
//! installed to, works out which devices have room for the selected image, and
//! runs the install itself on a background thread.
//!
//! The library is structured into several key modules:
//! - [`registry`]: The set of known sources and targets, and the current source.
//! - [`space`]: Free-space and persistence-capacity accounting for targets.
//! - [`install`]: The install coordinator and the [`install::Installer`] trait.
//! - [`notify`]: The signals raised on every state change.
//! - [`mod@write`]: The installer that writes an image to a device.
//! - [`platform`]: Platform-specific device discovery and free-space probing.
//! - [`config`]: The remembered folder and image list.
//!
//! Front-ends react to changes by implementing [`notify::Listener`]; every
//! signal is optional.
//!
//! ## Example: Installing the First Usable Target
//!
//! ```rust,no_run
//! use stickr_core::{
//!     BackendVariant, Coordinator, ImageWriter, InstallRequest, Notifier, Registry,
//!     SystemProbe, TargetStatus, platform,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//! use anyhow::{Context, Result};
//!
//! fn main() -> Result<()> {
//!     let notifier = Notifier::new();
//!     let mut registry = Registry::new(Arc::new(SystemProbe), notifier.clone());
//!
//!     let image = Path::new("/path/to/ubuntu.iso");
//!     registry.add_source(image);
//!     for target in platform::list_targets(false)? {
//!         registry.add_target(target);
//!     }
//!     registry.set_current_source(Some(image))?;
//!
//!     let target = registry
//!         .targets()
//!         .find(|t| t.status == TargetStatus::Usable)
//!         .context("No usable target")?
//!         .clone();
//!     let source = registry.current_source().context("Image was not admitted")?.clone();
//!
//!     let mut coordinator =
//!         Coordinator::new(Arc::new(ImageWriter::new()), BackendVariant::Standard, notifier);
//!     coordinator.start(InstallRequest {
//!         source,
//!         persist: target.persist,
//!         target,
//!         device: None,
//!         allow_system_internal: false,
//!     })?;
//!     println!("Install finished: {:?}", coordinator.wait());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod install;
pub mod notify;
mod os_options;
pub mod platform;
pub mod probe;
pub mod registry;
pub mod source;
pub mod space;
pub mod write;

pub use config::Config;
pub use device::{Target, TargetStatus};
pub use error::{Error, Result};
pub use install::{
    BackendVariant, CancelToken, Coordinator, InstallContext, InstallJob, InstallRequest,
    InstallState, Installer,
};
pub use notify::{ChannelListener, Event, Listener, Notifier};
pub use probe::{Probe, SystemProbe};
pub use registry::{Registry, RegistryOptions};
pub use source::{AddOutcome, Rejection, Source, SourceKind};
pub use write::ImageWriter;
