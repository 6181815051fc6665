use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use std::io::{IsTerminal, stdout};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use stickr_core::{
    AddOutcome, BackendVariant, Config, Coordinator, Error, ImageWriter, InstallRequest,
    InstallState, Notifier, Registry, Rejection, SystemProbe, Target, TargetStatus, platform,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[cfg(unix)]
use libc::ECHOCTL;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
#[cfg(unix)]
use termios::{TCSANOW, Termios, tcsetattr};

mod reporter;

use reporter::InstallReporter;

const CANCEL_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "stickr")]
#[command(about = "Make bootable USB sticks from disk images", version)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install an image onto a device interactively
    Write {
        /// Image file to install (.iso or .img)
        #[arg(required = true)]
        image: PathBuf,

        /// Persistence size in megabytes
        #[arg(short, long, default_value_t = 0)]
        persist: u64,

        /// Write to this device (or fastboot serial) instead of the selected target
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Also offer internal, non-removable disks
        #[arg(long)]
        internal: bool,

        /// Flash over fastboot instead of writing to a block device
        #[arg(long)]
        fastboot: bool,
    },
    /// List available target devices
    List {
        /// Show whether each device can take this image
        image: Option<PathBuf>,

        /// Also list internal, non-removable disks
        #[arg(long)]
        internal: bool,
    },
    /// Show or edit the remembered images
    Sources {
        #[command(subcommand)]
        action: Option<SourcesAction>,
    },
}

#[derive(Subcommand)]
enum SourcesAction {
    /// Remember more images
    Add {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Forget all images
    Clear,
}

/// A helper struct that, on Unix, disables `ECHOCTL` for the terminal.
///
/// `ECHOCTL` is the terminal flag that causes Ctrl+C to be printed as `^C`.
/// The original terminal state is restored when this struct is dropped.
struct TermRestorer {
    #[cfg(unix)]
    original_termios: Option<Termios>,
}

impl TermRestorer {
    fn new() -> Self {
        #[cfg(unix)]
        {
            let fd = stdout().as_raw_fd();
            if !stdout().is_terminal() {
                return Self {
                    original_termios: None,
                };
            }

            let original_termios = Termios::from_fd(fd).ok().and_then(|original| {
                let mut quiet = original;
                quiet.c_lflag &= !ECHOCTL;
                tcsetattr(fd, TCSANOW, &quiet).ok().map(|_| original)
            });
            Self { original_termios }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for TermRestorer {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(ref original_termios) = self.original_termios {
            let fd = stdout().as_raw_fd();
            tcsetattr(fd, TCSANOW, original_termios).ok();
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var("STICKR_LOG")
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .try_init();
}

fn describe_rejection(reason: &Rejection) -> String {
    match reason {
        Rejection::NotAFile => "not a regular file".to_string(),
        Rejection::NoExtension => "the file has no extension".to_string(),
        Rejection::UnknownExtension(ext) => format!("'.{}' images are not supported", ext),
        Rejection::NotBootable => "not a bootable image".to_string(),
    }
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Registers `image` and makes it the current source.
fn register_image(registry: &mut Registry, image: &Path) -> Result<PathBuf> {
    let path = match registry.add_source(image) {
        AddOutcome::Added(path) | AddOutcome::AlreadyPresent(path) => path,
        AddOutcome::Rejected(reason) => bail!(
            "{} cannot be used: {}.",
            image.display(),
            describe_rejection(&reason)
        ),
    };
    registry.set_current_source(Some(&path))?;
    Ok(path)
}

/// Presents an interactive menu for the user to select a target.
fn select_target(targets: &[Target], prompt: &str) -> Result<Target> {
    if targets.is_empty() {
        return Err(anyhow!("No usable devices found."));
    }

    let items: Vec<String> = targets.iter().map(|t| t.to_string()).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(targets[selection].clone())
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn config_path(cli_path: Option<PathBuf>) -> Result<PathBuf> {
    match cli_path {
        Some(path) => Ok(path),
        None => Ok(Config::default_path()?),
    }
}

/// Runs the install, polling so that Ctrl+C can cancel it with a bounded wait.
fn run_install(
    coordinator: &mut Coordinator,
    reporter: &InstallReporter,
    interrupted: &AtomicBool,
) -> InstallState {
    loop {
        if let Some(state) = coordinator.wait_timeout(POLL_INTERVAL) {
            return state;
        }
        if !interrupted.swap(false, Ordering::SeqCst) {
            continue;
        }

        reporter.note("Cancelling the installation...");
        match coordinator.cancel_timeout(CANCEL_TIMEOUT) {
            Ok(()) => return coordinator.state(),
            Err(Error::CancelTimedOut) => {
                reporter.note("Still waiting for the install to stop...");
            }
            Err(e) => debug!("Cancel failed: {}", e),
        }
    }
}

fn main() -> Result<()> {
    // This guard will be dropped when main() exits, restoring the terminal.
    let _term_restorer = TermRestorer::new();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Set by Ctrl+C; the install loop turns it into a cancellation request.
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    match cli.command {
        Commands::Write {
            image,
            persist,
            device,
            internal,
            fastboot,
        } => {
            let reporter = Arc::new(InstallReporter::new());
            let notifier = Notifier::new().with(reporter.clone());
            let mut registry = Registry::new(Arc::new(SystemProbe), notifier.clone());
            register_image(&mut registry, &image)?;

            let target = if fastboot {
                let serial = device
                    .as_ref()
                    .map(|d| d.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "fastboot".to_string());
                Target::new(serial, None, 0)
            } else {
                for target in platform::list_targets(internal)? {
                    registry.add_target(target);
                }
                registry.refresh();

                let usable: Vec<Target> = registry
                    .targets()
                    .filter(|t| t.status == TargetStatus::Usable)
                    .cloned()
                    .collect();
                select_target(&usable, "Select the target device to WRITE to")?
            };

            let persist = persist.saturating_mul(1024 * 1024);
            if !fastboot && persist > target.persist {
                bail!(
                    "Only {:.0} MB of persistence fit on {}.",
                    megabytes(target.persist),
                    target.id
                );
            }

            let source = registry
                .current_source()
                .cloned()
                .ok_or_else(|| anyhow!("No image selected."))?;

            println!(
                "{} This will write '{}' to '{}'.",
                style("WARNING:").red().bold(),
                source.path.display(),
                target.id,
            );
            if !source.label.is_empty() {
                println!("  Label:   {}", style(&source.label).cyan());
            }
            let device_path = device.as_deref().unwrap_or(Path::new(&target.id));
            println!("  Device:  {}", style(device_path.display()).cyan());
            if persist > 0 {
                println!("  Persist: {:.0} MB", megabytes(persist));
            }
            println!();

            if !confirm_operation("Are you sure you want to proceed?")? {
                println!("Install cancelled.");
                return Ok(());
            }

            println!();

            let variant = if fastboot {
                BackendVariant::Fastboot
            } else {
                BackendVariant::Standard
            };
            let mut coordinator = Coordinator::new(Arc::new(ImageWriter::new()), variant, notifier);
            reporter.start();
            coordinator.start(InstallRequest {
                source,
                target: target.clone(),
                persist,
                device,
                allow_system_internal: internal,
            })?;

            match run_install(&mut coordinator, &reporter, &interrupted) {
                InstallState::Succeeded => {
                    println!(
                        "\n✨ Successfully installed {} on {}.",
                        style(image.display()).cyan(),
                        style(&target.id).cyan()
                    );
                }
                InstallState::Cancelled => {
                    reporter.finish("Install cancelled.");
                    println!("\nInstall cancelled. The device may be left unusable.");
                }
                _ => {
                    let message = reporter.failure().unwrap_or_else(|| "unknown error".to_string());
                    return Err(anyhow!("Install failed: {}", message));
                }
            }
        }
        Commands::List { image, internal } => {
            let mut registry = Registry::new(Arc::new(SystemProbe), Notifier::new());
            if let Some(image) = &image {
                register_image(&mut registry, image)?;
            }
            for target in platform::list_targets(internal)? {
                registry.add_target(target);
            }

            if registry.targets().count() == 0 {
                println!("No devices found.");
                return Ok(());
            }

            println!("Found {} devices:", registry.targets().count());
            println!(
                "\n  {:<16} {:>10} {:>10} {:<18} {:>12}  {}",
                "DEVICE", "SIZE", "FREE", "STATUS", "PERSISTENCE", "LOCATION"
            );
            println!(
                "  {:-<16} {:->10} {:->10} {:-<18} {:->12}  {:-<20}",
                "", "", "", "", "", ""
            );
            for target in registry.targets() {
                let location = match &target.mountpoint {
                    Some(mp) => mp.display().to_string(),
                    None => "(Not mounted)".to_string(),
                };
                let status = if image.is_some() || target.status.is_terminal() {
                    target.status.to_string()
                } else {
                    "-".to_string()
                };
                println!(
                    "  {:<16} {:>7.1} GB {:>7.1} GB {:<18} {:>9.0} MB  {}",
                    target.id,
                    megabytes(target.capacity) / 1024.0,
                    megabytes(target.free) / 1024.0,
                    status,
                    megabytes(target.persist),
                    location
                );
            }
        }
        Commands::Sources { action } => {
            let path = config_path(cli.config)?;
            let mut config = Config::load_from(&path)?;

            match action {
                None => {
                    if config.images.is_empty() {
                        println!("No remembered images.");
                    }
                    for (n, image) in config.images.iter().enumerate() {
                        println!("  {:>2}  {}", n, image.display());
                    }
                }
                Some(SourcesAction::Add { images }) => {
                    let mut registry = Registry::new(Arc::new(SystemProbe), Notifier::new());
                    config.apply(&mut registry)?;
                    for image in &images {
                        match registry.add_source(image) {
                            AddOutcome::Added(p) => println!("Added {}", style(p.display()).cyan()),
                            AddOutcome::AlreadyPresent(p) => {
                                println!("{} is already remembered.", p.display())
                            }
                            AddOutcome::Rejected(reason) => println!(
                                "{} Skipping {}: {}.",
                                style("WARNING:").yellow().bold(),
                                image.display(),
                                describe_rejection(&reason)
                            ),
                        }
                    }
                    config.capture(&registry);
                    config.save_to(&path)?;
                }
                Some(SourcesAction::Clear) => {
                    config.images.clear();
                    config.save_to(&path)?;
                    println!("Forgot all images.");
                }
            }
        }
    }

    Ok(())
}
