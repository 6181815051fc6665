//! Outward signals raised by the registry and the install coordinator.
//!
//! Callers implement [`Listener`] for the signals they care about; every
//! method defaults to doing nothing. A [`Notifier`] fans each signal out to
//! all subscribed listeners, synchronously and in subscription order.
//! Install signals are raised from the install thread, so listeners must be
//! `Send + Sync`.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;

#[allow(unused_variables)]
pub trait Listener: Send + Sync {
    fn source_added(&self, path: &Path) {}
    fn source_removed(&self, id: &str) {}
    fn target_added(&self, id: &str) {}
    fn target_removed(&self, id: &str) {}
    fn target_changed(&self, id: &str) {}
    fn format_ended(&self) {}
    fn format_failed(&self, message: &str) {}

    fn install_success(&self) {}
    fn install_failure(&self, message: Option<&str>) {}
    /// `speed` is in bytes per second.
    fn install_progress(&self, complete: u64, remaining: u64, speed: f64) {}
    fn install_progress_message(&self, message: &str) {}
    fn install_progress_pulse_start(&self) {}
    fn install_progress_pulse_stop(&self) {}
    fn install_retry(&self, message: &str) {}
}

/// The set of listeners signals are delivered to.
///
/// Cloning is cheap; clones share the listeners subscribed so far but not
/// those subscribed afterwards, so subscribe before handing the notifier to
/// a registry or coordinator.
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Vec<Arc<dyn Listener>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn with(mut self, listener: Arc<dyn Listener>) -> Self {
        self.subscribe(listener);
        self
    }

    fn each(&self, f: impl Fn(&dyn Listener)) {
        for listener in &self.listeners {
            f(listener.as_ref());
        }
    }

    pub fn source_added(&self, path: &Path) {
        self.each(|l| l.source_added(path));
    }

    pub fn source_removed(&self, id: &str) {
        self.each(|l| l.source_removed(id));
    }

    pub fn target_added(&self, id: &str) {
        self.each(|l| l.target_added(id));
    }

    pub fn target_removed(&self, id: &str) {
        self.each(|l| l.target_removed(id));
    }

    pub fn target_changed(&self, id: &str) {
        self.each(|l| l.target_changed(id));
    }

    pub fn format_ended(&self) {
        self.each(|l| l.format_ended());
    }

    pub fn format_failed(&self, message: &str) {
        self.each(|l| l.format_failed(message));
    }

    pub fn install_success(&self) {
        self.each(|l| l.install_success());
    }

    pub fn install_failure(&self, message: Option<&str>) {
        self.each(|l| l.install_failure(message));
    }

    pub fn install_progress(&self, complete: u64, remaining: u64, speed: f64) {
        self.each(|l| l.install_progress(complete, remaining, speed));
    }

    pub fn install_progress_message(&self, message: &str) {
        self.each(|l| l.install_progress_message(message));
    }

    pub fn install_progress_pulse_start(&self) {
        self.each(|l| l.install_progress_pulse_start());
    }

    pub fn install_progress_pulse_stop(&self) {
        self.each(|l| l.install_progress_pulse_stop());
    }

    pub fn install_retry(&self, message: &str) {
        self.each(|l| l.install_retry(message));
    }
}

/// An owned copy of a signal, for channel-based consumers.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    SourceAdded(PathBuf),
    SourceRemoved(String),
    TargetAdded(String),
    TargetRemoved(String),
    TargetChanged(String),
    FormatEnded,
    FormatFailed(String),
    InstallSuccess,
    InstallFailure(Option<String>),
    InstallProgress {
        complete: u64,
        remaining: u64,
        speed: f64,
    },
    InstallProgressMessage(String),
    InstallPulseStart,
    InstallPulseStop,
    InstallRetry(String),
}

/// Forwards every signal as an [`Event`] over an mpsc channel.
///
/// A disconnected receiver is ignored, like an unsubscribed signal.
pub struct ChannelListener {
    tx: Sender<Event>,
}

impl ChannelListener {
    pub fn new(tx: Sender<Event>) -> Self {
        Self { tx }
    }

    fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Listener for ChannelListener {
    fn source_added(&self, path: &Path) {
        self.send(Event::SourceAdded(path.to_path_buf()));
    }

    fn source_removed(&self, id: &str) {
        self.send(Event::SourceRemoved(id.to_string()));
    }

    fn target_added(&self, id: &str) {
        self.send(Event::TargetAdded(id.to_string()));
    }

    fn target_removed(&self, id: &str) {
        self.send(Event::TargetRemoved(id.to_string()));
    }

    fn target_changed(&self, id: &str) {
        self.send(Event::TargetChanged(id.to_string()));
    }

    fn format_ended(&self) {
        self.send(Event::FormatEnded);
    }

    fn format_failed(&self, message: &str) {
        self.send(Event::FormatFailed(message.to_string()));
    }

    fn install_success(&self) {
        self.send(Event::InstallSuccess);
    }

    fn install_failure(&self, message: Option<&str>) {
        self.send(Event::InstallFailure(message.map(str::to_string)));
    }

    fn install_progress(&self, complete: u64, remaining: u64, speed: f64) {
        self.send(Event::InstallProgress {
            complete,
            remaining,
            speed,
        });
    }

    fn install_progress_message(&self, message: &str) {
        self.send(Event::InstallProgressMessage(message.to_string()));
    }

    fn install_progress_pulse_start(&self) {
        self.send(Event::InstallPulseStart);
    }

    fn install_progress_pulse_stop(&self) {
        self.send(Event::InstallPulseStop);
    }

    fn install_retry(&self, message: &str) {
        self.send(Event::InstallRetry(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[derive(Default)]
    struct CountsChanges(AtomicUsize);

    impl Listener for CountsChanges {
        fn target_changed(&self, _id: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn unsubscribed_signals_are_silent() {
        let notifier = Notifier::new();
        notifier.install_failure(Some("boom"));
        notifier.target_changed("/dev/sdb1");
    }

    #[test]
    fn listeners_only_hear_what_they_override() {
        let counter = Arc::new(CountsChanges::default());
        let notifier = Notifier::new().with(counter.clone());

        notifier.target_added("/dev/sdb1");
        notifier.target_changed("/dev/sdb1");
        notifier.install_success();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channel_listener_preserves_order() {
        let (tx, rx) = mpsc::channel();
        let notifier = Notifier::new().with(Arc::new(ChannelListener::new(tx)));

        notifier.install_progress_pulse_start();
        notifier.install_progress(10, 90, 5.0);
        notifier.install_failure(None);

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                Event::InstallPulseStart,
                Event::InstallProgress {
                    complete: 10,
                    remaining: 90,
                    speed: 5.0
                },
                Event::InstallFailure(None),
            ]
        );
    }

    #[test]
    fn dropped_receiver_is_not_an_error() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let notifier = Notifier::new().with(Arc::new(ChannelListener::new(tx)));
        notifier.format_ended();
    }
}
