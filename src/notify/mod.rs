//! Best-effort delivery of zone transitions.
//!
//! The detector commits a zone's new state first and only then hands the
//! event to the `Dispatcher`, which queues it for a background worker. A
//! delivery failure is logged and forgotten: no retry, no rollback, and
//! anything still queued at shutdown is dropped.

use anyhow::Result;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

use crate::detect::TransitionEvent;

mod http;

pub use http::{HttpNotifier, HttpNotifierConfig};

/// Delivers one transition. Runs on the dispatcher thread, so it may block.
pub trait Notifier: Send {
    fn notify(&mut self, event: &TransitionEvent) -> Result<()>;
}

/// Used when outbound notifications are disabled.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&mut self, event: &TransitionEvent) -> Result<()> {
        log::info!(
            "{} {} ({}), usage_count={}",
            event.action,
            event.zone_name,
            event.zone_id,
            event.usage_count
        );
        Ok(())
    }
}

/// Queue plus worker thread in front of a `Notifier`.
pub struct Dispatcher {
    sender: Option<SyncSender<TransitionEvent>>,
    join: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(notifier: Box<dyn Notifier>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let join = std::thread::spawn(move || run_dispatcher(notifier, rx));
        Self {
            sender: Some(tx),
            join: Some(join),
        }
    }

    /// Queue `event` without blocking. Returns false when it was dropped.
    pub fn dispatch(&self, event: TransitionEvent) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                log::warn!(
                    "notification queue full; dropping {} for {}",
                    event.action,
                    event.zone_name
                );
                false
            }
            Err(TrySendError::Disconnected(event)) => {
                log::warn!(
                    "notification worker gone; dropping {} for {}",
                    event.action,
                    event.zone_name
                );
                false
            }
        }
    }

    /// Close the queue. In-flight delivery is not waited for.
    pub fn shutdown(mut self) {
        self.sender.take();
        self.join.take();
    }

    /// Close the queue and wait for the worker to drain it.
    pub fn drain(mut self) {
        self.sender.take();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("notification worker panicked");
            }
        }
    }
}

fn run_dispatcher(mut notifier: Box<dyn Notifier>, rx: Receiver<TransitionEvent>) {
    for event in rx {
        if let Err(err) = notifier.notify(&event) {
            log::warn!(
                "notification for {} {} failed: {}",
                event.action,
                event.zone_name,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Action;
    use crate::zone::ZoneId;
    use anyhow::anyhow;
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
        delay: Duration,
        fail: bool,
    }

    impl Notifier for Recording {
        fn notify(&mut self, event: &TransitionEvent) -> Result<()> {
            std::thread::sleep(self.delay);
            self.seen.lock().unwrap().push(event.zone_name.clone());
            if self.fail {
                return Err(anyhow!("endpoint down"));
            }
            Ok(())
        }
    }

    fn event(name: &str) -> TransitionEvent {
        TransitionEvent {
            zone_id: ZoneId::new(1),
            zone_name: name.to_string(),
            action: Action::Pickup,
            usage_count: 1,
        }
    }

    #[test]
    fn failures_do_not_stop_the_worker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::spawn(
            Box::new(Recording {
                seen: seen.clone(),
                delay: Duration::ZERO,
                fail: true,
            }),
            8,
        );
        assert!(dispatcher.dispatch(event("a")));
        assert!(dispatcher.dispatch(event("b")));
        dispatcher.drain();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn slow_notifier_never_blocks_dispatch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::spawn(
            Box::new(Recording {
                seen: seen.clone(),
                delay: Duration::from_millis(200),
                fail: false,
            }),
            1,
        );
        let started = Instant::now();
        let accepted = (0..5)
            .map(|i| dispatcher.dispatch(event(&format!("z{}", i))))
            .filter(|ok| *ok)
            .count();
        assert!(started.elapsed() < Duration::from_millis(150));
        assert!(accepted >= 1 && accepted < 5);
        dispatcher.shutdown();
    }

    #[test]
    fn log_notifier_always_succeeds() {
        assert!(LogNotifier.notify(&event("x")).is_ok());
    }
}
