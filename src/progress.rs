// src/progress.rs

//! Deployment progress notification
//!
//! Observers are notified synchronously on the deployment's worker thread
//! after every step and every status change, with a snapshot of the record.
//! A slow observer stalls that deployment, so observers should hand work
//! off rather than block.
//!
//! Implementations:
//! - `LogObserver`: logs each notification through tracing
//! - `ChannelObserver`: forwards snapshots over an mpsc channel
//! - any `Fn(&DeploymentRecord) + Send + Sync` closure
//!
//! # Example
//!
//! ```ignore
//! installer.register_observer(|record: &DeploymentRecord| {
//!     println!("{} -> {}", record.id, record.status);
//! });
//! ```

use crate::installer::DeploymentRecord;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{info, warn};

/// Receives deployment progress
pub trait DeploymentObserver: Send + Sync {
    fn on_update(&self, record: &DeploymentRecord);
}

impl<F> DeploymentObserver for F
where
    F: Fn(&DeploymentRecord) + Send + Sync,
{
    fn on_update(&self, record: &DeploymentRecord) {
        self(record)
    }
}

/// Logs progress at info level
#[derive(Debug, Default)]
pub struct LogObserver;

impl DeploymentObserver for LogObserver {
    fn on_update(&self, record: &DeploymentRecord) {
        let Some(step) = record.current_step() else {
            info!("[{}] {} {}", record.id, record.recipe.label(), record.status);
            return;
        };
        let target = step
            .resource_name
            .as_deref()
            .map(|r| format!(" ({r})"))
            .unwrap_or_default();
        info!(
            "[{}] {} {}: {}{} {}",
            record.id,
            record.recipe.label(),
            record.status,
            step.name,
            target,
            step.status
        );
    }
}

/// Sends every snapshot over a channel
pub struct ChannelObserver {
    sender: Mutex<Sender<DeploymentRecord>>,
}

impl ChannelObserver {
    /// Observer plus the receiving end of its channel
    pub fn new() -> (Self, Receiver<DeploymentRecord>) {
        let (sender, receiver) = mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl DeploymentObserver for ChannelObserver {
    fn on_update(&self, record: &DeploymentRecord) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.sender.lock().send(record.clone());
    }
}

/// Registered observers
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Arc<dyn DeploymentObserver>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn DeploymentObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Notify every observer; a panicking observer is logged and skipped
    pub fn notify(&self, record: &DeploymentRecord) {
        let observers = self.observers.read().clone();
        for observer in observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_update(record)));
            if let Err(payload) = result {
                warn!(
                    "Observer panicked on deployment {}: {}",
                    record.id,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::{ParameterValues, Recipe};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record() -> DeploymentRecord {
        DeploymentRecord::new(
            "dep-1",
            Recipe::new("app", "1.0", "p", "d"),
            ParameterValues::new(),
            None,
        )
    }

    #[test]
    fn test_closures_and_channels() {
        let list = ObserverList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        list.register(Arc::new(move |_: &DeploymentRecord| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let (channel, rx) = ChannelObserver::new();
        list.register(Arc::new(channel));
        list.register(Arc::new(LogObserver));

        list.notify(&record());
        list.notify(&record());

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(list.len(), 3);
    }

    struct Panicky;

    impl DeploymentObserver for Panicky {
        fn on_update(&self, _record: &DeploymentRecord) {
            panic!("observer bug");
        }
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let list = ObserverList::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);

        list.register(Arc::new(Panicky));
        list.register(Arc::new(move |_: &DeploymentRecord| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        list.notify(&record());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
