//! Monitoring hooks.
//!
//! Pure observers of the kernel server: every command processed, every
//! context switch, and the idle-entry/idle-exit transitions fan out to the
//! monitors registered here. The core's correctness never depends on a
//! monitor being present, and monitors run on the server context, so they
//! are expected to be as cheap as the handlers themselves.
//!
//! The registry is backed by [`DashMap`] and may be mutated from any thread
//! while the server is running; the server reads whatever set is registered
//! at each hook point.

use std::sync::Arc;

use dashmap::DashMap;

use crate::command::CommandKind;
use crate::task::TaskInfo;

/// Observer callbacks invoked by the kernel server.
///
/// Every method has an empty default body, so implementors override only the
/// hook points they care about.
pub trait KernelMonitor: Send + Sync {
    /// A command was processed, tagged with its kind.
    fn on_command(&self, kind: CommandKind) {
        let _ = kind;
    }

    /// The server switched the active task.
    fn on_context_switch(&self, from: &TaskInfo, to: &TaskInfo) {
        let _ = (from, to);
    }

    /// The idle task is about to become the active task.
    fn on_idle_enter(&self) {}

    /// A non-idle task displaced the idle task as the active task.
    fn on_idle_exit(&self) {}
}

/// Concurrent registry of named monitors.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone, Default)]
pub struct MonitorRegistry {
    inner: Arc<DashMap<String, Arc<dyn KernelMonitor>>>,
}

impl MonitorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a monitor under `id`, replacing any previous monitor with
    /// the same id.
    pub fn register(&self, id: impl Into<String>, monitor: Arc<dyn KernelMonitor>) {
        let id = id.into();
        tracing::debug!(monitor_id = %id, "monitor registered");
        self.inner.insert(id, monitor);
    }

    /// Remove a monitor. Returns whether it was registered.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.inner.remove(id).is_some();
        if removed {
            tracing::debug!(monitor_id = %id, "monitor unregistered");
        }
        removed
    }

    /// Number of registered monitors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn each(&self, f: impl Fn(&dyn KernelMonitor)) {
        for entry in self.inner.iter() {
            f(entry.value().as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        commands: AtomicUsize,
    }

    impl KernelMonitor for Counting {
        fn on_command(&self, _kind: CommandKind) {
            self.commands.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn register_and_fan_out() {
        let registry = MonitorRegistry::new();
        let monitor = Arc::new(Counting {
            commands: AtomicUsize::new(0),
        });
        registry.register("counting", Arc::clone(&monitor) as Arc<dyn KernelMonitor>);
        assert_eq!(registry.count(), 1);

        registry.each(|m| m.on_command(CommandKind::Packet));
        registry.each(|m| m.on_command(CommandKind::EventSignal));
        assert_eq!(monitor.commands.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregister() {
        let registry = MonitorRegistry::new();
        registry.register(
            "temp",
            Arc::new(Counting {
                commands: AtomicUsize::new(0),
            }) as Arc<dyn KernelMonitor>,
        );

        assert!(registry.unregister("temp"));
        assert!(!registry.unregister("temp"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn default_hooks_are_no_ops() {
        struct Silent;
        impl KernelMonitor for Silent {}

        let registry = MonitorRegistry::new();
        registry.register("silent", Arc::new(Silent) as Arc<dyn KernelMonitor>);

        // Nothing to assert beyond "does not panic": defaults are empty.
        registry.each(|m| {
            m.on_command(CommandKind::SemaphoreGive);
            m.on_idle_enter();
            m.on_idle_exit();
        });
    }
}
