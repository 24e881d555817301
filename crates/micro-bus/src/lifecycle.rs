//! # Lifecycle
//!
//! Explicit shutdown hooks. The application registers the components it
//! wants stopped and calls [`LifecycleManager::run_shutdown_hooks`] from
//! its own exit path; nothing is installed process-wide.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A component that can be shut down.
pub trait Lifecycle: Send + Sync {
    /// Stop the component. Must be safe to call more than once.
    fn shutdown(&self);

    /// Name used in logs.
    fn name(&self) -> &str {
        "component"
    }
}

/// Handle returned by [`LifecycleManager::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Ordered set of shutdown hooks, run at most once.
#[derive(Default)]
pub struct LifecycleManager {
    hooks: Mutex<Vec<(HookId, Arc<dyn Lifecycle>)>>,
    next_id: AtomicU64,
    ran: AtomicBool,
}

impl LifecycleManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook.
    pub fn register(&self, hook: Arc<dyn Lifecycle>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(hook = hook.name(), "[mbus] Shutdown hook registered");
        self.hooks.lock().push((id, hook));
        id
    }

    /// Remove a hook. Returns whether it was registered.
    pub fn unregister(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Whether no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }

    /// Run every hook once, most recently registered first.
    ///
    /// Returns the number of hooks run; later calls run nothing and
    /// return 0. Hooks are called without the registry lock held.
    pub fn run_shutdown_hooks(&self) -> usize {
        if self.ran.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let hooks: Vec<_> = self.hooks.lock().drain(..).collect();
        let count = hooks.len();
        for (_, hook) in hooks.into_iter().rev() {
            info!(hook = hook.name(), "[mbus] Running shutdown hook");
            hook.shutdown();
        }
        count
    }

    /// Whether the hooks have been run.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("hooks", &self.len())
            .field("ran", &self.has_run())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Lifecycle for Recorder {
        fn shutdown(&self) {
            self.log.lock().push(self.name);
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Lifecycle> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
        })
    }

    #[test]
    fn test_hooks_run_once_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        manager.register(recorder("first", &log));
        manager.register(recorder("second", &log));

        assert_eq!(manager.run_shutdown_hooks(), 2);
        assert_eq!(manager.run_shutdown_hooks(), 0);
        assert!(manager.has_run());
        assert_eq!(*log.lock(), vec!["second", "first"]);
    }

    #[test]
    fn test_unregister() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let manager = LifecycleManager::new();
        let id = manager.register(recorder("gone", &log));
        manager.register(recorder("kept", &log));

        assert!(manager.unregister(id));
        assert!(!manager.unregister(id));
        assert_eq!(manager.len(), 1);

        manager.run_shutdown_hooks();
        assert_eq!(*log.lock(), vec!["kept"]);
    }
}
