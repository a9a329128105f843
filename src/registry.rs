//! Task registry: named worker threads with cooperative cancellation.
//!
//! Every motor owns one worker thread, registered here under the motor's
//! name so it can be looked up and cancelled later. The registry is an
//! explicit, injectable object rather than process-wide state: create one at
//! startup and hand clones to every motor (tests instantiate isolated
//! registries).
//!
//! Cancellation is cooperative. [`TaskRegistry::kill`] removes the entry and
//! raises the worker's [`CancelToken`]; it never blocks for, nor preempts,
//! the worker itself. Workers that exit naturally remove their own entry.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::sync;

/// Maximum stack budget assignable to a task, in bytes.
pub const MAX_STACK_SIZE: usize = 1024 * 1024;

/// Maximum name length for a task, in bytes.
pub const TASK_NAME_LEN: usize = 32;

/// Opaque, comparable identity of a registered task.
///
/// Backed by a non-zero integer: a successful spawn can never return the
/// "no task" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(NonZeroU64);

/// Cooperative cancellation flag shared with a worker.
///
/// Workers poll [`is_cancelled`](CancelToken::is_cancelled) at their own
/// suspension points; the flag is never reset once raised.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Raise the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

struct TaskEntry {
    id: TaskId,
    name: heapless::String<TASK_NAME_LEN>,
    token: CancelToken,
}

struct Inner {
    tasks: Mutex<Vec<TaskEntry>>,
    next_id: AtomicU64,
    max_stack: usize,
}

/// Registry of named worker threads.
///
/// Cheap to clone; clones share the same task table.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    /// Create a registry with the default stack budget limit
    /// ([`MAX_STACK_SIZE`]).
    pub fn new() -> Self {
        Self::with_max_stack(MAX_STACK_SIZE)
    }

    /// Create a registry with a custom stack budget limit.
    pub fn with_max_stack(max_stack: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                max_stack,
            }),
        }
    }

    /// Create and start a new named task.
    ///
    /// The entry is registered before the worker begins executing. `entry`
    /// receives the task's [`CancelToken`] and should poll it at its
    /// suspension points. When `entry` returns, the task removes its own
    /// registry entry.
    ///
    /// Duplicate names are accepted; lookup precedence between duplicates is
    /// unspecified beyond "first encountered".
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the name is empty or too long, or the stack
    /// budget is zero or exceeds the registry's maximum.
    /// `ResourceUnavailable` if the OS refuses to start the thread.
    pub fn spawn<F>(&self, name: &str, stack_size: usize, entry: F) -> Result<TaskId>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        if name.is_empty() {
            return Err(Error::InvalidArgument("task name is empty"));
        }
        let name: heapless::String<TASK_NAME_LEN> = name
            .try_into()
            .map_err(|_| Error::InvalidArgument("task name too long"))?;
        if stack_size == 0 || stack_size > self.inner.max_stack {
            return Err(Error::InvalidArgument("stack budget out of range"));
        }

        let id = TaskId(
            NonZeroU64::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
                .ok_or(Error::ResourceUnavailable("task id space exhausted"))?,
        );
        let token = CancelToken::default();

        // Register before the worker can run, so the task is visible by name
        // from its very first instruction.
        sync::lock(&self.inner.tasks).push(TaskEntry {
            id,
            name: name.clone(),
            token: token.clone(),
        });

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(name.as_str().to_owned())
            .stack_size(stack_size)
            .spawn(move || {
                entry(token);
                // Natural exit: deregister ourselves.
                sync::lock(&inner.tasks).retain(|t| t.id != id);
            });

        match spawned {
            Ok(_join) => {
                debug!(task = name.as_str(), ?id, "task started");
                Ok(id)
            }
            Err(e) => {
                sync::lock(&self.inner.tasks).retain(|t| t.id != id);
                error!(task = name.as_str(), error = %e, "could not start task");
                Err(Error::ResourceUnavailable("could not start worker thread"))
            }
        }
    }

    /// Find a task by name. Linear scan; first match wins if names are
    /// duplicated.
    pub fn find_by_name(&self, name: &str) -> Option<TaskId> {
        sync::lock(&self.inner.tasks)
            .iter()
            .find(|t| t.name.as_str() == name)
            .map(|t| t.id)
    }

    /// Kill a task: remove its entry and request cooperative cancellation.
    ///
    /// Fire-and-forget; the caller is not blocked for the worker's actual
    /// termination. No-op if the task is not registered.
    pub fn kill(&self, id: TaskId) {
        let entry = {
            let mut tasks = sync::lock(&self.inner.tasks);
            tasks
                .iter()
                .position(|t| t.id == id)
                .map(|i| tasks.swap_remove(i))
        };
        if let Some(entry) = entry {
            debug!(task = entry.name.as_str(), ?id, "task killed");
            entry.token.cancel();
        }
    }

    /// Whether a task is still registered.
    pub fn contains(&self, id: TaskId) -> bool {
        sync::lock(&self.inner.tasks).iter().any(|t| t.id == id)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        sync::lock(&self.inner.tasks).len()
    }

    /// Whether the registry has no tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_spawn_validates_arguments() {
        let registry = TaskRegistry::new();
        assert_eq!(
            registry.spawn("", 4096, |_| {}),
            Err(Error::InvalidArgument("task name is empty"))
        );
        assert_eq!(
            registry.spawn(&"x".repeat(TASK_NAME_LEN + 1), 4096, |_| {}),
            Err(Error::InvalidArgument("task name too long"))
        );
        assert_eq!(
            registry.spawn("zero-stack", 0, |_| {}),
            Err(Error::InvalidArgument("stack budget out of range"))
        );
        assert_eq!(
            registry.spawn("huge-stack", MAX_STACK_SIZE + 1, |_| {}),
            Err(Error::InvalidArgument("stack budget out of range"))
        );
    }

    #[test]
    fn test_spawn_registers_before_entry_runs() {
        let registry = TaskRegistry::new();
        let reg = registry.clone();
        let (tx, rx) = mpsc::channel();
        let id = registry
            .spawn("probe", 64 * 1024, move |_| {
                tx.send(reg.find_by_name("probe")).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Some(id));
    }

    #[test]
    fn test_worker_removes_own_entry_on_exit() {
        let registry = TaskRegistry::new();
        let (tx, rx) = mpsc::channel();
        let id = registry
            .spawn("short-lived", 64 * 1024, move |_| {
                tx.send(()).unwrap();
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // The removal races with our recv by a hair; poll briefly.
        let mut gone = false;
        for _ in 0..100 {
            if !registry.contains(id) {
                gone = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(gone);
    }

    #[test]
    fn test_kill_removes_and_cancels() {
        let registry = TaskRegistry::new();
        let (tx, rx) = mpsc::channel();
        let id = registry
            .spawn("looper", 64 * 1024, move |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                tx.send(()).unwrap();
            })
            .unwrap();
        assert!(registry.contains(id));
        registry.kill(id);
        assert!(!registry.contains(id));
        // Worker observes the token and exits.
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // Killing an unregistered task is a no-op.
        registry.kill(id);
    }

    #[test]
    fn test_duplicate_names_first_match() {
        let registry = TaskRegistry::new();
        let spin = |token: CancelToken| {
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
        };
        let first = registry.spawn("twin", 64 * 1024, spin).unwrap();
        let second = registry.spawn("twin", 64 * 1024, spin).unwrap();
        assert_ne!(first, second);
        assert_eq!(registry.find_by_name("twin"), Some(first));
        registry.kill(first);
        assert_eq!(registry.find_by_name("twin"), Some(second));
        registry.kill(second);
        assert_eq!(registry.find_by_name("twin"), None);
    }

    #[test]
    fn test_find_unknown_name() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.find_by_name("nobody"), None);
        assert!(registry.is_empty());
    }
}
