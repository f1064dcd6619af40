use std::any::type_name;
use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::sync::{Arc, Mutex, Weak};

use crate::ERR_POISONED_LOCK;

/// A deferred cleanup action to be executed during orderly shutdown.
///
/// Cells whose lifecycle participates in orderly shutdown wrap their teardown logic in a
/// task and hand it to a [`ShutdownRegistry`] at creation time. Host code can also create
/// its own tasks to sequence arbitrary cleanup work relative to cell teardown.
///
/// A task can only be executed by the registry that holds it, as part of
/// [`ShutdownRegistry::shutdown()`].
pub struct TeardownTask {
    action: Box<dyn FnOnce() + Send>,
}

impl TeardownTask {
    /// Creates a task that executes `action` when the registry it is handed to shuts down.
    #[must_use]
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            action: Box::new(action),
        }
    }

    pub(crate) fn run(self) {
        (self.action)();
    }
}

impl Debug for TeardownTask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("action", &format_args!("Box<dyn FnOnce()>"))
            .finish()
    }
}

/// Tasks are accepted until the registry shuts down, after which they are discarded.
#[derive(Debug)]
enum RegistryState {
    Accepting(Vec<TeardownTask>),
    ShutDown,
}

/// An explicit shutdown sequence owned by the hosting process.
///
/// The registry collects [`TeardownTask`] values and executes them exactly once, in reverse
/// registration order, when the host calls [`shutdown()`][Self::shutdown]. Cells register
/// their teardown through it at creation time, so instances created earlier are torn down
/// later, mirroring the usual construction/destruction symmetry of orderly shutdown.
///
/// Tasks registered after shutdown has run are silently discarded. This means a cell that
/// recreates its instance during or after shutdown simply holds that instance until the
/// cell itself is dropped.
///
/// # Example
///
/// ```
/// use solo_cell::{ShutdownRegistry, TeardownTask};
///
/// let registry = ShutdownRegistry::new();
///
/// registry.register(TeardownTask::new(|| println!("flushing buffers")));
/// assert_eq!(registry.pending(), 1);
///
/// // SAFETY: No cell references are live at this point.
/// let executed = unsafe { registry.shutdown() };
/// assert_eq!(executed, 1);
/// assert!(registry.is_shut_down());
/// ```
#[derive(Debug)]
pub struct ShutdownRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ShutdownRegistry {
    /// Creates a registry that accepts teardown tasks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::Accepting(Vec::new()))),
        }
    }

    /// Returns a handle through which tasks can be registered without holding on to the
    /// registry itself.
    ///
    /// The handle is weak: once the registry is dropped, registration through the handle
    /// becomes a no-op that discards the task.
    #[must_use]
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::downgrade(&self.state),
        }
    }

    /// Registers a task to execute during shutdown.
    ///
    /// If the registry has already shut down, the task is discarded without executing.
    pub fn register(&self, task: TeardownTask) {
        register_into(&self.state, task);
    }

    /// Number of tasks waiting to execute. Zero after shutdown.
    #[must_use]
    pub fn pending(&self) -> usize {
        match *self.state.lock().expect(ERR_POISONED_LOCK) {
            RegistryState::Accepting(ref tasks) => tasks.len(),
            RegistryState::ShutDown => 0,
        }
    }

    /// Whether [`shutdown()`][Self::shutdown] has already run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        matches!(
            *self.state.lock().expect(ERR_POISONED_LOCK),
            RegistryState::ShutDown
        )
    }

    /// Executes every registered task in reverse registration order and returns how many
    /// tasks were executed.
    ///
    /// The tasks run exactly once: a second call executes nothing and returns zero. Tasks
    /// registered while shutdown is in progress or after it has completed are discarded.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no references previously returned by cells registered
    /// with this registry are alive or used after this call, and that no registered cell is
    /// accessed concurrently while the tasks run. Teardown releases instance storage, so
    /// violating this invariant leaves dangling references.
    pub unsafe fn shutdown(&self) -> usize {
        let drained = {
            let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

            match mem::replace(&mut *state, RegistryState::ShutDown) {
                RegistryState::Accepting(tasks) => tasks,
                RegistryState::ShutDown => Vec::new(),
            }
        };

        // The lock is released before any task runs, so a task that triggers a new
        // registration observes the shut-down state instead of deadlocking.
        let executed = drained.len();

        for task in drained.into_iter().rev() {
            task.run();
        }

        executed
    }
}

impl Default for ShutdownRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A weak registration capability for a [`ShutdownRegistry`].
///
/// Carried by lifecycle policy values so that cells can schedule their teardown without
/// keeping the registry alive.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    state: Weak<Mutex<RegistryState>>,
}

impl ShutdownHandle {
    /// Registers a task with the registry this handle came from.
    ///
    /// Discards the task if the registry is gone or has already shut down.
    pub fn register(&self, task: TeardownTask) {
        if let Some(state) = self.state.upgrade() {
            register_into(&state, task);
        }
    }
}

fn register_into(state: &Mutex<RegistryState>, task: TeardownTask) {
    let mut state = state.lock().expect(ERR_POISONED_LOCK);

    match *state {
        RegistryState::Accepting(ref mut tasks) => tasks.push(task),
        RegistryState::ShutDown => drop(task),
    }
}
