use std::fmt::Debug;
use std::marker::PhantomData;

use crate::shutdown::{ShutdownHandle, TeardownTask};
use crate::{AccessError, Result};

/// Defines what happens at the end of an instance's life and what a cell does when it is
/// accessed again after teardown.
///
/// A lifecycle strategy is selected as a type parameter of
/// [`SoloCell`][crate::SoloCell] and supplied as a value at cell creation. The provided
/// strategies are [`Standard`], [`Immortal`] and [`Resurrecting`]. The trait is open:
/// host code can implement its own end-of-life behavior, e.g. to route teardown through
/// a different sequencing mechanism.
pub trait Lifecycle: Debug + Send + 'static {
    /// Offers the cell's teardown task to whatever runs the end of this lifecycle.
    ///
    /// Called exactly once, when the cell is created. An implementation either forwards
    /// the task to a [`ShutdownRegistry`][crate::ShutdownRegistry] (or an equivalent
    /// sequencing mechanism) or discards it to opt out of orderly teardown.
    fn schedule(&self, task: TeardownTask);

    /// Decides whether an access attempt may recreate the instance after teardown.
    ///
    /// Consulted while the cell holds its guard, when an access attempt finds the
    /// torn-down marker set. Returning `Ok(())` clears the marker and lets the attempt
    /// construct a fresh instance; returning an error fails the attempt and leaves the
    /// marker in place.
    fn on_dead_access(&self) -> Result<()>;
}

/// Lifecycle strategy for instances that die at orderly shutdown and stay dead.
///
/// The cell's teardown runs when the [`ShutdownRegistry`][crate::ShutdownRegistry]
/// behind `handle` shuts down. Accessing the cell afterwards returns
/// [`AccessError::TornDown`] on every attempt.
///
/// This is the default lifecycle of [`SoloCell`][crate::SoloCell].
#[derive(Debug)]
pub struct Standard {
    handle: ShutdownHandle,
}

impl Standard {
    /// Creates the policy value; cells using it register their teardown through `handle`.
    #[must_use]
    pub fn new(handle: ShutdownHandle) -> Self {
        Self { handle }
    }
}

impl Lifecycle for Standard {
    fn schedule(&self, task: TeardownTask) {
        self.handle.register(task);
    }

    fn on_dead_access(&self) -> Result<()> {
        Err(AccessError::TornDown)
    }
}

/// Lifecycle strategy for instances that outlive orderly shutdown.
///
/// Nothing is registered with any shutdown sequence, so the instance survives
/// [`ShutdownRegistry::shutdown()`][crate::ShutdownRegistry::shutdown] untouched and is
/// only released when the cell itself is dropped. A host that wants the instance to
/// truly never die can leak the cell.
///
/// An explicit [`tear_down()`][crate::SoloCell::tear_down] is still honored; a later
/// access then silently constructs a fresh instance.
#[derive(Debug, Default)]
pub struct Immortal {
    _private: PhantomData<()>,
}

impl Immortal {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _private: PhantomData,
        }
    }
}

impl Lifecycle for Immortal {
    fn schedule(&self, task: TeardownTask) {
        drop(task);
    }

    fn on_dead_access(&self) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle strategy for instances that die at orderly shutdown but may come back.
///
/// Teardown is registered exactly as with [`Standard`]; the difference is what happens
/// afterwards: an access attempt on the torn-down cell silently constructs a fresh
/// instance instead of failing.
///
/// An instance recreated after the registry has shut down is not registered again and
/// lives until the cell is dropped.
#[derive(Debug)]
pub struct Resurrecting {
    handle: ShutdownHandle,
}

impl Resurrecting {
    /// Creates the policy value; cells using it register their teardown through `handle`.
    #[must_use]
    pub fn new(handle: ShutdownHandle) -> Self {
        Self { handle }
    }
}

impl Lifecycle for Resurrecting {
    fn schedule(&self, task: TeardownTask) {
        self.handle.register(task);
    }

    fn on_dead_access(&self) -> Result<()> {
        Ok(())
    }
}
