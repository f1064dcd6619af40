use std::cell::Cell;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use crate::slots::{SharedSlot, SlotStore, ThreadSlots};
use crate::{ERR_POISONED_LOCK, Sealed};

/// Defines how a cell serializes its check-and-create sequence.
///
/// A synchronization strategy is selected as a type parameter of
/// [`SoloCell`][crate::SoloCell], so the choice is resolved at compile time. The provided
/// strategies are [`Unsynchronized`], [`MutexGuarded`], [`SpinGuarded`] and
/// [`PerThread`].
///
/// Besides the guard that brackets instance creation and teardown, the strategy also
/// decides where published instances reside: the first three share one slot among all
/// threads, while [`PerThread`] keeps one slot (and therefore one instance) per thread.
///
/// This trait is sealed and can only be implemented in the `solo_cell` crate, because
/// slot residency is an internal contract between the cell and its strategies.
#[expect(private_bounds, reason = "intentionally sealed trait")]
pub trait Synchronization: SynchronizationPrivate + Sealed + Debug + Send + 'static {}

/// Privately accessible functionality expected from implementations of `Synchronization`.
pub(crate) trait SynchronizationPrivate {
    /// Scoped token holding the serialization, released when dropped.
    type Guard<'a>
    where
        Self: 'a;

    /// Residency of published instances for cells using this strategy.
    type Slots<T: Send>: SlotStore<T>;

    /// Blocks, spins or does nothing until the calling thread holds the serialization.
    fn acquire(&self) -> Self::Guard<'_>;
}

/// Synchronization strategy that performs no serialization at all.
///
/// For single-threaded hosts. Cells using this strategy are neither [`Send`] nor
/// [`Sync`]: the compiler confines them to the thread that created them, so the absent
/// serialization can never be observed by a second thread.
///
/// Re-entrant access from within the instance factory is not defended against and
/// results in two instances being constructed, with the first one leaked until teardown.
#[derive(Debug, Default)]
pub struct Unsynchronized {
    /// Spoils `Sync` so the compiler confines cells using this strategy to one thread.
    _single_threaded: PhantomData<Cell<()>>,
}

impl Unsynchronized {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _single_threaded: PhantomData,
        }
    }
}

impl Sealed for Unsynchronized {}
impl Synchronization for Unsynchronized {}
impl SynchronizationPrivate for Unsynchronized {
    type Guard<'a>
        = ()
    where
        Self: 'a;

    type Slots<T: Send> = SharedSlot<T>;

    #[inline]
    fn acquire(&self) -> Self::Guard<'_> {}
}

/// Synchronization strategy that serializes through a mutex.
///
/// This is the default strategy of [`SoloCell`][crate::SoloCell]. Threads arriving while
/// another thread constructs the instance block until construction completes.
///
/// # Panics
///
/// If the instance factory panics while the mutex is held, the mutex is poisoned and
/// every later access attempt panics.
#[derive(Debug, Default)]
pub struct MutexGuarded {
    lock: Mutex<()>,
}

impl MutexGuarded {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }
}

impl Sealed for MutexGuarded {}
impl Synchronization for MutexGuarded {}
impl SynchronizationPrivate for MutexGuarded {
    type Guard<'a>
        = MutexGuard<'a, ()>
    where
        Self: 'a;

    type Slots<T: Send> = SharedSlot<T>;

    fn acquire(&self) -> Self::Guard<'_> {
        self.lock.lock().expect(ERR_POISONED_LOCK)
    }
}

/// Synchronization strategy that serializes through an atomic flag spin loop.
///
/// Threads arriving while the flag is taken busy-wait, yielding to the scheduler between
/// attempts. Appropriate when the guarded section is short and contention is rare;
/// prefer [`MutexGuarded`] otherwise, as instance construction time is paid inside the
/// guarded section by every waiting thread.
#[derive(Debug, Default)]
pub struct SpinGuarded {
    taken: AtomicBool,
}

impl SpinGuarded {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            taken: AtomicBool::new(false),
        }
    }
}

impl Sealed for SpinGuarded {}
impl Synchronization for SpinGuarded {}
impl SynchronizationPrivate for SpinGuarded {
    type Guard<'a>
        = SpinGuard<'a>
    where
        Self: 'a;

    type Slots<T: Send> = SharedSlot<T>;

    #[cfg_attr(test, mutants::skip)] // Mutations of the acquisition loop can hang the test suite.
    fn acquire(&self) -> Self::Guard<'_> {
        while self
            .taken
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            thread::yield_now();
        }

        SpinGuard { taken: &self.taken }
    }
}

/// Holds the [`SpinGuarded`] flag until dropped.
#[derive(Debug)]
pub(crate) struct SpinGuard<'a> {
    taken: &'a AtomicBool,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        // Pairs with the Acquire in the acquisition loop.
        self.taken.store(false, Ordering::Release);
    }
}

/// Synchronization strategy that gives every thread its own instance.
///
/// There is no cross-thread serialization to perform because threads never share an
/// instance: each thread's first access constructs an instance published only for that
/// thread, and later accesses on the thread return it.
///
/// Instances are not reclaimed when their thread exits; they remain resident until
/// teardown or until the cell is dropped. Teardown is a cell-wide event that vacates
/// every thread's slot.
///
/// The instance type only needs to be [`Send`], not [`Sync`]: no reference ever crosses
/// a thread boundary, so single-threaded interior mutability such as [`Cell`] works.
#[derive(Debug, Default)]
pub struct PerThread {
    _private: PhantomData<()>,
}

impl PerThread {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _private: PhantomData,
        }
    }
}

impl Sealed for PerThread {}
impl Synchronization for PerThread {}
impl SynchronizationPrivate for PerThread {
    type Guard<'a>
        = ()
    where
        Self: 'a;

    type Slots<T: Send> = ThreadSlots<T>;

    #[inline]
    fn acquire(&self) -> Self::Guard<'_> {}
}
