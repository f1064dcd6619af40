use std::any::type_name;
use std::fmt::{self, Debug, Formatter};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use crate::Result;
use crate::allocation::{Allocation, Boxed, RefCounted};
use crate::lifecycle::{Lifecycle, Standard};
use crate::shutdown::{ShutdownRegistry, TeardownTask};
use crate::slots::SlotStore;
use crate::synchronization::{MutexGuarded, Synchronization};

/// A cell that holds at most one shared instance of `T` and creates it on first access.
///
/// How the cell behaves is determined by three policy axes, each selected at compile
/// time through a type parameter:
///
/// * `A`: [`Allocation`] selects how instance storage is obtained and released
///   ([`Boxed`], [`RawBlock`][crate::RawBlock], [`RefCounted`]);
/// * `L`: [`Lifecycle`] selects what happens at orderly shutdown and when a torn-down
///   cell is accessed again ([`Standard`], [`Immortal`][crate::Immortal],
///   [`Resurrecting`][crate::Resurrecting]);
/// * `S`: [`Synchronization`] selects how the concurrent check-and-create sequence is
///   serialized ([`Unsynchronized`][crate::Unsynchronized], [`MutexGuarded`],
///   [`SpinGuarded`][crate::SpinGuarded], [`PerThread`][crate::PerThread]).
///
/// The defaults combine heap storage, teardown at orderly shutdown and mutex
/// serialization.
///
/// Access follows the double-checked pattern: an unguarded atomic read satisfies every
/// access after the first, and only the creation path takes the synchronization guard
/// and re-checks the slot before constructing. Under [`PerThread`][crate::PerThread]
/// each thread gets its own instance; under every other strategy all threads share one.
///
/// A cell is an explicit value, not a process-wide static. Clones are cheap handles to
/// the same cell state, so a cell can be passed around, stored in host context or shared
/// between components, and each distinct cell value manages its own instance.
///
/// # Reference validity
///
/// References returned by [`get()`][Self::get] stay valid until the cell's instance is
/// next torn down, which only happens inside the `unsafe` teardown entry points
/// ([`tear_down()`][Self::tear_down] and
/// [`ShutdownRegistry::shutdown()`]). Safe code can therefore hold returned references
/// indefinitely; the party invoking teardown asserts that none are alive.
///
/// # Thread safety
///
/// * [`MutexGuarded`] and [`SpinGuarded`][crate::SpinGuarded] cells are [`Send`] and
///   [`Sync`] when `T: Send + Sync`, like any shared container that hands out `&T` and
///   may construct or release the instance from any thread.
/// * [`PerThread`][crate::PerThread] cells are [`Send`] and [`Sync`] when `T: Send`;
///   `T: Sync` is not needed because no reference crosses a thread boundary.
/// * [`Unsynchronized`][crate::Unsynchronized] cells are neither, and are confined to
///   the thread that created them.
///
/// # Example
///
/// ```
/// use solo_cell::{ShutdownRegistry, SoloCell};
///
/// struct MessageService {
///     greeting: String,
/// }
///
/// let registry = ShutdownRegistry::new();
///
/// let cell = SoloCell::new(
///     || MessageService {
///         greeting: "hello".to_string(),
///     },
///     &registry,
/// );
///
/// // Both accesses observe the same instance.
/// let first = cell.get().unwrap();
/// let second = cell.get().unwrap();
/// assert!(std::ptr::eq(first, second));
/// assert_eq!(first.greeting, "hello");
///
/// // SAFETY: The references above are not used past this point.
/// unsafe { registry.shutdown() };
/// ```
pub struct SoloCell<T, A = Boxed, L = Standard, S = MutexGuarded>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    core: Arc<CellCore<T, A, L, S>>,
}

impl<T> SoloCell<T>
where
    T: Send + 'static,
{
    /// Creates a cell with the default policies: [`Boxed`] storage, [`Standard`]
    /// lifecycle registered with `registry`, [`MutexGuarded`] serialization.
    ///
    /// The instance is not constructed yet; `factory` runs on whichever thread first
    /// calls [`get()`][Self::get].
    #[must_use]
    pub fn new<F>(factory: F, registry: &ShutdownRegistry) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_policies(
            factory,
            Boxed::new(),
            Standard::new(registry.handle()),
            MutexGuarded::new(),
        )
    }
}

impl<T, A, L, S> SoloCell<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    /// Creates a cell from explicit policy values.
    ///
    /// The policy values select the policy types, so the type parameters rarely need to
    /// be spelled out. Lifecycles that participate in orderly shutdown register the
    /// cell's teardown here, at creation time; nothing further is registered on access.
    ///
    /// # Example
    ///
    /// ```
    /// use solo_cell::{RawBlock, Resurrecting, ShutdownRegistry, SoloCell, SpinGuarded};
    ///
    /// let registry = ShutdownRegistry::new();
    ///
    /// let cell = SoloCell::with_policies(
    ///     || vec![0_u8; 64],
    ///     RawBlock::new(),
    ///     Resurrecting::new(registry.handle()),
    ///     SpinGuarded::new(),
    /// );
    ///
    /// assert_eq!(cell.get().unwrap().len(), 64);
    /// ```
    #[must_use]
    pub fn with_policies<F>(factory: F, allocation: A, lifecycle: L, sync: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let core = Arc::new(CellCore {
            factory: Box::new(factory),
            allocation,
            alloc_state: <A::State<T>>::default(),
            lifecycle,
            sync,
            slots: <S::Slots<T>>::default(),
        });

        let link = TeardownLink {
            core: Arc::downgrade(&core),
        };

        core.lifecycle.schedule(TeardownTask::new(move || link.tear_down()));

        Self { core }
    }

    /// Returns a reference to the instance, constructing it first if necessary.
    ///
    /// After the first successful call this is a single atomic read (plus a map lookup
    /// under [`PerThread`][crate::PerThread]). The returned reference stays valid until
    /// the cell's instance is next torn down; see the type-level documentation.
    ///
    /// Calling this from within the instance factory is a usage error and is not
    /// defended against: depending on the synchronization strategy it deadlocks,
    /// livelocks or constructs a second instance.
    ///
    /// # Errors
    ///
    /// * [`AccessError::AllocationExhausted`][crate::AccessError::AllocationExhausted]
    ///   if the allocation strategy could not obtain storage. The slot stays empty, so
    ///   a later call retries from a clean state.
    /// * [`AccessError::TornDown`][crate::AccessError::TornDown] if the instance was
    ///   torn down and the lifecycle does not permit recreation.
    ///
    /// # Panics
    ///
    /// Panics if an earlier instance factory panicked while the cell's internal lock was
    /// held, poisoning it.
    #[inline]
    pub fn get(&self) -> Result<&T> {
        let instance = self.core.instance_ptr()?;

        // SAFETY: The pointer was published by this cell and teardown cannot run while
        // the reference is alive, per the teardown contracts.
        Ok(unsafe { instance.as_ref() })
    }

    /// Tears down the instance: destroys it, releases its storage and marks the cell as
    /// torn down. Returns how many instances were released, which under
    /// [`PerThread`][crate::PerThread] can exceed one.
    ///
    /// A cell that never constructed an instance is left untouched and does not count as
    /// torn down. Whether a later [`get()`][Self::get] recreates the instance or fails
    /// is decided by the lifecycle strategy.
    ///
    /// Cells registered with a [`ShutdownRegistry`] have this invoked for them during
    /// [`shutdown()`][ShutdownRegistry::shutdown]; calling it directly is for hosts that
    /// sequence teardown themselves.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no references previously returned by
    /// [`get()`][Self::get] on this cell (any clone of it) are alive or used afterwards,
    /// and that no other thread accesses the cell concurrently with this call.
    pub unsafe fn tear_down(&self) -> usize {
        // SAFETY: Forwarding this function's contract.
        unsafe { self.core.tear_down() }
    }
}

impl<T, L, S> SoloCell<T, RefCounted, L, S>
where
    T: Send + Sync + 'static,
    L: Lifecycle,
    S: Synchronization,
{
    /// Returns an additional owning handle to the current instance, if one is live.
    ///
    /// The handle keeps the instance alive independently of the cell: after a teardown,
    /// retained handles still point at the old, fully valid instance, while the cell
    /// itself reports torn down (and, lifecycle permitting, constructs a fresh instance
    /// on the next access). This is the explicit escape hatch for host code that needs
    /// the instance to outlive cell bookkeeping.
    ///
    /// Requires `T: Sync` because the handle can be sent to, and dereferenced on, other
    /// threads while the cell is still handing out references.
    ///
    /// # Example
    ///
    /// ```
    /// use solo_cell::{Immortal, MutexGuarded, RefCounted, SoloCell};
    ///
    /// let cell = SoloCell::with_policies(
    ///     || String::from("shared"),
    ///     RefCounted::new(),
    ///     Immortal::new(),
    ///     MutexGuarded::new(),
    /// );
    ///
    /// assert!(cell.share().is_none());
    ///
    /// let value = cell.get().unwrap();
    /// let handle = cell.share().unwrap();
    /// assert!(std::ptr::eq(value, handle.as_ref()));
    /// ```
    #[must_use]
    pub fn share(&self) -> Option<Arc<T>> {
        let instance = self.core.slots.published()?;

        self.core.alloc_state.handle_for(instance)
    }
}

impl<T, A, L, S> Clone for SoloCell<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    #[inline]
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T, A, L, S> Debug for SoloCell<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoloCell").field("core", &self.core).finish()
    }
}

/// Shared state of one cell; every handle and the scheduled teardown task point here.
struct CellCore<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    factory: Box<dyn Fn() -> T + Send + Sync>,
    allocation: A,
    alloc_state: A::State<T>,
    lifecycle: L,
    sync: S,
    slots: S::Slots<T>,
}

impl<T, A, L, S> CellCore<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    /// The double-checked access protocol. Returns the published instance pointer,
    /// constructing and publishing an instance if the calling context has none.
    fn instance_ptr(&self) -> Result<NonNull<T>> {
        // Fast path: no guard. The Acquire load pairs with the Release in publish().
        if let Some(existing) = self.slots.published() {
            return Ok(existing);
        }

        let _guard = self.sync.acquire();

        // Another thread may have constructed the instance while we acquired the guard.
        if let Some(existing) = self.slots.published() {
            return Ok(existing);
        }

        if self.slots.is_torn_down() {
            // The guard is released on the error path too, by dropping.
            self.lifecycle.on_dead_access()?;

            self.slots.clear_torn_down();
        }

        let instance = A::allocate(&self.alloc_state, &*self.factory)?;

        self.slots.publish(instance);

        Ok(instance)
    }

    /// Vacates every slot, releases the instances and sets the torn-down marker.
    ///
    /// # Safety
    ///
    /// No references into the released instances may be alive, and no other thread may
    /// access the cell concurrently with this call.
    unsafe fn tear_down(&self) -> usize {
        let _guard = self.sync.acquire();

        let vacated = self.slots.vacate_all();

        // A cell that never held an instance must not start reporting itself dead.
        if !vacated.is_empty() {
            self.slots.set_torn_down();
        }

        let released = vacated.len();

        for instance in vacated {
            // SAFETY: The pointer was produced by A::allocate on this state and is
            // unreferenced per this function's contract.
            unsafe { A::deallocate(&self.alloc_state, instance) };
        }

        released
    }
}

impl<T, A, L, S> Drop for CellCore<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    fn drop(&mut self) {
        for instance in self.slots.vacate_all() {
            // SAFETY: The last handle to the cell is gone, which also means no
            // references remain: every reference borrowed from a handle.
            unsafe { A::deallocate(&self.alloc_state, instance) };
        }
    }
}

impl<T, A, L, S> Debug for CellCore<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellCore")
            .field(
                "factory",
                &format_args!("Box<dyn Fn() -> {}>", type_name::<T>()),
            )
            .field("allocation", &self.allocation)
            .field("alloc_state", &self.alloc_state)
            .field("lifecycle", &self.lifecycle)
            .field("sync", &self.sync)
            .field("slots", &self.slots)
            .finish()
    }
}

/// What a scheduled teardown task holds instead of a cell handle, so that a registry
/// never keeps an abandoned cell alive.
struct TeardownLink<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    core: Weak<CellCore<T, A, L, S>>,
}

impl<T, A, L, S> TeardownLink<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
    fn tear_down(self) {
        if let Some(core) = self.core.upgrade() {
            // SAFETY: Teardown tasks only execute inside ShutdownRegistry::shutdown(),
            // whose contract guarantees that no references are alive and that no thread
            // accesses the cell concurrently.
            _ = unsafe { core.tear_down() };
        }
    }
}

// SAFETY: CellCore is Send for every policy combination: its factory, policy values,
// allocation state and slot store are all Send by their trait bounds, and the instances
// owned through the slots are `T: Send`. `Weak<CellCore>` would additionally demand
// `CellCore: Sync` because upgrading on another thread can normally create shared
// access; here it cannot. The link is upgraded in exactly one place, a teardown task run
// by `ShutdownRegistry::shutdown()`, whose contract gives that thread exclusive access
// to the cell for the duration. Cross-thread exclusive access to Send data is equivalent
// to having moved it, so no `Sync` is required. (For every strategy except
// `Unsynchronized` the core is `Sync` anyway and this impl adds nothing.)
unsafe impl<T, A, L, S> Send for TeardownLink<T, A, L, S>
where
    T: Send + 'static,
    A: Allocation,
    L: Lifecycle,
    S: Synchronization,
{
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{
        AccessError, Immortal, PerThread, RawBlock, Resurrecting, SpinGuarded, Unsynchronized,
    };

    /// Counts constructions and destructions through shared atomic counters.
    struct Tracked {
        dropped: Arc<AtomicUsize>,
    }

    impl Tracked {
        fn factory(
            constructed: &Arc<AtomicUsize>,
            dropped: &Arc<AtomicUsize>,
        ) -> impl Fn() -> Self + Send + Sync + use<> {
            let constructed = Arc::clone(constructed);
            let dropped = Arc::clone(dropped);

            move || {
                constructed.fetch_add(1, Ordering::SeqCst);

                Self {
                    dropped: Arc::clone(&dropped),
                }
            }
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)))
    }

    /// A payload with single-threaded interior mutability; Send but not Sync.
    struct LocalTally {
        count: Cell<usize>,
    }

    assert_impl_all!(SoloCell<usize>: Send, Sync);
    assert_impl_all!(SoloCell<LocalTally, Boxed, Immortal, PerThread>: Send, Sync);
    assert_not_impl_any!(SoloCell<usize, Boxed, Standard, Unsynchronized>: Send, Sync);
    assert_not_impl_any!(SoloCell<LocalTally>: Sync);

    #[test]
    fn every_access_observes_the_same_instance() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::new(Tracked::factory(&constructed, &dropped), &registry);

        let first = cell.get().unwrap();
        let second = cell.get().unwrap();

        assert!(ptr::eq(first, second));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clones_are_handles_to_the_same_cell() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::new(Tracked::factory(&constructed, &dropped), &registry);
        let clone = cell.clone();

        assert!(ptr::eq(cell.get().unwrap(), clone.get().unwrap()));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn contended_first_access_constructs_exactly_once_under_mutex() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::new(Tracked::factory(&constructed, &dropped), &registry);
        let barrier = Barrier::new(8);
        let addresses = Mutex::new(HashSet::new());

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();

                    let instance = cell.get().unwrap();

                    addresses.lock().unwrap().insert(ptr::from_ref(instance).addr());
                });
            }
        });

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(addresses.lock().unwrap().len(), 1);
    }

    #[test]
    fn contended_first_access_constructs_exactly_once_under_spin() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::with_policies(
            Tracked::factory(&constructed, &dropped),
            Boxed::new(),
            Standard::new(registry.handle()),
            SpinGuarded::new(),
        );
        let barrier = Barrier::new(8);
        let addresses = Mutex::new(HashSet::new());

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();

                    let instance = cell.get().unwrap();

                    addresses.lock().unwrap().insert(ptr::from_ref(instance).addr());
                });
            }
        });

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(addresses.lock().unwrap().len(), 1);
    }

    #[test]
    fn per_thread_cells_construct_one_instance_per_thread() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let constructed_clone = Arc::clone(&constructed);

        let cell = SoloCell::with_policies(
            move || {
                constructed_clone.fetch_add(1, Ordering::SeqCst);

                LocalTally {
                    count: Cell::new(0),
                }
            },
            Boxed::new(),
            Immortal::new(),
            PerThread::new(),
        );

        let addresses = Mutex::new(HashSet::new());

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let first = cell.get().unwrap();
                    first.count.set(first.count.get().wrapping_add(1));

                    // Repeated access on the same thread returns the same instance.
                    let second = cell.get().unwrap();
                    second.count.set(second.count.get().wrapping_add(1));

                    assert!(ptr::eq(first, second));
                    assert_eq!(second.count.get(), 2);

                    addresses.lock().unwrap().insert(ptr::from_ref(second).addr());
                });
            }
        });

        assert_eq!(constructed.load(Ordering::SeqCst), 4);
        assert_eq!(addresses.lock().unwrap().len(), 4);
    }

    #[test]
    fn standard_cell_stays_dead_after_teardown() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::new(Tracked::factory(&constructed, &dropped), &registry);

        assert!(cell.get().is_ok());

        // SAFETY: The reference from get() above is not retained.
        let released = unsafe { cell.tear_down() };
        assert_eq!(released, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        assert!(matches!(cell.get(), Err(AccessError::TornDown)));
        // The verdict is permanent for this lifecycle.
        assert!(matches!(cell.get(), Err(AccessError::TornDown)));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resurrecting_cell_recreates_after_teardown() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::with_policies(
            Tracked::factory(&constructed, &dropped),
            Boxed::new(),
            Resurrecting::new(registry.handle()),
            MutexGuarded::new(),
        );

        assert!(cell.get().is_ok());

        // SAFETY: The reference from get() above is not retained.
        _ = unsafe { cell.tear_down() };

        assert!(cell.get().is_ok());
        assert_eq!(constructed.load(Ordering::SeqCst), 2);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn immortal_cell_survives_registry_shutdown() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::with_policies(
            Tracked::factory(&constructed, &dropped),
            Boxed::new(),
            Immortal::new(),
            MutexGuarded::new(),
        );

        let before = ptr::from_ref(cell.get().unwrap()).addr();

        // Nothing was registered, so shutdown has nothing to run.
        // SAFETY: No cell registered with this registry.
        let executed = unsafe { registry.shutdown() };
        assert_eq!(executed, 0);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        let after = ptr::from_ref(cell.get().unwrap()).addr();
        assert_eq!(before, after);
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        // The instance is still released when the cell itself goes away.
        drop(cell);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registry_shutdown_tears_down_registered_cell() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::new(Tracked::factory(&constructed, &dropped), &registry);

        assert!(cell.get().is_ok());
        assert_eq!(registry.pending(), 1);

        // SAFETY: The reference from get() above is not retained.
        let executed = unsafe { registry.shutdown() };

        assert_eq!(executed, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert!(matches!(cell.get(), Err(AccessError::TornDown)));
    }

    #[test]
    fn never_created_cell_is_not_torn_down() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::new(Tracked::factory(&constructed, &dropped), &registry);

        // SAFETY: No references exist; nothing was ever created.
        let released = unsafe { cell.tear_down() };
        assert_eq!(released, 0);

        // The cell never held an instance, so it does not report itself dead.
        assert!(cell.get().is_ok());
        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn per_thread_teardown_releases_every_thread_instance() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::with_policies(
            Tracked::factory(&constructed, &dropped),
            Boxed::new(),
            Standard::new(registry.handle()),
            PerThread::new(),
        );

        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    assert!(cell.get().is_ok());
                });
            }
        });

        assert_eq!(constructed.load(Ordering::SeqCst), 3);

        // SAFETY: The accessing threads have exited; no references remain.
        let released = unsafe { cell.tear_down() };

        assert_eq!(released, 3);
        assert_eq!(dropped.load(Ordering::SeqCst), 3);

        // Teardown was cell-wide: this thread never had an instance, yet the
        // cell is dead for it too.
        assert!(matches!(cell.get(), Err(AccessError::TornDown)));
    }

    #[test]
    fn dropping_the_cell_releases_the_instance() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::new(Tracked::factory(&constructed, &dropped), &registry);

        assert!(cell.get().is_ok());

        drop(cell);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        // The scheduled task outlives the cell but finds nothing to do.
        // SAFETY: The cell is gone; no references exist.
        let executed = unsafe { registry.shutdown() };
        assert_eq!(executed, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsynchronized_cell_works_on_a_single_thread() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::with_policies(
            Tracked::factory(&constructed, &dropped),
            Boxed::new(),
            Standard::new(registry.handle()),
            Unsynchronized::new(),
        );

        assert!(ptr::eq(cell.get().unwrap(), cell.get().unwrap()));
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        // Teardown still reaches the pinned cell through the registry.
        // SAFETY: The references above are not retained.
        let executed = unsafe { registry.shutdown() };
        assert_eq!(executed, 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert!(matches!(cell.get(), Err(AccessError::TornDown)));
    }

    /// Fails the first allocation attempt, then delegates to plain boxing.
    #[derive(Debug)]
    struct FlakyAlloc;

    #[derive(Debug, Default)]
    struct FlakyState {
        attempts: AtomicUsize,
    }

    impl Allocation for FlakyAlloc {
        type State<T: Send> = FlakyState;

        fn allocate<T: Send>(
            state: &FlakyState,
            factory: &dyn Fn() -> T,
        ) -> crate::Result<NonNull<T>> {
            if state.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(AccessError::AllocationExhausted {
                    size: size_of::<T>(),
                });
            }

            Ok(NonNull::from(Box::leak(Box::new(factory()))))
        }

        unsafe fn deallocate<T: Send>(_state: &FlakyState, instance: NonNull<T>) {
            // SAFETY: The pointer came from Box::leak in allocate().
            drop(unsafe { Box::from_raw(instance.as_ptr()) });
        }
    }

    #[test]
    fn allocation_failure_leaves_a_clean_slot_for_retry() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::with_policies(
            Tracked::factory(&constructed, &dropped),
            FlakyAlloc,
            Standard::new(registry.handle()),
            MutexGuarded::new(),
        );

        assert!(matches!(
            cell.get(),
            Err(AccessError::AllocationExhausted { .. })
        ));
        assert_eq!(constructed.load(Ordering::SeqCst), 0);

        // The failure released the guard and published nothing: this attempt
        // starts from a clean slot and succeeds.
        assert!(cell.get().is_ok());
        assert_eq!(constructed.load(Ordering::SeqCst), 1);

        // SAFETY: The references above are not retained.
        _ = unsafe { registry.shutdown() };
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shared_handles_keep_the_old_instance_across_teardown() {
        let registry = ShutdownRegistry::new();
        let (constructed, dropped) = counters();

        let cell = SoloCell::with_policies(
            Tracked::factory(&constructed, &dropped),
            RefCounted::new(),
            Resurrecting::new(registry.handle()),
            MutexGuarded::new(),
        );

        assert!(cell.share().is_none());

        let instance = cell.get().unwrap();
        let handle = cell.share().unwrap();
        assert!(ptr::eq(instance, handle.as_ref()));

        // SAFETY: `instance` is not used past this point; `handle` owns, not borrows.
        _ = unsafe { cell.tear_down() };

        // The retained handle kept the old instance alive through teardown.
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        // The cell itself starts over.
        assert!(cell.get().is_ok());
        assert_eq!(constructed.load(Ordering::SeqCst), 2);

        drop(handle);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);

        drop(cell);
        assert_eq!(dropped.load(Ordering::SeqCst), 2);

        // The cell dropped before the registry ran its task; nothing is left to do.
        // SAFETY: No references exist.
        _ = unsafe { registry.shutdown() };
    }

    #[test]
    fn raw_block_cell_supports_zero_sized_payloads() {
        struct Flag;

        let registry = ShutdownRegistry::new();

        let cell = SoloCell::with_policies(
            || Flag,
            RawBlock::new(),
            Standard::new(registry.handle()),
            MutexGuarded::new(),
        );

        assert!(cell.get().is_ok());

        // SAFETY: The reference above is not retained.
        let released = unsafe { cell.tear_down() };
        assert_eq!(released, 1);
    }
}
