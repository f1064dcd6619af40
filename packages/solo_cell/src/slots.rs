use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::thread::{self, ThreadId};

use crate::ERR_POISONED_LOCK;
use crate::thread_id_hash::BuildThreadIdHasher;

/// Residency of published instance pointers, together with the torn-down marker.
///
/// A synchronization strategy selects the slot store of its cells: the shared strategies
/// use a single [`SharedSlot`], the per-thread strategy keeps one slot per thread in
/// [`ThreadSlots`].
///
/// Publication discipline: [`publish()`][Self::publish] and
/// [`vacate_all()`][Self::vacate_all] are only called while holding the cell's guard or
/// with otherwise exclusive access; [`published()`][Self::published] is also called
/// unguarded on the access fast path and must therefore synchronize on its own.
pub(crate) trait SlotStore<T: Send>: Debug + Default + Send {
    /// Pointer published for the calling context, if any.
    fn published(&self) -> Option<NonNull<T>>;

    /// Publishes the pointer of a newly constructed instance for the calling context.
    fn publish(&self, instance: NonNull<T>);

    /// Clears every published slot and returns the pointers that were resident.
    fn vacate_all(&self) -> Vec<NonNull<T>>;

    fn is_torn_down(&self) -> bool;

    fn set_torn_down(&self);

    fn clear_torn_down(&self);
}

/// One publication slot shared by all threads that use the cell.
pub(crate) struct SharedSlot<T> {
    /// Null when empty. Stores with `Release` pair with the `Acquire` load in
    /// `published()`, so a non-null load observes a fully constructed instance.
    instance: AtomicPtr<T>,

    torn_down: AtomicBool,

    /// The slot owns the instance behind the pointer between publish and vacate.
    _owned: PhantomData<T>,
}

impl<T: Send> SlotStore<T> for SharedSlot<T> {
    #[inline]
    fn published(&self) -> Option<NonNull<T>> {
        NonNull::new(self.instance.load(Ordering::Acquire))
    }

    #[inline]
    fn publish(&self, instance: NonNull<T>) {
        self.instance.store(instance.as_ptr(), Ordering::Release);
    }

    fn vacate_all(&self) -> Vec<NonNull<T>> {
        let previous = self.instance.swap(ptr::null_mut(), Ordering::AcqRel);

        NonNull::new(previous).map_or_else(Vec::new, |instance| vec![instance])
    }

    #[inline]
    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn set_torn_down(&self) {
        self.torn_down.store(true, Ordering::Release);
    }

    fn clear_torn_down(&self) {
        self.torn_down.store(false, Ordering::Release);
    }
}

impl<T> Default for SharedSlot<T> {
    fn default() -> Self {
        Self {
            instance: AtomicPtr::new(ptr::null_mut()),
            torn_down: AtomicBool::new(false),
            _owned: PhantomData,
        }
    }
}

impl<T> Debug for SharedSlot<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSlot")
            .field("instance", &self.instance.load(Ordering::Acquire))
            .field("torn_down", &self.torn_down.load(Ordering::Acquire))
            .finish()
    }
}

// SAFETY: The slot owns the single published instance; moving the slot to another thread
// moves that ownership, which `T: Send` permits. The pointer word itself is managed
// atomically.
unsafe impl<T: Send> Send for SharedSlot<T> {}
// SAFETY: A shared slot hands out `&T` to every thread that can reach the cell, which
// requires `T: Sync`. Any of those threads may also construct the instance or release it
// during teardown, transferring ownership across threads, which requires `T: Send`. These
// are the same requirements `std::sync::OnceLock` imposes for the same reasons.
unsafe impl<T: Send + Sync> Sync for SharedSlot<T> {}

/// One publication slot per thread, keyed by thread id.
///
/// Entries are created on each thread's first access and stay resident until teardown or
/// cell drop; a thread exiting does not reclaim its slot. The torn-down marker is a
/// cell-wide property because teardown is a cell-wide event, even though the instances
/// are per-thread.
pub(crate) struct ThreadSlots<T> {
    /// Values are only dereferenced by the thread matching their key. The write lock is
    /// held only to insert a thread's first slot and to vacate during teardown.
    map: RwLock<HashMap<ThreadId, NonNull<T>, BuildThreadIdHasher>>,

    torn_down: AtomicBool,
}

impl<T: Send> SlotStore<T> for ThreadSlots<T> {
    fn published(&self) -> Option<NonNull<T>> {
        let map = self.map.read().expect(ERR_POISONED_LOCK);

        map.get(&thread::current().id()).copied()
    }

    fn publish(&self, instance: NonNull<T>) {
        let mut map = self.map.write().expect(ERR_POISONED_LOCK);

        _ = map.insert(thread::current().id(), instance);
    }

    fn vacate_all(&self) -> Vec<NonNull<T>> {
        let mut map = self.map.write().expect(ERR_POISONED_LOCK);

        map.drain().map(|(_, instance)| instance).collect()
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn set_torn_down(&self) {
        self.torn_down.store(true, Ordering::Release);
    }

    fn clear_torn_down(&self) {
        self.torn_down.store(false, Ordering::Release);
    }
}

impl<T> Default for ThreadSlots<T> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::with_hasher(BuildThreadIdHasher)),
            torn_down: AtomicBool::new(false),
        }
    }
}

impl<T> Debug for ThreadSlots<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSlots")
            .field("threads", &self.map.read().expect(ERR_POISONED_LOCK).len())
            .field("torn_down", &self.torn_down.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

// SAFETY: Map entries hold plain pointer values. Moving the store (or resizing the map
// from any thread) moves pointer values without touching the instances behind them.
// Instances themselves cross threads in exactly one direction: teardown or drop may
// release an instance created by another thread, which requires `T: Send`.
unsafe impl<T: Send> Send for ThreadSlots<T> {}
// SAFETY: Shared access from multiple threads dereferences only the entry keyed by the
// calling thread's id, so no `&T` is ever shared across threads and `T: Sync` is not
// required. Cross-thread instance release is covered by `T: Send` as above; map
// bookkeeping is serialized by the lock.
unsafe impl<T: Send> Sync for ThreadSlots<T> {}
