use std::alloc::{self, Layout};
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex};

use crate::{AccessError, ERR_POISONED_LOCK, Result};

/// Constructs a value of type `T` in caller-provided storage.
///
/// This is the placement half of the manual-memory allocation strategy, exposed directly
/// so that host code building its own [`Allocation`] implementations can reuse it.
///
/// # Safety
///
/// The caller must guarantee that:
///
/// * `storage` is valid for writes of `T` and satisfies the alignment of `T`;
/// * the storage outlives the constructed instance;
/// * the instance is eventually destroyed exactly once, e.g. via
///   [`destroy_in_place()`], before the storage is released.
#[inline]
pub unsafe fn construct_in_place<T>(storage: NonNull<T>, value: T) {
    // SAFETY: Validity and alignment of the target are guaranteed by the caller.
    unsafe { storage.as_ptr().write(value) };
}

/// Destroys a value previously constructed in caller-provided storage.
///
/// Runs the destructor of `T` without releasing the storage itself.
///
/// # Safety
///
/// The caller must guarantee that:
///
/// * `storage` holds a live instance of `T` constructed via [`construct_in_place()`]
///   or equivalent means;
/// * the instance is not used, and not destroyed again, after this call;
/// * no references to the instance are alive when this is called.
#[inline]
pub unsafe fn destroy_in_place<T>(storage: NonNull<T>) {
    // SAFETY: The caller guarantees a live, uniquely referenced instance.
    unsafe { storage.as_ptr().drop_in_place() };
}

/// Defines how a cell obtains and releases the storage of its instance.
///
/// An allocation strategy is selected as a type parameter of
/// [`SoloCell`][crate::SoloCell], so the choice is resolved at compile time. The provided
/// strategies are [`Boxed`], [`RawBlock`] and [`RefCounted`]. The trait is open: host
/// code can plug in its own storage source, e.g. an arena or a failing allocator used in
/// tests.
///
/// Implementations are type-level: all state a strategy needs lives in
/// [`State`][Self::State], one value of which is owned by each cell.
pub trait Allocation: Debug + Send + 'static {
    /// Per-cell state of the strategy, default-initialized when the cell is created.
    type State<T: Send>: Debug + Default + Send;

    /// Obtains storage for one instance and constructs the instance in it by invoking
    /// `factory`.
    ///
    /// Returns a pointer to the constructed instance, or
    /// [`AccessError::AllocationExhausted`] if storage could not be obtained. On error,
    /// no instance exists and no storage is retained, so the operation can be retried.
    fn allocate<T: Send>(state: &Self::State<T>, factory: &dyn Fn() -> T) -> Result<NonNull<T>>;

    /// Destroys the instance and releases its storage.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `instance` was returned by
    /// [`allocate()`][Self::allocate] on the same `state`, has not been deallocated
    /// before, and that no references to it are alive.
    unsafe fn deallocate<T: Send>(state: &Self::State<T>, instance: NonNull<T>);
}

/// Allocation strategy that stores the instance on the heap via `Box`.
///
/// This is the default strategy of [`SoloCell`][crate::SoloCell]. Allocation failure
/// aborts the process, as with any other `Box`; the strategy itself never reports
/// [`AccessError::AllocationExhausted`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Boxed {
    _private: PhantomData<()>,
}

impl Boxed {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _private: PhantomData,
        }
    }
}

impl Allocation for Boxed {
    type State<T: Send> = ();

    fn allocate<T: Send>(_state: &(), factory: &dyn Fn() -> T) -> Result<NonNull<T>> {
        Ok(NonNull::from(Box::leak(Box::new(factory()))))
    }

    unsafe fn deallocate<T: Send>(_state: &(), instance: NonNull<T>) {
        // SAFETY: The pointer came from Box::leak in allocate() and ownership
        // returns to the Box here, per this function's contract.
        drop(unsafe { Box::from_raw(instance.as_ptr()) });
    }
}

/// Allocation strategy that requests a raw block from the global allocator and constructs
/// the instance in place.
///
/// Unlike [`Boxed`], an exhausted allocator surfaces as
/// [`AccessError::AllocationExhausted`] instead of aborting the process. The slot remains
/// empty after the error, so a later access attempt retries the allocation.
///
/// Zero-sized instance types bypass the allocator entirely; construction and destruction
/// still run.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawBlock {
    _private: PhantomData<()>,
}

impl RawBlock {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _private: PhantomData,
        }
    }
}

impl Allocation for RawBlock {
    type State<T: Send> = ();

    fn allocate<T: Send>(_state: &(), factory: &dyn Fn() -> T) -> Result<NonNull<T>> {
        let layout = Layout::new::<T>();

        let size = layout.size();

        let storage = if size == 0 {
            NonNull::dangling()
        } else {
            // SAFETY: The layout has nonzero size, as checked above.
            let block = unsafe { alloc::alloc(layout) };

            NonNull::new(block.cast::<T>()).ok_or(AccessError::AllocationExhausted { size })?
        };

        // SAFETY: The storage is freshly obtained, aligned for T and unaliased. For
        // zero-sized T, a dangling aligned pointer is valid for writes.
        unsafe { construct_in_place(storage, factory()) };

        Ok(storage)
    }

    unsafe fn deallocate<T: Send>(_state: &(), instance: NonNull<T>) {
        // SAFETY: allocate() constructed an instance here and the caller guarantees
        // it is live and unreferenced.
        unsafe { destroy_in_place(instance) };

        let layout = Layout::new::<T>();

        if layout.size() != 0 {
            // SAFETY: The block was obtained from the global allocator with this
            // exact layout in allocate().
            unsafe { alloc::dealloc(instance.as_ptr().cast::<u8>(), layout) };
        }
    }
}

/// Allocation strategy that stores the instance behind an `Arc`.
///
/// The cell keeps one owning handle per live instance in its [`ArcLedger`]. Teardown
/// releases only that owning handle: if host code retained additional handles through
/// [`SoloCell::share()`][crate::SoloCell::share], the instance stays alive until the last
/// handle is dropped, even though the cell already considers it torn down. This makes
/// external retention explicit and safe, at the cost of the instance potentially
/// outliving its cell bookkeeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefCounted {
    _private: PhantomData<()>,
}

impl RefCounted {
    /// Creates the policy value used to select this strategy at cell creation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _private: PhantomData,
        }
    }
}

impl Allocation for RefCounted {
    type State<T: Send> = ArcLedger<T>;

    fn allocate<T: Send>(state: &ArcLedger<T>, factory: &dyn Fn() -> T) -> Result<NonNull<T>> {
        let handle = Arc::new(factory());

        let instance = NonNull::from(handle.as_ref());

        state.adopt(handle);

        Ok(instance)
    }

    unsafe fn deallocate<T: Send>(state: &ArcLedger<T>, instance: NonNull<T>) {
        // Dropping outside the ledger lock, as the instance destructor is arbitrary code.
        drop(state.release(instance));
    }
}

/// Owning `Arc` handles of the instances a [`RefCounted`] cell currently considers live.
///
/// One entry per live instance; under the per-thread synchronization strategy there is
/// one entry per thread that has created its instance.
pub struct ArcLedger<T: Send> {
    handles: Mutex<Vec<Arc<T>>>,
}

impl<T: Send> ArcLedger<T> {
    pub(crate) fn adopt(&self, handle: Arc<T>) {
        self.handles.lock().expect(ERR_POISONED_LOCK).push(handle);
    }

    /// Removes and returns the owning handle of `instance`, if the ledger holds one.
    pub(crate) fn release(&self, instance: NonNull<T>) -> Option<Arc<T>> {
        let mut handles = self.handles.lock().expect(ERR_POISONED_LOCK);

        let index = handles
            .iter()
            .position(|handle| ptr::eq(Arc::as_ptr(handle), instance.as_ptr()));

        index.map(|index| handles.swap_remove(index))
    }

    /// Returns an additional handle to `instance`, if the ledger holds its owning handle.
    pub(crate) fn handle_for(&self, instance: NonNull<T>) -> Option<Arc<T>> {
        let handles = self.handles.lock().expect(ERR_POISONED_LOCK);

        handles
            .iter()
            .find(|handle| ptr::eq(Arc::as_ptr(handle), instance.as_ptr()))
            .map(Arc::clone)
    }
}

impl<T: Send> Default for ArcLedger<T> {
    fn default() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Send> Debug for ArcLedger<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcLedger")
            .field("live", &self.handles.lock().expect(ERR_POISONED_LOCK).len())
            .finish_non_exhaustive()
    }
}

// SAFETY: The ledger's handles are only ever dropped or compared by address from foreign
// threads; both reference-count updates and the final drop of a `T` require only `T: Send`.
// The reference counts themselves are atomic. Additional handles escape the ledger solely
// through `SoloCell::share()`, which separately requires `T: Sync` because it enables
// shared access from multiple threads. Without `share()`, the ledger is the sole owner and
// moving or locking it across threads moves nothing but that ownership.
unsafe impl<T: Send> Send for ArcLedger<T> {}
// SAFETY: All access to the handle list is serialized by the internal mutex; see the
// `Send` rationale above for why handle operations themselves are thread-safe.
unsafe impl<T: Send> Sync for ArcLedger<T> {}
