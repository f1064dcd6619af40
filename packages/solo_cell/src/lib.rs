#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Single-instance coordination with compile-time policies for allocation, lifecycle
//! and synchronization.
//!
//! The entry point is [`SoloCell`], a container that owns at most one instance of its
//! payload type, creates it on first access and hands out `&T` references to it from
//! then on. Instead of baking one set of trade-offs into the container, each concern is
//! a separate policy selected through a type parameter:
//!
//! * **Allocation** decides where the instance lives: [`Boxed`] on the heap (the
//!   default), [`RawBlock`] constructed in place in a raw allocator block, or
//!   [`RefCounted`] behind an `Arc` with explicit retention via
//!   [`SoloCell::share()`].
//! * **Lifecycle** decides what orderly shutdown means for the instance: [`Standard`]
//!   tears it down and refuses further access (the default), [`Immortal`] opts out of
//!   shutdown entirely, and [`Resurrecting`] tears down but recreates on the next
//!   access.
//! * **Synchronization** decides how the concurrent check-and-create sequence is
//!   serialized: [`MutexGuarded`] (the default), [`SpinGuarded`], [`Unsynchronized`]
//!   for single-threaded use, or [`PerThread`] for one instance per accessing thread.
//!
//! The policies are ordinary values implementing ordinary traits, so host code can
//! supply its own [`Allocation`] or [`Lifecycle`] implementation where the provided
//! ones do not fit, e.g. an arena allocator or a lifecycle wired into a richer
//! shutdown framework.
//!
//! # Example
//!
//! ```
//! use std::sync::Mutex;
//!
//! use solo_cell::{ShutdownRegistry, SoloCell};
//!
//! struct RequestLog {
//!     entries: Mutex<Vec<String>>,
//! }
//!
//! let registry = ShutdownRegistry::new();
//!
//! let cell = SoloCell::new(
//!     || RequestLog {
//!         entries: Mutex::new(Vec::new()),
//!     },
//!     &registry,
//! );
//!
//! // The instance is created on first access and shared by every later one.
//! let log = cell.get().unwrap();
//! log.entries.lock().unwrap().push("started".to_string());
//!
//! assert_eq!(cell.get().unwrap().entries.lock().unwrap().len(), 1);
//!
//! // The host runs its shutdown sequence once, at a moment it controls.
//! // SAFETY: No references returned by get() are used past this point.
//! unsafe { registry.shutdown() };
//! ```
//!
//! # Orderly shutdown
//!
//! There is no process-exit hook anywhere in this crate. Cells whose lifecycle
//! participates in shutdown register a [`TeardownTask`] with a [`ShutdownRegistry`] at
//! creation time, and the hosting process decides when, and whether, to call
//! [`ShutdownRegistry::shutdown()`]. Tasks run exactly once, in reverse registration
//! order. Shutdown is `unsafe` because it invalidates references handed out by the
//! registered cells; the host asserts that none are still in use.
//!
//! A cell is torn down at most through the registry it was registered with, through an
//! explicit [`SoloCell::tear_down()`] call, or by dropping the last handle to it.
//! Instances are never silently leaked: even an [`Immortal`] cell releases its instance
//! when the cell itself is dropped, and a host that wants a true process-lifetime
//! instance simply keeps (or leaks) the cell.
//!
//! # Building blocks
//!
//! The placement primitives [`construct_in_place()`] and [`destroy_in_place()`] used by
//! [`RawBlock`] are exported for host code that implements its own [`Allocation`]
//! strategy on top of caller-provided storage.

mod allocation;
mod cell;
mod error;
mod lifecycle;
mod shutdown;
mod slots;
mod synchronization;
mod thread_id_hash;

pub use allocation::*;
pub use cell::*;
pub use error::*;
pub use lifecycle::*;
pub use shutdown::*;
pub use synchronization::*;

/// Implemented by types in this crate to prevent external implementations of the traits
/// that list it as a supertrait.
trait Sealed {}

const ERR_POISONED_LOCK: &str = "encountered poisoned lock - program validity cannot be guaranteed";
