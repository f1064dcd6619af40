//! Reloading shared configuration with a `RefCounted` + `Resurrecting` cell.
//!
//! Teardown invalidates the cell's instance but not the owning handles that host code
//! retained through `share()`, so in-flight work keeps the settings snapshot it started
//! with while later accesses observe a freshly built one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use solo_cell::{MutexGuarded, RefCounted, Resurrecting, ShutdownRegistry, SoloCell};

struct AppSettings {
    revision: u32,
    verbose: bool,
}

fn main() {
    let registry = ShutdownRegistry::new();

    // Stands in for the file or service the settings are loaded from.
    let revision_source = Arc::new(AtomicU32::new(1));

    let factory_source = Arc::clone(&revision_source);
    let cell = SoloCell::with_policies(
        move || AppSettings {
            revision: factory_source.fetch_add(1, Ordering::Relaxed),
            verbose: false,
        },
        RefCounted::new(),
        Resurrecting::new(registry.handle()),
        MutexGuarded::new(),
    );

    let settings = cell.get().unwrap();
    println!(
        "loaded settings: revision {}, verbose {}",
        settings.revision, settings.verbose
    );

    // A long-running operation pins the snapshot it started with.
    let pinned = cell.share().unwrap();

    // Invalidate the cell's instance, e.g. because the settings source changed.
    // SAFETY: `settings` is not used past this point; `pinned` owns its instance
    // instead of borrowing from the cell.
    unsafe { cell.tear_down() };

    let reloaded = cell.get().unwrap();
    println!(
        "reloaded settings: revision {} (pinned operation still sees revision {})",
        reloaded.revision, pinned.revision
    );

    drop(pinned);

    // SAFETY: `reloaded` is not used past this point.
    unsafe { registry.shutdown() };

    println!("shutdown complete");
}
