//! One instance per accessing thread via the `PerThread` synchronization strategy.
//!
//! The payload uses `Cell`, which is `Send` but not `Sync`. The cell is still freely
//! shared between threads because no instance ever crosses a thread boundary.

use std::cell::Cell;
use std::thread;

use solo_cell::{Boxed, Immortal, PerThread, SoloCell};

struct WorkTally {
    completed: Cell<u64>,
}

fn main() {
    let cell = SoloCell::with_policies(
        || WorkTally {
            completed: Cell::new(0),
        },
        Boxed::new(),
        Immortal::new(),
        PerThread::new(),
    );

    thread::scope(|s| {
        for worker in 0..3_u64 {
            let cell = cell.clone();

            s.spawn(move || {
                // Every access on this thread returns this thread's own tally.
                for _ in 0..=worker {
                    let tally = cell.get().unwrap();

                    tally.completed.set(tally.completed.get().wrapping_add(1));
                }

                let completed = cell.get().unwrap().completed.get();

                println!("worker {worker} completed {completed} item(s)");
            });
        }
    });

    // The main thread never accessed the cell, so it has no instance of its own yet.
    println!("main thread tally: {}", cell.get().unwrap().completed.get());
}
