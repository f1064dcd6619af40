//! A process-wide service accessed through a cell with the default policies: heap
//! storage, mutex-guarded creation and teardown at orderly shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use solo_cell::{ShutdownRegistry, SoloCell};

struct MessageService {
    sent: AtomicUsize,
}

impl MessageService {
    fn send(&self, recipient: &str, body: &str) {
        let sequence = self.sent.fetch_add(1, Ordering::Relaxed);

        println!("[{sequence}] to {recipient}: {body}");
    }
}

fn main() {
    let registry = ShutdownRegistry::new();

    let cell = SoloCell::new(
        || {
            println!("constructing the message service");

            MessageService {
                sent: AtomicUsize::new(0),
            }
        },
        &registry,
    );

    // The factory has not run yet; it runs on whichever thread gets there first.
    thread::scope(|s| {
        for worker in 0..4 {
            let cell = cell.clone();

            s.spawn(move || {
                let service = cell.get().unwrap();

                service.send("ops", &format!("worker {worker} reporting in"));
            });
        }
    });

    let service = cell.get().unwrap();
    service.send("ops", "main thread done");

    println!("messages sent: {}", service.sent.load(Ordering::Relaxed));

    // The host owns the shutdown sequence; nothing happens at process exit otherwise.
    // SAFETY: No references returned by get() are used past this point.
    let torn_down = unsafe { registry.shutdown() };

    println!("shutdown complete, {torn_down} teardown task(s) executed");
}
