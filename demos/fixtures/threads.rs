// All-threads fixture: spawns four worker threads that each spin on
// their own counter, so a policy targeting `all_threads` has more than
// one live thread to enumerate and flip.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};

fn main() {
    let counters: Vec<_> = (0..4).map(|_| AtomicU64::new(0)).collect();
    thread::scope(|scope| {
        for counter in &counters {
            scope.spawn(move || {
                let deadline = std::time::Instant::now() + Duration::from_secs(2);
                while std::time::Instant::now() < deadline {
                    counter.fetch_add(1, Ordering::Relaxed);
                    thread::yield_now();
                }
            });
        }
    });
    for counter in &counters {
        println!("{}", counter.load(Ordering::Relaxed));
    }
}
