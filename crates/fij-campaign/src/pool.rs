//! Bounded worker-thread pool for running campaign iterations in
//! parallel over a fixed worker pool, the `std::thread` stand-in for the
//! original's `#pragma omp parallel for num_threads(...)`. The workspace
//! has no OpenMP equivalent to reach for, so this is grounded on
//! `fij-engine`'s own worker model (plain `JoinHandle`s pulling from a
//! shared queue) rather than importing a new concurrency crate for a
//! single call site.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread,
};

/// Runs `f` once per item in `items`, using at most `workers` concurrent
/// threads, and returns the results in the same order as `items`.
pub fn for_each_bounded<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    let workers = workers.max(1).min(items.len().max(1));
    let queue: VecDeque<(usize, T)> = items.into_iter().enumerate().collect();
    let total = queue.len();
    let queue = Arc::new(Mutex::new(queue));
    let results: Arc<Mutex<Vec<Option<R>>>> = Arc::new(Mutex::new((0..total).map(|_| None).collect()));
    let f = Arc::new(f);

    thread::scope(|scope| {
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let f = Arc::clone(&f);
            scope.spawn(move || loop {
                let next = queue.lock().unwrap().pop_front();
                let Some((idx, item)) = next else {
                    break;
                };
                let result = f(item);
                results.lock().unwrap()[idx] = Some(result);
            });
        }
    });

    Arc::try_unwrap(results)
        .unwrap()
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|r| r.expect("every queued index is written exactly once"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn preserves_input_order() {
        let items: Vec<usize> = (0..50).collect();
        let results = for_each_bounded(items.clone(), 4, |x| x * 2);
        let expected: Vec<usize> = items.iter().map(|x| x * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn uses_at_most_the_requested_worker_count() {
        let seen = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<usize> = (0..20).collect();
        for_each_bounded(items, 3, {
            let seen = Arc::clone(&seen);
            let peak = Arc::clone(&peak);
            move |_| {
                let cur = seen.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(cur, Ordering::SeqCst);
                thread::sleep(std::time::Duration::from_millis(2));
                seen.fetch_sub(1, Ordering::SeqCst);
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
