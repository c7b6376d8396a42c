//! Chunk-wise parallel execution across worker threads.
//!
//! Every pipeline stage runs through one of these helpers: the input is
//! partitioned into contiguous chunks of `⌊N/W⌋` items (the last worker
//! takes the remainder), each worker fills a worker-local output buffer and
//! a worker-local log, and the join acts as a barrier before results are
//! concatenated in worker order. No state is shared between workers, so the
//! output order is a stable function of the partitioning.

use std::num::NonZeroUsize;
use std::thread;

/// Values that can be merged pairwise in worker order: per-stage filter
/// logs, substitution-count matrices, mutation-count vectors.
pub trait Accumulate: Default {
    /// Folds `other` into `self`.
    fn accumulate(&mut self, other: Self);
}

/// The number of worker threads used by the pipeline.
#[must_use]
pub fn worker_count() -> usize {
    thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

/// Splits `items` into at most `workers` contiguous chunks, each of
/// `⌊N/W⌋` items with the remainder going to the last chunk.
fn split_into_chunks<T>(mut items: Vec<T>, workers: usize) -> Vec<Vec<T>> {
    let batch = if workers == 0 { 0 } else { items.len() / workers };
    if workers <= 1 || batch == 0 {
        return vec![items];
    }
    let mut chunks = Vec::with_capacity(workers);
    for _ in 0..workers - 1 {
        let tail = items.split_off(batch);
        chunks.push(std::mem::replace(&mut items, tail));
    }
    chunks.push(items);
    chunks
}

/// Applies `f` to every item in place, in parallel.
pub fn parallel_for_each<T, F>(items: &mut [T], f: F)
where
    T: Send,
    F: Fn(&mut T) + Sync,
{
    let workers = worker_count();
    let batch = items.len() / workers;
    if batch == 0 {
        for item in items {
            f(item);
        }
        return;
    }

    let f = &f;
    thread::scope(|scope| {
        let mut rest = items;
        for _ in 0..workers - 1 {
            let taken = std::mem::take(&mut rest);
            let (chunk, tail) = taken.split_at_mut(batch);
            rest = tail;
            scope.spawn(move || {
                for item in chunk {
                    f(item);
                }
            });
        }
        for item in rest {
            f(item);
        }
    });
}

/// Maps `items` through `f` in parallel, preserving order.
pub fn parallel_transform<T, U, F>(items: Vec<T>, f: F) -> Vec<U>
where
    T: Send,
    U: Send,
    F: Fn(T) -> U + Sync,
{
    let chunks = split_into_chunks(items, worker_count());
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| scope.spawn(move || chunk.into_iter().map(f).collect::<Vec<U>>()))
            .collect();

        let mut out = Vec::new();
        for handle in handles {
            out.extend(handle.join().expect("worker thread panicked"));
        }
        out
    })
}

/// Maps `items` through a filtering transform in parallel.
///
/// `f` returns `None` to drop an item, recording why in its worker-local
/// log; the logs are folded into `log` in worker order after the barrier.
pub fn parallel_transform_filter<T, U, L, F>(items: Vec<T>, log: &mut L, f: F) -> Vec<U>
where
    T: Send,
    U: Send,
    L: Accumulate + Send,
    F: Fn(T, &mut L) -> Option<U> + Sync,
{
    let chunks = split_into_chunks(items, worker_count());
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                scope.spawn(move || {
                    let mut local = L::default();
                    let out: Vec<U> =
                        chunk.into_iter().filter_map(|item| f(item, &mut local)).collect();
                    (out, local)
                })
            })
            .collect();

        let mut out = Vec::new();
        for handle in handles {
            let (partial, local) = handle.join().expect("worker thread panicked");
            out.extend(partial);
            log.accumulate(local);
        }
        out
    })
}

/// Reduces `items` in parallel: `f` maps each worker's contiguous range to
/// a partial value, and the partials are folded in worker order.
pub fn parallel_reduce<T, R, F>(items: &[T], f: F) -> R
where
    T: Sync,
    R: Accumulate + Send,
    F: Fn(&[T]) -> R + Sync,
{
    let workers = worker_count();
    let batch = items.len() / workers;
    if batch == 0 {
        let mut acc = R::default();
        acc.accumulate(f(items));
        return acc;
    }

    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                let lo = w * batch;
                let hi = if w == workers - 1 { items.len() } else { lo + batch };
                let slice = &items[lo..hi];
                scope.spawn(move || f(slice))
            })
            .collect();

        let mut acc = R::default();
        for handle in handles {
            acc.accumulate(handle.join().expect("worker thread panicked"));
        }
        acc
    })
}
