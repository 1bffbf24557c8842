//! This module implements the worker pool that fans judge tasks out over a
//! bounded number of OS threads and fans the results back in, preserving
//! task order.
//!
//! Each worker blocks while its sandboxed child executes, so the pool is
//! sized to the available CPU parallelism rather than oversubscribed. All
//! tasks are handed to the pool before any result is collected, and every
//! worker is joined before `dispatch` returns: no worker outlives the call.
//!

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::{Error, ErrorKind, Result};

/// The pool size used when the caller does not override it.
pub(crate) fn default_worker_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// Run `job(0..task_count)` on a pool of `workers` threads and return the
/// results in task order.
///
/// Task order is preserved regardless of completion order. A task's error is
/// re-raised when its result slot is collected, so the first failing slot in
/// task order decides the returned error; the call never returns a partial
/// result vector.
pub(crate) fn dispatch<T, F>(workers: usize, task_count: usize, job: F) -> Result<Vec<T>>
    where T: Send + 'static,
          F: Fn(usize) -> Result<T> + Send + Sync + 'static {
    if workers == 0 {
        return Err(Error::from(ErrorKind::InvalidWorkerCount));
    }
    if task_count == 0 {
        return Ok(Vec::new());
    }

    let job = Arc::new(job);
    let next_task = Arc::new(AtomicUsize::new(0));
    let (result_tx, result_rx) = mpsc::channel::<(usize, Result<T>)>();

    let worker_count = workers.min(task_count);
    log::debug!("Dispatching {} tasks over {} workers", task_count, worker_count);

    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let job = Arc::clone(&job);
        let next_task = Arc::clone(&next_task);
        let result_tx = result_tx.clone();

        let handle = thread::Builder::new()
            .name(format!("judge-worker-{}", worker_id))
            .spawn(move || {
                loop {
                    let task = next_task.fetch_add(1, Ordering::SeqCst);
                    if task >= task_count {
                        break;
                    }
                    let result = job(task);
                    if result_tx.send((task, result)).is_err() {
                        break;
                    }
                }
            })?;
        handles.push(handle);
    }
    drop(result_tx);

    // The channel closes once every worker is done; collection itself
    // imposes no order.
    let mut slots: Vec<Option<Result<T>>> = Vec::with_capacity(task_count);
    slots.resize_with(task_count, || None);
    for (task, result) in result_rx {
        slots[task] = Some(result);
    }

    for (worker_id, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            return Err(Error::from(ErrorKind::WorkerPanicked(worker_id)));
        }
    }

    let mut results = Vec::with_capacity(task_count);
    for slot in slots {
        let result = slot.expect("worker pool lost a result slot");
        results.push(result?);
    }
    Ok(results)
}
