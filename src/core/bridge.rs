//! Synchronous calls over a dedicated servicing thread
//!
//! A [`Worker`] owns some state on its own thread and runs jobs against it in
//! arrival order. [`Worker::call`] sends a job and parks the calling thread on
//! a one-shot completion channel until the job has run, so the caller never
//! observes control return before the operation has definitively completed
//! or failed.
//!
//! The servicing thread must never be the thread that waits: a job that
//! calls back into its own worker would block forever on a reply only it can
//! produce. Such calls are refused with an I/O error instead.

use crate::error::{Result, VfsError};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error};

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run(Job<S>),
    Shutdown,
}

/// Dedicated thread servicing jobs against owned state `S`
pub struct Worker<S: Send + 'static> {
    name: String,
    tx: Sender<Message<S>>,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> Worker<S> {
    /// Move `state` onto a new thread called `name`
    pub fn spawn(name: &str, state: S) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || serve(state, rx))
            .map_err(|e| VfsError::io(crate::error::IoOp::Transport, e))?;

        debug!(worker = name, "servicing thread started");
        Ok(Worker {
            name: name.to_string(),
            tx,
            thread_id: thread.thread().id(),
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `f` on the servicing thread and wait for its result
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if thread::current().id() == self.thread_id {
            return Err(VfsError::io(
                crate::error::IoOp::Transport,
                std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    format!("re-entrant call on {}", self.name),
                ),
            ));
        }

        let (done_tx, done_rx) = channel::bounded(1);
        let job: Job<S> = Box::new(move |state| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(state)));
            let _ = done_tx.send(outcome.ok());
        });

        self.tx
            .send(Message::Run(job))
            .map_err(|_| VfsError::disconnected(&self.name))?;
        match done_rx.recv() {
            Ok(Some(value)) => Ok(value),
            Ok(None) => {
                error!(worker = %self.name, "job panicked on servicing thread");
                Err(VfsError::job_panicked(&self.name))
            }
            Err(_) => Err(VfsError::disconnected(&self.name)),
        }
    }

    /// Stop accepting jobs and join the servicing thread
    ///
    /// Jobs queued before the shutdown still run.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        let _ = self.tx.send(Message::Shutdown);
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!(worker = %self.name, "servicing thread panicked");
        }
        debug!(worker = %self.name, "servicing thread stopped");
    }
}

impl<S: Send + 'static> Drop for Worker<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve<S>(mut state: S, rx: Receiver<Message<S>>) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(job) => job(&mut state),
            Message::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_calls_run_in_order() {
        let worker = Worker::spawn("test-order", Vec::new()).unwrap();
        for i in 0..100 {
            worker.call(move |v: &mut Vec<i32>| v.push(i)).unwrap();
        }
        let seen = worker.call(|v: &mut Vec<i32>| v.clone()).unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_calls_from_many_threads() {
        let worker = Arc::new(Worker::spawn("test-many", 0u64).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let w = Arc::clone(&worker);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        w.call(|n: &mut u64| *n += 1).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(worker.call(|n: &mut u64| *n).unwrap(), 2000);
    }

    #[test]
    fn test_panicking_job_reports_error_and_worker_survives() {
        let worker = Worker::spawn("test-panic", 1u8).unwrap();
        let result: Result<()> = worker.call(|_: &mut u8| panic!("boom"));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("job panicked on test-panic"), "{}", err);
        assert_eq!(worker.call(|n: &mut u8| *n).unwrap(), 1);
    }

    #[test]
    fn test_call_after_shutdown_fails() {
        let worker = Worker::spawn("test-shutdown", ()).unwrap();
        worker.shutdown();
        assert!(worker.call(|_: &mut ()| ()).is_err());
        // Idempotent
        worker.shutdown();
    }
}
