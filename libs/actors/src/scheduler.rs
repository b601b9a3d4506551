//! Event Loop
//!
//! A single FIFO queue of thunks, each paired with the handler that is
//! told about its failure. One consumer executes entries to completion in
//! enqueue order; producers may enqueue from any thread.
//!
//! Two ways to drive it:
//! - [`Scheduler::spawn`] starts a dedicated dispatch thread that blocks on
//!   the queue until [`DispatchThread::stop`] is called
//! - [`Scheduler::run_once`] drains whatever is queued on the calling
//!   thread and returns, which keeps tests deterministic

use crate::error::{Failure, FailureKind, Result, SchedulerError};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

type Thunk = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;
type ErrorHandler = Box<dyn FnOnce(Failure) + Send>;

enum Entry {
    Run { thunk: Thunk, on_error: ErrorHandler },
    Stop,
}

/// Scheduler counters
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub scheduled: AtomicU64,
    pub executed: AtomicU64,
    pub failed: AtomicU64,
}

/// Point-in-time copy of [`SchedulerMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub executed: u64,
    pub failed: u64,
    pub queued: usize,
}

/// FIFO work queue shared by every actor of a runtime
pub struct Scheduler {
    sender: Sender<Entry>,
    receiver: Receiver<Entry>,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            metrics: SchedulerMetrics::default(),
        }
    }

    /// Append a unit of work. Non-blocking, callable from any thread.
    pub fn schedule<T, E>(&self, thunk: T, on_error: E)
    where
        T: FnOnce() -> anyhow::Result<()> + Send + 'static,
        E: FnOnce(Failure) + Send + 'static,
    {
        self.metrics.scheduled.fetch_add(1, Ordering::Relaxed);
        // The scheduler owns both channel ends, so the send cannot fail.
        let _ = self.sender.send(Entry::Run {
            thunk: Box::new(thunk),
            on_error: Box::new(on_error),
        });
    }

    /// Remove and execute the head entry
    ///
    /// With `block` the caller waits for work; otherwise an empty queue
    /// yields [`SchedulerError::Empty`]. A dequeued stop sentinel yields
    /// [`SchedulerError::Stopped`]. Thunk failures never surface here.
    pub fn run_step(&self, block: bool) -> Result<()> {
        let entry = if block {
            self.receiver.recv().map_err(|_| SchedulerError::Stopped)?
        } else {
            match self.receiver.try_recv() {
                Ok(entry) => entry,
                Err(TryRecvError::Empty) => return Err(SchedulerError::Empty),
                Err(TryRecvError::Disconnected) => return Err(SchedulerError::Stopped),
            }
        };

        match entry {
            Entry::Run { thunk, on_error } => {
                self.execute(thunk, on_error);
                Ok(())
            }
            Entry::Stop => Err(SchedulerError::Stopped),
        }
    }

    fn execute(&self, thunk: Thunk, on_error: ErrorHandler) {
        let failure = match catch_unwind(AssertUnwindSafe(thunk)) {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(Failure::from_error(FailureKind::BehaviorExecution, error)),
            Err(payload) => Some(Failure::from_panic(payload.as_ref())),
        };
        self.metrics.executed.fetch_add(1, Ordering::Relaxed);

        if let Some(failure) = failure {
            self.metrics.failed.fetch_add(1, Ordering::Relaxed);
            debug!(kind = %failure.kind, message = %failure.message, "thunk failed");
            // A panicking handler must not take the loop down either.
            if catch_unwind(AssertUnwindSafe(move || on_error(failure))).is_err() {
                warn!("failure handler panicked; failure dropped");
            }
        }
    }

    /// Execute entries until a stop sentinel is dequeued
    pub fn run(&self) {
        loop {
            match self.run_step(true) {
                Ok(()) => {}
                Err(SchedulerError::Empty) => continue,
                Err(SchedulerError::Stopped) => return,
            }
        }
    }

    /// Execute entries until the queue is empty; returns how many ran
    ///
    /// Work enqueued by the executed thunks is drained too. A stop
    /// sentinel ends the drain early.
    pub fn run_once(&self) -> usize {
        let mut executed = 0;
        while let Ok(()) = self.run_step(false) {
            executed += 1;
        }
        executed
    }

    /// Start a dispatch thread running [`Scheduler::run`]
    pub fn spawn(self: &Arc<Self>, name: impl Into<String>) -> io::Result<DispatchThread> {
        let name = name.into();
        let scheduler = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!(thread = %thread::current().name().unwrap_or("dispatch"), "dispatch loop started");
                scheduler.run();
                info!("dispatch loop stopped");
            })?;

        Ok(DispatchThread {
            name,
            scheduler: Arc::clone(self),
            handle: Some(handle),
        })
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.metrics.scheduled.load(Ordering::Relaxed),
            executed: self.metrics.executed.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            queued: self.len(),
        }
    }

    fn push_stop(&self) {
        let _ = self.sender.send(Entry::Stop);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running dispatch thread
pub struct DispatchThread {
    name: String,
    scheduler: Arc<Scheduler>,
    handle: Option<JoinHandle<()>>,
}

impl DispatchThread {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop after everything queued so far has run, then join
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.scheduler.push_stop();
            if handle.join().is_err() {
                warn!(thread = %self.name, "dispatch thread panicked");
            }
        }
    }
}

impl Drop for DispatchThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_fifo_execution() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            scheduler.schedule(
                move || {
                    order.lock().push(i);
                    Ok(())
                },
                |_| {},
            );
        }

        assert_eq!(scheduler.len(), 5);
        assert_eq!(scheduler.run_once(), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_non_blocking_step_on_empty_queue() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.run_step(false), Err(SchedulerError::Empty));
    }

    #[test]
    fn test_failures_are_contained() {
        let scheduler = Scheduler::new();
        let failures = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&failures);
        scheduler.schedule(
            || Err(anyhow::anyhow!("bad input")),
            move |f| sink.lock().push(f.message),
        );
        let sink = Arc::clone(&failures);
        scheduler.schedule(|| panic!("exploded"), move |f| sink.lock().push(f.message));
        scheduler.schedule(|| Ok(()), |_| panic!("not called"));

        assert_eq!(scheduler.run_once(), 3);
        assert_eq!(
            *failures.lock(),
            vec!["bad input".to_string(), "behavior panicked: exploded".to_string()]
        );

        let stats = scheduler.stats();
        assert_eq!(stats.scheduled, 3);
        assert_eq!(stats.executed, 3);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_work_scheduled_while_draining_is_drained() {
        let scheduler = Arc::new(Scheduler::new());
        let inner = Arc::clone(&scheduler);
        scheduler.schedule(
            move || {
                inner.schedule(|| Ok(()), |_| {});
                Ok(())
            },
            |_| {},
        );
        assert_eq!(scheduler.run_once(), 2);
    }

    #[test]
    fn test_dispatch_thread_drains_before_stopping() {
        let scheduler = Arc::new(Scheduler::new());
        let (tx, rx) = crossbeam_channel::unbounded();

        let dispatcher = scheduler.spawn("test-dispatch").unwrap();
        for i in 0..100 {
            let tx = tx.clone();
            scheduler.schedule(
                move || {
                    tx.send(i)?;
                    Ok(())
                },
                |_| {},
            );
        }
        dispatcher.stop();

        let received: Vec<i32> = rx.try_iter().collect();
        assert_eq!(received, (0..100).collect::<Vec<_>>());
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_err());
    }
}
