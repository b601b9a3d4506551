//! Actor Runtime
//!
//! The [`Runtime`] creates actors, owns the scheduler that runs them and
//! decides what happens to failures. It is a cheap clonable handle; every
//! actor keeps one.

use crate::actor::{Actor, Behavior};
use crate::error::{Failure, FailureKind};
use crate::message::Message;
use crate::scheduler::{DispatchThread, Scheduler};
use crate::timer::Timer;
use once_cell::sync::OnceCell;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Decides what to do with a reported failure
pub trait FailurePolicy: Send + Sync + 'static {
    fn report(&self, failure: &Failure);
}

impl<F> FailurePolicy for F
where
    F: Fn(&Failure) + Send + Sync + 'static,
{
    fn report(&self, failure: &Failure) {
        self(failure)
    }
}

/// Default policy: log the failure with its trace and carry on
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailures;

impl FailurePolicy for LogFailures {
    fn report(&self, failure: &Failure) {
        if failure.trace.is_empty() {
            error!(kind = %failure.kind, "{}", failure.message);
        } else {
            error!(
                kind = %failure.kind,
                trace = %failure.trace.join("\n"),
                "{}",
                failure.message
            );
        }
    }
}

struct RuntimeInner {
    name: String,
    scheduler: Arc<Scheduler>,
    policy: Box<dyn FailurePolicy>,
    timer: OnceCell<Timer>,
}

/// Factory for actors and owner of their scheduler
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Runtime with a fresh scheduler and the [`LogFailures`] policy
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Allocate a new actor bound to `behavior`. No message is delivered.
    pub fn create(&self, behavior: impl Behavior) -> Actor {
        Actor::new(self.clone(), Arc::new(behavior))
    }

    /// Hand a failure to the configured policy
    pub fn report_failure(&self, failure: Failure) {
        self.inner.policy.report(&failure);
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.inner.scheduler
    }

    /// Drain the scheduler on the calling thread
    pub fn run_once(&self) -> usize {
        self.inner.scheduler.run_once()
    }

    /// Start a dispatch thread named after this runtime
    pub fn spawn_dispatcher(&self) -> io::Result<DispatchThread> {
        self.inner
            .scheduler
            .spawn(format!("{}-dispatch", self.inner.name))
    }

    /// Send `message` to `actor` once `delay` has elapsed
    ///
    /// The timer thread is started on first use. If it cannot be started
    /// the failure is reported and the message is dropped. Delays beyond a
    /// century are capped there.
    pub fn later(&self, actor: &Actor, delay: Duration, message: impl Into<Message>) {
        let message = message.into();
        match self.inner.timer.get_or_try_init(|| Timer::start(&self.inner.name)) {
            Ok(timer) => timer.schedule(actor, delay, message),
            Err(e) => self.report_failure(Failure::from_error(
                FailureKind::BehaviorExecution,
                anyhow::Error::new(e).context("failed to start timer thread"),
            )),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.inner.name)
            .field("queued", &self.inner.scheduler.len())
            .finish()
    }
}

/// Builder for [`Runtime`]
pub struct RuntimeBuilder {
    name: String,
    scheduler: Option<Arc<Scheduler>>,
    policy: Box<dyn FailurePolicy>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self {
            name: "runtime".to_string(),
            scheduler: None,
            policy: Box::new(LogFailures),
        }
    }
}

impl RuntimeBuilder {
    /// Name used for thread names and log fields
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Share an existing scheduler instead of creating one
    pub fn scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn failure_policy(mut self, policy: impl FailurePolicy) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                name: self.name,
                scheduler: self.scheduler.unwrap_or_default(),
                policy: self.policy,
                timer: OnceCell::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::behavior;
    use parking_lot::Mutex;

    #[test]
    fn test_custom_policy_receives_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let runtime = Runtime::builder()
            .name("policy-test")
            .failure_policy(move |f: &Failure| log.lock().push(f.kind))
            .build();

        let actor = runtime.create(behavior(|_, _| anyhow::bail!("nope")));
        actor.send(1);
        actor.send(2);
        runtime.run_once();

        assert_eq!(
            *seen.lock(),
            vec![FailureKind::BehaviorExecution, FailureKind::BehaviorExecution]
        );
    }

    #[test]
    fn test_shared_scheduler() {
        let scheduler = Arc::new(Scheduler::new());
        let a = Runtime::builder().scheduler(Arc::clone(&scheduler)).build();
        let b = Runtime::builder().scheduler(Arc::clone(&scheduler)).build();

        a.create(behavior(|_, _| Ok(()))).send(1);
        b.create(behavior(|_, _| Ok(()))).send(2);

        assert_eq!(scheduler.len(), 2);
        assert_eq!(a.run_once(), 2);
        assert_eq!(b.run_once(), 0);
    }

    #[test]
    fn test_log_failures_does_not_panic() {
        LogFailures.report(&Failure::new(FailureKind::UnknownUid, "no such uid"));
    }
}
