//! Actors and Behaviors
//!
//! An [`Actor`] is a cheap, clonable handle. Its behavior is stored behind
//! a lock and read when a queued message is *dispatched*, not when it is
//! sent, so a `become_` that runs between a send and its dispatch decides
//! which behavior handles the message.
//!
//! Behaviors are plain closures (or any [`Behavior`] impl). Construction
//! arguments are whatever the closure captures:
//!
//! ```rust
//! use actors::{behavior, Behavior, Runtime};
//!
//! fn counter(count: i64) -> impl Behavior {
//!     behavior(move |this, msg| {
//!         let delta = msg.as_i64().unwrap_or(0);
//!         this.become_(counter(count + delta));
//!         Ok(())
//!     })
//! }
//!
//! let runtime = Runtime::new();
//! let actor = runtime.create(counter(1337));
//! actor.send(1);
//! runtime.run_once();
//! ```

use crate::message::Message;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique actor identifier, used for hashing and logging only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(u64);

impl ActorId {
    fn next() -> Self {
        Self(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// An actor's response to a message
///
/// Implementations must not block: all effects go through `send`,
/// `create` and `become_`, which only enqueue work or swap the behavior.
pub trait Behavior: Send + Sync + 'static {
    fn receive(&self, this: &Actor, message: Message) -> anyhow::Result<()>;
}

impl<F> Behavior for F
where
    F: Fn(&Actor, Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn receive(&self, this: &Actor, message: Message) -> anyhow::Result<()> {
        self(this, message)
    }
}

/// Pin a closure to the behavior signature so its argument and return
/// types are inferred without annotations.
pub fn behavior<F>(f: F) -> F
where
    F: Fn(&Actor, Message) -> anyhow::Result<()> + Send + Sync + 'static,
{
    f
}

struct ActorCell {
    id: ActorId,
    behavior: Mutex<Arc<dyn Behavior>>,
    runtime: Runtime,
}

/// Handle to an actor. Clones refer to the same actor.
#[derive(Clone)]
pub struct Actor {
    cell: Arc<ActorCell>,
}

impl Actor {
    pub(crate) fn new(runtime: Runtime, behavior: Arc<dyn Behavior>) -> Self {
        let id = ActorId::next();
        trace!(actor = %id, "actor created");
        Self {
            cell: Arc::new(ActorCell {
                id,
                behavior: Mutex::new(behavior),
                runtime,
            }),
        }
    }

    pub fn id(&self) -> ActorId {
        self.cell.id
    }

    /// The runtime this actor was created by
    pub fn runtime(&self) -> &Runtime {
        &self.cell.runtime
    }

    /// Queue `message` for this actor. Never blocks and never runs the
    /// behavior synchronously.
    pub fn send(&self, message: impl Into<Message>) {
        let target = self.clone();
        let message = message.into();
        let runtime = self.cell.runtime.clone();

        self.cell.runtime.scheduler().schedule(
            move || target.dispatch(message),
            move |failure| runtime.report_failure(failure),
        );
    }

    /// Replace the behavior. Takes effect for every message not yet
    /// dispatched, including messages already in the queue.
    pub fn become_(&self, behavior: impl Behavior) {
        *self.cell.behavior.lock() = Arc::new(behavior);
        trace!(actor = %self.cell.id, "behavior replaced");
    }

    /// Create a sibling actor on the same runtime
    pub fn create(&self, behavior: impl Behavior) -> Actor {
        self.cell.runtime.create(behavior)
    }

    /// Run the current behavior. The lock is released before the call so
    /// the behavior may `become_` on itself.
    fn dispatch(&self, message: Message) -> anyhow::Result<()> {
        let behavior = Arc::clone(&*self.cell.behavior.lock());
        behavior.receive(self, message)
    }

    /// Same actor, by reference
    pub fn ptr_eq(&self, other: &Actor) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl PartialEq for Actor {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Actor {}

impl Hash for Actor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cell.id.hash(state);
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Actor({})", self.cell.id)
    }
}
