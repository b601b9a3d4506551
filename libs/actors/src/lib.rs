//! Actor Runtime
//!
//! A small actor-model execution engine. Actors are handles to a
//! replaceable behavior; sending to an actor enqueues a dispatch on a single
//! FIFO scheduler, and the behavior that handles the message is the one
//! current when the message is dequeued.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  send   ┌────────────────────┐  dispatch  ┌──────────────┐
//! │ Actor handle │────────▶│ Scheduler (FIFO)   │───────────▶│ Behavior     │
//! │ (clonable)   │         │ thunk + on_error   │            │ (late bound) │
//! └──────────────┘         └─────────┬──────────┘            └──────────────┘
//!                                    │ Err / panic
//!                                    ▼
//!                          ┌────────────────────┐
//!                          │ Runtime policy     │
//!                          │ (LogFailures)      │
//!                          └────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust
//! use actors::{behavior, sink, Message, Runtime};
//!
//! let runtime = Runtime::new();
//! let printer = runtime.create(sink());
//! let once = runtime.create(behavior(move |this, msg: Message| {
//!     printer.send(msg);
//!     this.become_(sink());
//!     Ok(())
//! }));
//!
//! once.send("first");
//! once.send("second");
//! runtime.run_once();
//! ```

pub mod actor;
pub mod behaviors;
pub mod error;
pub mod message;
pub mod runtime;
pub mod scheduler;
mod timer;

pub use actor::{behavior, Actor, ActorId, Behavior};
pub use behaviors::{log_messages, sink};
pub use error::{Failure, FailureKind, Result, SchedulerError};
pub use message::Message;
pub use runtime::{FailurePolicy, LogFailures, Runtime, RuntimeBuilder};
pub use scheduler::{DispatchThread, Scheduler, SchedulerStats};
