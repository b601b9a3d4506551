//! Delayed Delivery
//!
//! A single timer thread per runtime holds pending deliveries in a
//! deadline-ordered heap. When a deadline passes the message is sent to its
//! actor through the normal scheduler path, so ordering with other sends is
//! decided by enqueue time.

use crate::actor::Actor;
use crate::message::Message;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Longer delays are capped here; such deliveries never fire in practice
const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

struct Pending {
    deadline: Instant,
    seq: u64,
    actor: Actor,
    message: Message,
}

// Min-heap on (deadline, seq)
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Pending {}

/// Handle to the timer thread. Dropping it ends the thread once its
/// queue of requests is closed; deliveries still pending are discarded.
pub(crate) struct Timer {
    requests: Sender<Pending>,
    next_seq: std::sync::atomic::AtomicU64,
}

impl Timer {
    pub(crate) fn start(name: &str) -> io::Result<Self> {
        let (requests, receiver) = unbounded();
        thread::Builder::new()
            .name(format!("{}-timer", name))
            .spawn(move || timer_loop(receiver))?;

        Ok(Self {
            requests,
            next_seq: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub(crate) fn schedule(&self, actor: &Actor, delay: Duration, message: Message) {
        let seq = self
            .next_seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let now = Instant::now();
        let Some(deadline) = now.checked_add(delay.min(MAX_DELAY)) else {
            warn!(actor = %actor.id(), ?delay, "delay not representable; message dropped");
            return;
        };
        let pending = Pending {
            deadline,
            seq,
            actor: actor.clone(),
            message,
        };
        // The thread only exits after this sender is dropped.
        let _ = self.requests.send(pending);
    }
}

fn timer_loop(requests: Receiver<Pending>) {
    let mut heap: BinaryHeap<Pending> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while heap.peek().map_or(false, |p| p.deadline <= now) {
            if let Some(due) = heap.pop() {
                trace!(actor = %due.actor.id(), "timer fired");
                due.actor.send(due.message);
            }
        }

        let received = match heap.peek() {
            Some(next) => requests.recv_timeout(next.deadline.saturating_duration_since(now)),
            None => requests
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(pending) => heap.push(pending),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!(discarded = heap.len(), "timer stopped");
                return;
            }
        }
    }
}
