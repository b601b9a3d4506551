//! Stock behaviors

use crate::actor::{behavior, Behavior};
use tracing::info;

/// Discard every message. Becoming a sink is how an actor stops.
pub fn sink() -> impl Behavior {
    behavior(|_, _| Ok(()))
}

/// Log each message at info level under `prefix`
pub fn log_messages(prefix: impl Into<String>) -> impl Behavior {
    let prefix = prefix.into();
    behavior(move |this, message| {
        info!(actor = %this.id(), prefix = %prefix, message = ?message, "message received");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    #[test_log::test]
    fn test_stock_behaviors_accept_anything() {
        let runtime = Runtime::new();
        let quiet = runtime.create(sink());
        let loud = runtime.create(log_messages("probe"));

        quiet.send("ignored");
        loud.send(vec![1, 2, 3]);
        loud.send(&quiet);

        assert_eq!(runtime.run_once(), 3);
        assert_eq!(runtime.scheduler().stats().failed, 0);
    }
}
