//! In-process transport
//!
//! A [`LocalNetwork`] is a switchboard shared by the membranes of one
//! process. Each listening membrane registers under its name; a send looks
//! the name up and delivers straight into the target membrane on the
//! caller's thread. Envelopes are passed by value, never serialized.

use super::{Inbox, MetricsTracker, Transport, TransportMetrics};
use crate::envelope::{Envelope, TransportConfig};
use crate::error::{NetworkError, Result};
use actors::Runtime;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

#[derive(Clone, Default)]
pub struct LocalNetwork {
    inboxes: Arc<RwLock<HashMap<String, Weak<dyn Inbox>>>>,
    metrics: MetricsTracker,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names with a live membrane behind them
    pub fn members(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inboxes
            .read()
            .iter()
            .filter(|(_, inbox)| inbox.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Transport for LocalNetwork {
    fn protocol(&self) -> &str {
        TransportConfig::NULL
    }

    fn send(&self, destination: &TransportConfig, envelope: Envelope, _runtime: &Runtime) -> Result<()> {
        let name = destination.str_param("membrane")?;
        let inbox = self
            .inboxes
            .read()
            .get(name)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NetworkError::endpoint_unavailable(format!("null:{}", name)))?;

        debug!(membrane = %name, to = %envelope.to, "local delivery");
        self.metrics.record_send(0, 0);
        self.metrics.record_receive(0);
        inbox.deliver(envelope);
        Ok(())
    }

    fn listen(&self, local: &TransportConfig, inbox: Weak<dyn Inbox>) -> Result<TransportConfig> {
        let name = local.str_param("membrane")?;
        let mut inboxes = self.inboxes.write();

        if inboxes.get(name).map_or(false, |existing| existing.strong_count() > 0) {
            return Err(NetworkError::configuration(
                format!("membrane '{}' is already on this local network", name),
                Some("membrane"),
            ));
        }
        inboxes.insert(name.to_string(), inbox);
        info!(membrane = %name, "joined local network");
        Ok(local.clone())
    }

    fn unlisten(&self, local: &TransportConfig) {
        if let Ok(name) = local.str_param("membrane") {
            if self.inboxes.write().remove(name).is_some() {
                info!(membrane = %name, "left local network");
            }
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }
}
