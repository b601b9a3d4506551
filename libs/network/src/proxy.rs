//! Proxy behavior
//!
//! A proxy is an ordinary actor whose behavior forwards every message to
//! the remote actor named by its uid. The proxy only holds a weak handle to
//! its membrane; the membrane's tables keep the proxy alive.

use crate::envelope::TransportConfig;
use crate::error::NetworkError;
use crate::membrane::Membrane;
use crate::uid::Uid;
use actors::{Actor, Behavior, Message};
use std::sync::Weak;
use tracing::trace;

pub(crate) struct ProxyBehavior {
    uid: Uid,
    remote: TransportConfig,
    membrane: Weak<Membrane>,
}

impl ProxyBehavior {
    pub(crate) fn new(uid: Uid, remote: TransportConfig, membrane: Weak<Membrane>) -> Self {
        Self {
            uid,
            remote,
            membrane,
        }
    }
}

impl Behavior for ProxyBehavior {
    // Forwarding failures are reported with their own kind rather than as
    // behavior failures, so this never returns an error.
    fn receive(&self, this: &Actor, message: Message) -> anyhow::Result<()> {
        trace!(uid = %self.uid, protocol = %self.remote.protocol, "proxy forwarding");
        let result = match self.membrane.upgrade() {
            Some(membrane) => membrane.forward(self.uid, &self.remote, &message, this.runtime()),
            None => Err(NetworkError::MembraneDropped { uid: self.uid }),
        };
        if let Err(e) = result {
            this.runtime().report_failure(e.into_failure());
        }
        Ok(())
    }
}
