//! Transport Layer
//!
//! A transport moves envelopes between membranes for one protocol. The
//! membrane picks the transport by the `protocol` field of a
//! [`TransportConfig`]: its own config when listening, the remote config
//! carried by a proxy when sending.
//!
//! Sends never block the caller. Failures that happen after `send` returns
//! (a peer that stays unreachable) are reported through the sending
//! runtime's failure policy.

use crate::envelope::{Envelope, TransportConfig};
use crate::error::{NetworkError, Result};
use actors::{Failure, Runtime};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

pub mod metrics;
pub mod null;
pub mod tcp;


pub use metrics::{MetricsTracker, TransportMetrics};
pub use null::LocalNetwork;
pub use tcp::{TcpSettings, TcpTransport};

/// Receiving side of a membrane, as seen by a transport
pub trait Inbox: Send + Sync {
    /// Deliver on the calling thread
    fn deliver(&self, envelope: Envelope);

    /// Deliver from the owning runtime's dispatch loop
    fn enqueue(&self, envelope: Envelope);

    /// Report a failure that has no caller to return to
    fn report(&self, failure: Failure);
}

/// Unified transport trait for all protocols
pub trait Transport: Send + Sync {
    /// Protocol name matched against `TransportConfig::protocol`
    fn protocol(&self) -> &str;

    /// Queue `envelope` for the endpoint described by `destination`
    ///
    /// Errors returned here are immediate (bad configuration, unknown
    /// endpoint). Later failures go to `runtime`'s failure policy.
    fn send(&self, destination: &TransportConfig, envelope: Envelope, runtime: &Runtime) -> Result<()>;

    /// Start accepting envelopes for `local` and hand them to `inbox`
    ///
    /// Returns the effective configuration, which differs from `local`
    /// when the transport chose a free port.
    fn listen(&self, local: &TransportConfig, inbox: Weak<dyn Inbox>) -> Result<TransportConfig>;

    /// Stop accepting envelopes for `local`
    fn unlisten(&self, local: &TransportConfig);

    fn metrics(&self) -> TransportMetrics;
}

/// Protocol name → transport
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transport` under its protocol name, replacing any other
    pub fn with(mut self, transport: Arc<dyn Transport>) -> Self {
        self.register(transport);
        self
    }

    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        self.transports
            .insert(transport.protocol().to_string(), transport);
    }

    pub fn get(&self, protocol: &str) -> Result<&Arc<dyn Transport>> {
        self.transports
            .get(protocol)
            .ok_or_else(|| NetworkError::no_transport(protocol))
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut protocols: Vec<&str> = self.protocols().collect();
        protocols.sort_unstable();
        f.debug_struct("TransportRegistry")
            .field("protocols", &protocols)
            .finish()
    }
}
