//! Network Infrastructure
//!
//! Location transparency for the actor runtime. A [`Membrane`] turns actor
//! references into opaque [`Uid`]s when messages leave the process and
//! turns uids back into actors (proxies, or the original local actor) when
//! messages arrive. Transports move the resulting envelopes:
//!
//! - [`LocalNetwork`]: in-process switchboard, direct calls, no encoding
//! - [`TcpTransport`]: newline-delimited JSON over TCP with bounded retry
//!
//! # Examples
//!
//! ```rust
//! use actors::{behavior, Runtime};
//! use network::{LocalNetwork, Membrane, TransportConfig, TransportRegistry};
//! use std::sync::Arc;
//!
//! let network = LocalNetwork::new();
//! let transports = TransportRegistry::new().with(Arc::new(network.clone()));
//!
//! let runtime = Runtime::new();
//! let left = Membrane::new(runtime.clone(), TransportConfig::null("left"), transports.clone());
//! let right = Membrane::new(runtime.clone(), TransportConfig::null("right"), transports);
//! left.start().unwrap();
//! right.start().unwrap();
//!
//! let echo = runtime.create(behavior(|_, msg| {
//!     tracing::info!(?msg, "echo");
//!     Ok(())
//! }));
//! let token = right.export_message(&echo.clone().into());
//! let proxy = left.import_message(token).unwrap();
//! proxy.as_actor().unwrap().send("across the membrane");
//! runtime.run_once();
//! ```

pub mod envelope;
pub mod error;
pub mod marshal;
pub mod membrane;
mod proxy;
pub mod transports;
pub mod uid;

pub use envelope::{Envelope, TransportConfig};
pub use error::{NetworkError, Result};
pub use marshal::is_marshalled_actor;
pub use membrane::Membrane;
pub use transports::{
    Inbox, LocalNetwork, MetricsTracker, TcpSettings, TcpTransport, Transport, TransportMetrics,
    TransportRegistry,
};
pub use uid::Uid;
