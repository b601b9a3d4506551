//! Membrane
//!
//! The membrane is the boundary between a runtime's actors and the rest of
//! the network. It maps actor references to opaque uids and back:
//!
//! - a local actor handed to a peer gets a freshly minted uid
//! - a uid received from a peer becomes a proxy actor that forwards
//!   messages back over the transport named in the token's config
//! - a uid this membrane minted itself resolves to the original actor
//!
//! Both directions live in one table guarded by one lock, so the mapping
//! stays a bijection: one uid per actor, one actor (same instance) per uid.
//!
//! ```text
//!   local actor ──export──▶ {"_proxy": uid, "_config": {...}} ──wire──▶ peer
//!   proxy actor ◀─import─── {"_proxy": uid, "_config": {...}} ◀─wire─── peer
//! ```

use crate::envelope::{Envelope, TransportConfig};
use crate::error::{NetworkError, Result};
use crate::marshal;
use crate::proxy::ProxyBehavior;
use crate::transports::{Inbox, TransportRegistry};
use crate::uid::Uid;
use actors::{Actor, ActorId, Failure, Message, Runtime};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

#[derive(Default)]
struct Tables {
    by_uid: HashMap<Uid, Actor>,
    by_actor: HashMap<ActorId, Uid>,
}

impl Tables {
    fn insert(&mut self, uid: Uid, actor: Actor) {
        self.by_actor.insert(actor.id(), uid);
        self.by_uid.insert(uid, actor);
    }
}

/// Per-process registry of exported actors and imported proxies
pub struct Membrane {
    runtime: Runtime,
    config: RwLock<TransportConfig>,
    transports: TransportRegistry,
    tables: Mutex<Tables>,
    listening: AtomicBool,
    me: Weak<Membrane>,
}

impl Membrane {
    /// Create a membrane reachable at `config`. Nothing listens until
    /// [`Membrane::start`] is called.
    pub fn new(runtime: Runtime, config: TransportConfig, transports: TransportRegistry) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            runtime,
            config: RwLock::new(config),
            transports,
            tables: Mutex::new(Tables::default()),
            listening: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// This membrane's own transport configuration
    pub fn config(&self) -> TransportConfig {
        self.config.read().clone()
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    /// Bind the server for this membrane's protocol
    ///
    /// Returns the effective configuration, which replaces the configured
    /// one (a tcp port of 0 becomes the port actually bound).
    pub fn start(&self) -> Result<TransportConfig> {
        let local = self.config();
        let transport = self.transports.get(&local.protocol)?;
        let inbox: Weak<dyn Inbox> = self.me.clone();

        let bound = transport.listen(&local, inbox)?;
        *self.config.write() = bound.clone();
        self.listening.store(true, Ordering::Release);
        info!(config = %bound, "membrane started");
        Ok(bound)
    }

    /// Stop the server started by [`Membrane::start`]
    pub fn stop(&self) {
        if !self.listening.swap(false, Ordering::AcqRel) {
            return;
        }
        let local = self.config();
        match self.transports.get(&local.protocol) {
            Ok(transport) => {
                transport.unlisten(&local);
                info!(config = %local, "membrane stopped");
            }
            Err(e) => warn!(error = %e, "cannot stop membrane"),
        }
    }

    /// Uid for `actor`, minting and registering one on first use
    pub fn get_or_create_uid(&self, actor: &Actor) -> Uid {
        let mut tables = self.tables.lock();
        if let Some(uid) = tables.by_actor.get(&actor.id()) {
            return *uid;
        }

        let uid = Uid::new();
        tables.insert(uid, actor.clone());
        trace!(uid = %uid, actor = %actor.id(), "uid minted");
        uid
    }

    /// Actor registered for `uid`, creating a proxy bound to `remote` if
    /// there is none
    ///
    /// A uid minted by this membrane resolves to the original local actor.
    pub fn get_or_create_proxy(&self, uid: Uid, remote: TransportConfig) -> Actor {
        let mut tables = self.tables.lock();
        if let Some(actor) = tables.by_uid.get(&uid) {
            return actor.clone();
        }

        debug!(uid = %uid, remote = %remote, "proxy created");
        let proxy = self
            .runtime
            .create(ProxyBehavior::new(uid, remote, self.me.clone()));
        tables.insert(uid, proxy.clone());
        proxy
    }

    /// Actor registered for `uid`, if any
    pub fn get_proxy(&self, uid: Uid) -> Option<Actor> {
        self.tables.lock().by_uid.get(&uid).cloned()
    }

    /// Uid registered for `actor`, if any
    pub fn uid_of(&self, actor: &Actor) -> Option<Uid> {
        self.tables.lock().by_actor.get(&actor.id()).copied()
    }

    /// Number of registered uids
    pub fn len(&self) -> usize {
        self.tables.lock().by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marshal `message`, replacing every actor with a token carrying its
    /// uid and this membrane's config
    pub fn export_message(&self, message: &Message) -> Value {
        let config = self.config();
        marshal::export_with(message, &mut |actor: &Actor| {
            marshal::actor_token(self.get_or_create_uid(actor), &config)
        })
    }

    /// Unmarshal `value`, resolving every actor token to an actor
    pub fn import_message(&self, value: Value) -> Result<Message> {
        marshal::import_with(value, &mut |uid, remote| Ok(self.get_or_create_proxy(uid, remote)))
    }

    pub fn is_marshalled_actor(&self, value: &Value) -> bool {
        marshal::is_marshalled_actor(value)
    }

    /// Send an already imported message to the actor registered for `uid`
    pub fn deliver_local(&self, uid: Uid, message: Message) -> Result<()> {
        let actor = self
            .get_proxy(uid)
            .ok_or_else(|| NetworkError::unknown_uid(uid))?;
        trace!(uid = %uid, actor = %actor.id(), "local delivery");
        actor.send(message);
        Ok(())
    }

    /// Check, import and deliver an envelope received from a transport
    ///
    /// The uid is checked before anything is imported, so an envelope for
    /// an unknown uid registers no proxies.
    pub fn receive_envelope(&self, envelope: Envelope) -> Result<()> {
        if self.get_proxy(envelope.to).is_none() {
            return Err(NetworkError::unknown_uid(envelope.to));
        }
        let message = self.import_message(envelope.msg)?;
        self.deliver_local(envelope.to, message)
    }

    /// Export `message` and hand it to the transport for `remote`
    pub(crate) fn forward(
        &self,
        uid: Uid,
        remote: &TransportConfig,
        message: &Message,
        runtime: &Runtime,
    ) -> Result<()> {
        let transport = self.transports.get(&remote.protocol)?;
        let envelope = Envelope::new(uid, self.export_message(message));
        debug!(to = %uid, protocol = %remote.protocol, "forwarding to remote");
        transport.send(remote, envelope, runtime)
    }
}

impl Inbox for Membrane {
    fn deliver(&self, envelope: Envelope) {
        let to = envelope.to;
        if let Err(e) = self.receive_envelope(envelope) {
            warn!(to = %to, error = %e, "envelope rejected");
            self.runtime.report_failure(e.into_failure());
        }
    }

    fn enqueue(&self, envelope: Envelope) {
        let Some(membrane) = self.me.upgrade() else {
            return;
        };
        let runtime = self.runtime.clone();
        self.runtime.scheduler().schedule(
            move || {
                membrane.deliver(envelope);
                Ok(())
            },
            move |failure| runtime.report_failure(failure),
        );
    }

    fn report(&self, failure: Failure) {
        self.runtime.report_failure(failure);
    }
}

impl Drop for Membrane {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Membrane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Membrane")
            .field("config", &*self.config.read())
            .field("uids", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actors::{behavior, sink, FailureKind};
    use serde_json::json;

    fn membrane(runtime: &Runtime) -> Arc<Membrane> {
        Membrane::new(runtime.clone(), TransportConfig::null("local"), TransportRegistry::new())
    }

    #[test]
    fn test_uid_is_stable_per_actor() {
        let runtime = Runtime::new();
        let m = membrane(&runtime);
        let a = runtime.create(sink());
        let b = runtime.create(sink());

        let uid_a = m.get_or_create_uid(&a);
        assert_eq!(m.get_or_create_uid(&a), uid_a);
        assert_eq!(m.get_or_create_uid(&a.clone()), uid_a);
        assert_ne!(m.get_or_create_uid(&b), uid_a);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get_proxy(uid_a), Some(a));
    }

    #[test]
    fn test_proxy_is_stable_per_uid() {
        let runtime = Runtime::new();
        let m = membrane(&runtime);
        let uid = Uid::new();

        let p1 = m.get_or_create_proxy(uid, TransportConfig::null("remote"));
        let p2 = m.get_or_create_proxy(uid, TransportConfig::null("elsewhere"));
        assert!(p1.ptr_eq(&p2));
        assert_eq!(m.uid_of(&p1), Some(uid));
        assert_eq!(m.get_or_create_uid(&p1), uid);
    }

    #[test]
    fn test_own_uid_resolves_to_original_actor() {
        let runtime = Runtime::new();
        let m = membrane(&runtime);
        let local = runtime.create(sink());

        let exported = m.export_message(&Message::from(vec![Message::from(&local)]));
        let imported = m.import_message(exported).unwrap();
        let back = imported.as_seq().and_then(|s| s[0].as_actor()).cloned().unwrap();
        assert!(back.ptr_eq(&local));
    }

    #[test]
    fn test_export_uses_own_config() {
        let runtime = Runtime::new();
        let m = membrane(&runtime);
        let actor = runtime.create(sink());

        let value = m.export_message(&Message::map([("reply_to", Message::from(&actor)), ("n", Message::from(3))]));
        let uid = m.uid_of(&actor).unwrap();
        assert_eq!(
            value,
            json!({"n": 3, "reply_to": {"_proxy": uid.to_string(), "_config": {"protocol": "null", "membrane": "local"}}})
        );
        assert!(m.is_marshalled_actor(&value["reply_to"]));
    }

    #[test]
    fn test_unknown_uid_is_rejected_without_side_effects() {
        let runtime = Runtime::new();
        let m = membrane(&runtime);
        let stranger = Uid::new();
        let token = json!({"_proxy": Uid::new().to_string(), "_config": {"protocol": "null", "membrane": "x"}});

        let err = m.receive_envelope(Envelope::new(stranger, token)).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::UnknownUid);
        assert!(m.is_empty());

        let err = m.deliver_local(stranger, Message::Null).unwrap_err();
        assert!(matches!(err, NetworkError::UnknownUid { uid } if uid == stranger));
    }

    #[test]
    fn test_enqueue_waits_for_the_dispatch_loop() {
        let runtime = Runtime::new();
        let m = membrane(&runtime);
        let (tx, rx) = crossbeam_channel::unbounded();
        let target = runtime.create(behavior(move |_, msg| {
            tx.send(msg)?;
            Ok(())
        }));
        let uid = m.get_or_create_uid(&target);

        m.enqueue(Envelope::new(uid, json!("hello")));
        assert!(rx.try_recv().is_err());

        runtime.run_once();
        assert_eq!(rx.try_recv().unwrap(), Message::from("hello"));
    }

    #[test]
    fn test_start_without_transport() {
        let runtime = Runtime::new();
        let m = membrane(&runtime);
        let err = m.start().unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::NoTransportForProtocol);
    }
}
