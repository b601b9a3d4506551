//! TCP Transport Integration Tests
//!
//! Membranes talking over real loopback sockets. Each node has its own
//! actor runtime with a dispatch thread; socket tasks run on a shared tokio
//! runtime. Uses real connections, no mocks.

use actors::{behavior, Actor, DispatchThread, Failure, FailureKind, Message, Runtime};
use network::{
    Envelope, Membrane, TcpSettings, TcpTransport, Transport, TransportConfig, TransportRegistry, Uid,
};
use parking_lot::Mutex;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn tokio_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

struct Node {
    runtime: Runtime,
    membrane: Arc<Membrane>,
    transport: Arc<TcpTransport>,
    failures: Arc<Mutex<Vec<Failure>>>,
    dispatcher: Option<DispatchThread>,
}

impl Node {
    fn new(name: &str, io: &tokio::runtime::Runtime, settings: TcpSettings) -> Self {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&failures);
        let runtime = Runtime::builder()
            .name(name)
            .failure_policy(move |f: &Failure| log.lock().push(f.clone()))
            .build();

        let transport = Arc::new(TcpTransport::new(io.handle().clone(), settings));
        let transports = TransportRegistry::new().with(transport.clone());
        let membrane = Membrane::new(runtime.clone(), TransportConfig::tcp("127.0.0.1", 0), transports);
        let bound = membrane.start().unwrap();
        assert_ne!(bound.tcp_endpoint().unwrap().1, 0);

        let dispatcher = Some(runtime.spawn_dispatcher().unwrap());
        Self {
            runtime,
            membrane,
            transport,
            failures,
            dispatcher,
        }
    }

    fn port(&self) -> u16 {
        self.membrane.config().tcp_endpoint().unwrap().1
    }

    fn failure_kinds(&self) -> Vec<FailureKind> {
        self.failures.lock().iter().map(|f| f.kind).collect()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.membrane.stop();
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
    }
}

fn introduce(owner: &Node, actor: &Actor, importer: &Node) -> Actor {
    let token = owner.membrane.export_message(&Message::from(actor));
    importer
        .membrane
        .import_message(token)
        .unwrap()
        .as_actor()
        .cloned()
        .unwrap()
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

fn forwarder(runtime: &Runtime) -> (Actor, crossbeam_channel::Receiver<Message>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let actor = runtime.create(behavior(move |_, msg| {
        tx.send(msg)?;
        Ok(())
    }));
    (actor, rx)
}

#[test_log::test]
fn test_reference_round_trip_over_tcp() {
    let io = tokio_runtime();
    let a = Node::new("a", &io, TcpSettings::default());
    let b = Node::new("b", &io, TcpSettings::default());

    let echo = b.runtime.create(behavior(|this, msg| {
        let reply_to = msg
            .get("reply_to")
            .and_then(Message::as_actor)
            .ok_or_else(|| anyhow::anyhow!("missing reply_to"))?;
        reply_to.send(Message::map([
            ("echo", msg.get("text").cloned().unwrap_or_default()),
            ("from", Message::from(this)),
        ]));
        Ok(())
    }));
    let echo_proxy = introduce(&b, &echo, &a);
    let (inbox, replies) = forwarder(&a.runtime);

    echo_proxy.send(Message::map([
        ("reply_to", Message::from(&inbox)),
        ("text", Message::from("over the wire")),
    ]));

    let reply = replies.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(reply.get("echo"), Some(&Message::from("over the wire")));
    assert!(reply.get("from").and_then(Message::as_actor).unwrap().ptr_eq(&echo_proxy));

    assert!(a.failures.lock().is_empty());
    assert!(b.failures.lock().is_empty());
    assert!(a.transport.metrics().messages_sent >= 1);
    assert!(b.transport.metrics().messages_received >= 1);
}

#[test_log::test]
fn test_unreachable_endpoint_reports_one_failure_after_two_reconnects() {
    let io = tokio_runtime();
    let settings = TcpSettings {
        connect_timeout_ms: 1_000,
        ..Default::default()
    };
    let a = Node::new("a", &io, settings);

    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let proxy = a
        .membrane
        .get_or_create_proxy(Uid::new(), TransportConfig::tcp("127.0.0.1", dead_port));

    proxy.send("anyone there?");
    wait_until("send failure", || !a.failures.lock().is_empty());
    thread::sleep(Duration::from_millis(100));

    assert_eq!(a.failure_kinds(), vec![FailureKind::TransportSendFailed]);
    let metrics = a.transport.metrics();
    assert_eq!(metrics.connect_attempts, 3);
    assert_eq!(metrics.reconnects, 2);
    assert_eq!(metrics.send_failures, 1);
}

#[test_log::test]
fn test_concurrent_senders_keep_order_and_bijection() {
    const SENDERS: usize = 4;
    const PER_SENDER: i64 = 50;

    let io = tokio_runtime();
    let a = Node::new("a", &io, TcpSettings::default());
    let b = Node::new("b", &io, TcpSettings::default());

    let (sink, received) = forwarder(&b.runtime);
    let sink_proxy = introduce(&b, &sink, &a);
    let senders: Vec<Actor> = (0..SENDERS)
        .map(|_| a.runtime.create(behavior(|_, _| Ok(()))))
        .collect();

    let handles: Vec<_> = senders
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, sender)| {
            let target = sink_proxy.clone();
            thread::spawn(move || {
                for seq in 0..PER_SENDER {
                    target.send(Message::map([
                        ("sender", Message::from(&sender)),
                        ("index", Message::from(index as i64)),
                        ("seq", Message::from(seq)),
                    ]));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut last_seq = vec![-1i64; SENDERS];
    let mut sender_proxies: Vec<Option<Actor>> = vec![None; SENDERS];
    for _ in 0..(SENDERS as i64 * PER_SENDER) {
        let msg = received.recv_timeout(Duration::from_secs(10)).unwrap();
        let index = msg.get("index").and_then(Message::as_i64).unwrap() as usize;
        let seq = msg.get("seq").and_then(Message::as_i64).unwrap();
        let sender = msg.get("sender").and_then(Message::as_actor).unwrap().clone();

        assert_eq!(seq, last_seq[index] + 1, "sender {} out of order", index);
        last_seq[index] = seq;

        match &sender_proxies[index] {
            Some(known) => assert!(known.ptr_eq(&sender)),
            None => sender_proxies[index] = Some(sender),
        }
    }

    // b: the sink plus one proxy per distinct sender
    assert_eq!(b.membrane.len(), 1 + SENDERS);
    assert!(a.failures.lock().is_empty());
    assert!(b.failures.lock().is_empty());
}

#[test_log::test]
fn test_raw_frames_malformed_and_unknown() {
    let io = tokio_runtime();
    let b = Node::new("b", &io, TcpSettings::default());
    let (sink, received) = forwarder(&b.runtime);
    let sink_uid = b.membrane.get_or_create_uid(&sink);

    let mut stream = std::net::TcpStream::connect(("127.0.0.1", b.port())).unwrap();
    stream.write_all(b"{not json at all\n").unwrap();
    stream
        .write_all(&Envelope::new(Uid::new(), json!("lost")).to_line().unwrap())
        .unwrap();
    stream
        .write_all(&Envelope::new(sink_uid, json!({"ok": true})).to_line().unwrap())
        .unwrap();
    stream.flush().unwrap();

    let msg = received.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(msg.get("ok"), Some(&Message::Bool(true)));

    wait_until("two failures", || b.failures.lock().len() >= 2);
    assert_eq!(
        b.failure_kinds(),
        vec![FailureKind::MalformedEnvelope, FailureKind::UnknownUid]
    );
    assert_eq!(b.transport.metrics().malformed_frames, 1);
}

#[test_log::test]
fn test_stop_closes_listener() {
    let io = tokio_runtime();
    let b = Node::new("b", &io, TcpSettings::default());
    let port = b.port();
    assert_eq!(b.transport.local_addrs().len(), 1);

    b.membrane.stop();
    assert!(b.transport.local_addrs().is_empty());

    wait_until("listener to close", || {
        std::net::TcpStream::connect(("127.0.0.1", port)).is_err()
    });
}
