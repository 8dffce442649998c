//! End-to-end cluster tests over real sockets.
//!
//! Each test wires two or three routers together through their HTTP
//! endpoints on ephemeral loopback ports and drives heartbeat cycles
//! manually, so outcomes are deterministic and no test depends on timers.
//!
//! | Scenario | Focus                                            |
//! |----------|--------------------------------------------------|
//! | 1        | Mutual handshake populates both secret tables    |
//! | 2        | Reflection classification and self-address vote  |
//! | 3        | Credential rejection leaves state untouched      |
//! | 4        | Sync recovery after a partition                  |
//! | 5        | Silent re-handshake after a dropped session      |
//! | 6        | Persistence round trip resumes heartbeats        |

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use dddns::handlers::serve_on;
use dddns::{PeerOptions, RouterConfig, RouterError, ServiceRouter};

const REST_PATH: &str = "/ddns";
const USERNAME: &str = "user";
const PASSWORD: &str = "123456";

/// One router plus its running HTTP endpoint.
struct TestNode {
    router: Arc<ServiceRouter>,
    addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl TestNode {
    /// Spawns a router with the shared test validator and serves it on an
    /// ephemeral loopback port.
    async fn spawn(uuid: &str) -> Self {
        let router = ServiceRouter::new(RouterConfig::new(uuid)).expect("router");
        router.set_validator(Arc::new(|user, pass| user == USERNAME && pass == PASSWORD));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = Arc::new(Notify::new());
        tokio::spawn(serve_on(
            listener,
            Arc::clone(&router),
            REST_PATH,
            Arc::clone(&shutdown),
        ));
        Self {
            router,
            addr,
            shutdown,
        }
    }

    /// Registers `other` in this node's peer table.
    fn register(&self, other: &TestNode) {
        self.router
            .add_peer(PeerOptions {
                uuid: other.router.device_uuid().to_string(),
                port: other.addr.port(),
                rest_path: REST_PATH.to_string(),
                require_tls: false,
            })
            .expect("add peer");
    }

    /// Registers `other` and completes the credential handshake to it.
    async fn connect(&self, other: &TestNode) -> String {
        self.register(other);
        self.router
            .start_session(
                other.router.device_uuid(),
                "127.0.0.1",
                USERNAME,
                PASSWORD,
            )
            .await
            .expect("handshake")
    }

    /// Stops the HTTP endpoint, making this node unreachable.
    async fn go_dark(&self) {
        self.shutdown.notify_one();
        // Let the server task observe the signal and drop the listener.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ════════════════════════════════════════════════════════════════════════
// SCENARIO 1: MUTUAL HANDSHAKE
// ════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mutual_handshake_populates_both_secret_tables() {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;

    let secret = a.connect(&b).await;
    assert_eq!(secret.len(), 8);
    assert_eq!(a.router.peer("b").expect("peer b").send_secret, secret);

    let issued_by_b = b.router.issued_secrets();
    assert_eq!(issued_by_b, vec![("a".to_string(), secret.clone())]);

    b.connect(&a).await;
    assert_eq!(a.router.issued_secrets().len(), 1);
    assert_eq!(b.router.issued_secrets().len(), 1);
    assert!(a.router.has_session("b"));
    assert!(b.router.has_session("a"));
    assert!(!b.router.peer("a").expect("peer a").send_secret.is_empty());
}

// ════════════════════════════════════════════════════════════════════════
// SCENARIO 2: HEARTBEAT REFLECTION AND SELF-ADDRESS VOTE
// ════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeat_reflects_source_and_votes_self_address() {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;
    a.connect(&b).await;
    b.connect(&a).await;

    let changes = Arc::new(Mutex::new(Vec::<String>::new()));
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let changes = Arc::clone(&changes);
        let fired = Arc::clone(&fired);
        a.router.set_address_change_listener(Arc::new(move |address| {
            fired.fetch_add(1, Ordering::SeqCst);
            changes.lock().push(address.to_string());
        }));
    }

    a.router.run_heartbeat_cycle().await;

    let peer_b = a.router.peer("b").expect("peer b");
    assert_eq!(peer_b.reflected_private, "127.0.0.1");
    assert!(peer_b.reflected_public.is_empty());
    assert_eq!(a.router.self_address(), "127.0.0.1");
    assert!(a.router.last_cycle_at() > 0);

    // The second cycle votes the same address; the listener stays at one
    // invocation.
    a.router.run_heartbeat_cycle().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(*changes.lock(), vec!["127.0.0.1".to_string()]);
}

// ════════════════════════════════════════════════════════════════════════
// SCENARIO 3: CREDENTIAL REJECTION
// ════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_credentials_leave_state_untouched() {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;

    let good_secret = a.connect(&b).await;

    let err = a
        .router
        .start_session("b", "127.0.0.1", USERNAME, "wrong")
        .await
        .expect_err("bad password");
    assert!(matches!(err, RouterError::Unauthorized));

    // Neither side lost or replaced anything.
    assert_eq!(a.router.peer("b").expect("peer b").send_secret, good_secret);
    assert_eq!(
        b.router.issued_secrets(),
        vec![("a".to_string(), good_secret)]
    );
}

// ════════════════════════════════════════════════════════════════════════
// SCENARIO 4: SYNC RECOVERY AFTER A PARTITION
// ════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partitioned_peer_address_recovers_through_third_party() {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;
    let c = TestNode::spawn("c").await;

    // Full mesh.
    a.connect(&b).await;
    a.connect(&c).await;
    b.connect(&a).await;
    b.connect(&c).await;
    c.connect(&a).await;
    c.connect(&b).await;

    // Baseline cycle records everyone as online.
    a.router.run_heartbeat_cycle().await;
    assert_eq!(a.router.peer("b").expect("peer b").retry_count, 0);

    // Partition a <-> b.
    b.go_dark().await;

    for expected_retries in 1..=3u32 {
        a.router.run_heartbeat_cycle().await;
        let peer_b = a.router.peer("b").expect("peer b");
        assert_eq!(peer_b.retry_count, expected_retries);
        assert!(peer_b.reflected_public.is_empty());
        assert!(peer_b.reflected_private.is_empty());
    }

    // Meanwhile c has learned b's new address out of band.
    c.router
        .update_peer_address("b", "127.0.0.2")
        .expect("update");

    // Cycle 4: a stops probing b directly and asks c instead.
    a.router.run_heartbeat_cycle().await;
    let peer_b = a.router.peer("b").expect("peer b");
    assert_eq!(peer_b.address, "127.0.0.2");
    assert_eq!(peer_b.retry_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sync_with_unchanged_address_waits_for_next_cycle() {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;
    let c = TestNode::spawn("c").await;

    a.connect(&b).await;
    a.connect(&c).await;
    c.connect(&a).await;
    c.register(&b);
    c.router
        .update_peer_address("b", "127.0.0.1")
        .expect("update");

    a.router.run_heartbeat_cycle().await;
    b.go_dark().await;
    for _ in 0..3 {
        a.router.run_heartbeat_cycle().await;
    }
    assert_eq!(a.router.peer("b").expect("peer b").retry_count, 3);

    // c still stores the address a already failed against, so the retry
    // counter stays parked at the threshold.
    a.router.run_heartbeat_cycle().await;
    let peer_b = a.router.peer("b").expect("peer b");
    assert_eq!(peer_b.address, "127.0.0.1");
    assert_eq!(peer_b.retry_count, 3);
}

// ════════════════════════════════════════════════════════════════════════
// SCENARIO 5: SILENT RE-HANDSHAKE
// ════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_session_is_rebuilt_silently() {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;
    a.connect(&b).await;

    // b forgets a's session out of band.
    b.router.end_session("a").expect("end session");
    assert!(!b.router.has_session("a"));

    // a's next probe answers 401; the retained credentials rebuild the
    // session without touching the retry counter.
    a.router.run_heartbeat_cycle().await;
    assert!(b.router.has_session("a"));
    assert_eq!(a.router.peer("b").expect("peer b").retry_count, 0);

    // The following probe goes through with the fresh secret.
    a.router.run_heartbeat_cycle().await;
    let peer_b = a.router.peer("b").expect("peer b");
    assert_eq!(peer_b.reflected_private, "127.0.0.1");
    assert_eq!(peer_b.retry_count, 0);
}

// ════════════════════════════════════════════════════════════════════════
// SCENARIO 6: PERSISTENCE ROUND TRIP
// ════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn saved_router_resumes_without_fresh_handshake() {
    init_tracing();
    let a = TestNode::spawn("a").await;
    let b = TestNode::spawn("b").await;
    a.connect(&b).await;
    b.connect(&a).await;
    a.router.run_heartbeat_cycle().await;

    let issued_by_a = a.router.issued_secrets();
    let issued_by_b = b.router.issued_secrets();
    let neighbours = a.router.neighbours();
    let document = a.router.to_json().expect("save");
    a.router.close();

    let restored = ServiceRouter::from_json(&document).expect("load");
    restored.set_validator(Arc::new(|user, pass| user == USERNAME && pass == PASSWORD));

    assert_eq!(restored.neighbours(), neighbours);
    assert_eq!(restored.issued_secrets(), issued_by_a);
    assert_eq!(restored.self_address(), "127.0.0.1");

    // Heartbeats resume against the persisted send secret; b issues
    // nothing new.
    Arc::clone(&restored).start_heartbeat().await;
    let peer_b = restored.peer("b").expect("peer b");
    assert_eq!(peer_b.reflected_private, "127.0.0.1");
    assert_eq!(peer_b.retry_count, 0);
    assert_eq!(b.router.issued_secrets(), issued_by_b);

    restored.stop_heartbeat();
    assert!(!restored.heartbeat_running());
}
