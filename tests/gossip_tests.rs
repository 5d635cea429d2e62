use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use collective::clock::{Clock, ManualClock};
use collective::codec::{JsonCodec, PayloadCodec};
use collective::error::Result;
use collective::gossip::MembershipListener;
use collective::pubsub::Message;
use collective::transport::{Connector, LocalNetwork, PeerClient};
use collective::{
    Collective, CollectiveKind, CollectiveSettings, Event, HostedMember, Member, MemberId,
};

const START: i64 = 1_700_000_000_000;

fn address(id: &str) -> String {
    format!("local://{}", id)
}

fn settings(id: &str, seeds: &[&str]) -> CollectiveSettings {
    CollectiveSettings::cluster("acme", address(id))
        .with_member(HostedMember::new(id, id.to_uppercase()))
        .with_seeds(seeds.iter().map(|s| address(s)))
}

fn node(network: &LocalNetwork, clock: &Arc<ManualClock>, conf: CollectiveSettings) -> Collective {
    let collective = Collective::builder(conf.clone())
        .connector(network.connector(&conf.address, conf.kind))
        .clock(clock.clone())
        .build()
        .unwrap();
    network.attach(collective.beacon());
    collective
}

/// Make `from` know about every member hosted by `to`
fn link(from: &Collective, to: &Collective) {
    from.beacon().merge_members(&to.beacon().hosted_members());
}

fn ids(collective: &Collective) -> Vec<String> {
    collective.members().iter().map(|m| m.id.to_string()).collect()
}

fn knows(collective: &Collective, id: &str) -> bool {
    collective.members().iter().any(|m| m.id.as_str() == id)
}

#[derive(Default)]
struct CountingListener {
    added: AtomicUsize,
    removed: AtomicUsize,
}

impl MembershipListener for CountingListener {
    fn member_added(&self, _kind: CollectiveKind, _member: &Member) {
        self.added.fetch_add(1, Ordering::SeqCst);
    }

    fn member_removed(&self, _kind: CollectiveKind, _member: &Member) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records every event pushed through it before handing it on
struct RecordingConnector {
    inner: Arc<dyn Connector>,
    sent: Arc<Mutex<Vec<(String, Event)>>>,
}

struct RecordingClient {
    address: String,
    inner: Arc<dyn PeerClient>,
    sent: Arc<Mutex<Vec<(String, Event)>>>,
}

impl Connector for RecordingConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn PeerClient>> {
        Ok(Arc::new(RecordingClient {
            address: address.to_string(),
            inner: self.inner.connect(address)?,
            sent: self.sent.clone(),
        }))
    }
}

#[async_trait]
impl PeerClient for RecordingClient {
    async fn members(&self) -> Result<Vec<Member>> {
        self.inner.members().await
    }

    async fn on_event(&self, event: Event) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((self.address.clone(), event.clone()));
        self.inner.on_event(event).await
    }
}

#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let b = node(&network, &clock, settings("b", &[]));
    let listener = Arc::new(CountingListener::default());
    b.add_listener(listener.clone());

    let member = Member::new("a", "A", address("a")).with_lease(START + 60_000);
    let event = Event::announce("acme", CollectiveKind::Cluster, vec![member], 3)
        .with_visited([MemberId::from("a")]);

    b.on_event(event.clone());
    let once = b.members();
    let pending = b.beacon().pending_events();

    b.on_event(event.clone());
    b.on_event(event);
    assert_eq!(b.members(), once);
    assert_eq!(b.beacon().pending_events(), pending);
    assert_eq!(listener.added.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cycle_bounds_relay_on_a_line() {
    // k + 2 nodes with fanout 1, each only knowing its successor
    let k = 3;
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let names = ["n0", "n1", "n2", "n3", "n4"];
    let nodes: Vec<Collective> = names
        .iter()
        .map(|name| {
            let mut conf = settings(name, &[]);
            conf.fanout = 1;
            conf.cycle = k;
            node(&network, &clock, conf)
        })
        .collect();
    for pair in nodes.windows(2) {
        link(&pair[0], &pair[1]);
    }

    nodes[0]
        .publish(&Message::new("ping", json!(1)))
        .unwrap()
        .settled()
        .await;
    for node in nodes.iter().skip(1) {
        node.beacon().process_events().settled().await;
    }

    assert_eq!(network.events_delivered(&address("n1")), 1);
    assert_eq!(network.events_delivered(&address("n2")), 1);
    assert_eq!(network.events_delivered(&address("n3")), 0);
    assert_eq!(network.events_delivered(&address("n4")), 0);
}

#[tokio::test]
async fn test_member_evicted_after_lease_runs_out() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &[]));
    let b = node(&network, &clock, settings("b", &[]));
    link(&a, &b);

    a.beacon().announce().settled().await;
    assert!(knows(&b, "a"));

    let lease = a.settings().lease_duration();
    clock.advance(lease - Duration::from_millis(1));
    assert_eq!(b.beacon().expire_members(), 0);
    assert!(knows(&b, "a"));

    clock.advance(Duration::from_millis(1));
    assert_eq!(b.beacon().expire_members(), 1);
    assert!(!knows(&b, "a"));
}

#[tokio::test]
async fn test_renewal_keeps_member_alive() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &[]));
    let b = node(&network, &clock, settings("b", &[]));
    link(&a, &b);

    let period = a.settings().renewal_period();
    for _ in 0..5 {
        a.beacon().announce().settled().await;
        clock.advance(period);
        b.beacon().expire_members();
        assert!(knows(&b, "a"));
    }
}

#[tokio::test]
async fn test_seed_bootstrap() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &["a"]));
    let b = node(&network, &clock, settings("b", &["a"]));

    // Sole seed is itself: announces and is done
    assert!(a.beacon().try_sync_seeds().await.is_some());

    b.beacon().try_sync_seeds().await.unwrap().settled().await;
    assert_eq!(ids(&a), vec!["a", "b"]);
    assert_eq!(ids(&b), vec!["a", "b"]);
}

#[tokio::test]
async fn test_seed_bootstrap_retries_until_seed_is_up() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &["a"]));
    let c = node(&network, &clock, settings("c", &["a"]));

    network.take_down(&address("a"));
    assert!(c.beacon().try_sync_seeds().await.is_none());
    assert!(!c.beacon().has_peers());

    network.bring_up(&address("a"));
    c.beacon().try_sync_seeds().await.unwrap().settled().await;
    assert!(knows(&c, "a"));
    assert!(knows(&a, "c"));
}

#[tokio::test]
async fn test_failing_peer_backs_off() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &[]));
    let b = node(&network, &clock, settings("b", &[]));
    link(&a, &b);
    let backoff = a.settings().backoff_interval;

    network.take_down(&address("b"));
    a.beacon().announce().settled().await;
    assert_eq!(a.frequencies()[0].failures, 1);

    // Still cooling down: not even attempted
    clock.advance(backoff - Duration::from_millis(1));
    assert!(a.beacon().announce().is_empty());
    assert_eq!(a.frequencies()[0].failures, 1);

    clock.advance(Duration::from_millis(1));
    a.beacon().announce().settled().await;
    assert_eq!(a.frequencies()[0].failures, 2);

    // Two failures double the cool-down
    clock.advance(backoff);
    assert!(a.beacon().announce().is_empty());

    network.bring_up(&address("b"));
    clock.advance(backoff);
    a.beacon().announce().settled().await;
    assert_eq!(a.frequencies()[0].failures, 0);
    assert!(knows(&b, "a"));
}

#[tokio::test]
async fn test_dead_peer_ceiling_caps_backoff() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let mut conf = settings("a", &[]);
    conf.backoff_interval = Duration::from_secs(30);
    conf.dead_peer_ceiling = Duration::from_secs(3);
    let a = node(&network, &clock, conf);
    let b = node(&network, &clock, settings("b", &[]));
    link(&a, &b);

    network.take_down(&address("b"));
    a.beacon().announce().settled().await;
    network.bring_up(&address("b"));

    clock.advance(Duration::from_secs(3));
    a.beacon().announce().settled().await;
    assert_eq!(a.frequencies()[0].failures, 0);
}

#[tokio::test]
async fn test_three_node_scenario() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let sent = Arc::new(Mutex::new(Vec::new()));

    let mut conf = settings("a", &[]);
    conf.fanout = 2;
    conf.cycle = 3;
    let recorder = Arc::new(RecordingConnector {
        inner: network.connector(&conf.address, conf.kind),
        sent: sent.clone(),
    });
    let a = Collective::builder(conf)
        .connector(recorder)
        .clock(clock.clone())
        .build()
        .unwrap();
    network.attach(a.beacon());
    let b = node(&network, &clock, settings("b", &[]));
    let c = node(&network, &clock, settings("c", &[]));
    link(&a, &b);
    link(&a, &c);

    a.beacon().announce().settled().await;
    assert!(knows(&b, "a"));
    assert!(knows(&c, "a"));

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    for (_, event) in sent.iter() {
        assert!((1..=2).contains(&event.cycle));
    }
}

#[tokio::test]
async fn test_anti_entropy_repairs_dropped_hop() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let build = |id: &str| {
        let mut conf = settings(id, &[]);
        conf.fanout = 2;
        conf.cycle = 3;
        node(&network, &clock, conf)
    };
    let (a, b, c) = (build("a"), build("b"), build("c"));
    link(&a, &b);
    link(&a, &c);
    link(&c, &b);
    network.cut(&address("a"), &address("c"));

    a.beacon().announce().settled().await;
    b.beacon().process_events().settled().await;
    assert!(knows(&b, "a"));
    assert!(!knows(&c, "a"));

    // One sync round through B
    clock.advance(c.settings().sync_interval);
    assert!(c.beacon().sync_once().await.unwrap());
    assert!(knows(&c, "a"));
}

#[tokio::test]
async fn test_membership_converges() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let names = ["n0", "n1", "n2", "n3", "n4", "n5"];
    let nodes: Vec<Collective> = names
        .iter()
        .map(|name| {
            let mut conf = settings(name, &["n0"]);
            conf.fanout = names.len();
            node(&network, &clock, conf)
        })
        .collect();

    for node in nodes.iter() {
        node.beacon().try_sync_seeds().await.unwrap().settled().await;
    }
    for node in nodes.iter() {
        node.beacon().process_events().settled().await;
        node.beacon().sync_once().await.unwrap();
    }

    let expected: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    for node in nodes.iter() {
        assert_eq!(ids(node), expected);
    }
}

#[tokio::test]
async fn test_shutdown_removes_members_from_peers() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &[]));
    let b = node(&network, &clock, settings("b", &[]));
    let listener = Arc::new(CountingListener::default());
    b.add_listener(listener.clone());
    link(&a, &b);
    link(&b, &a);

    a.shutdown().settled().await;
    assert_eq!(ids(&b), vec!["b"]);
    assert_eq!(listener.removed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_broadcast_reaches_subscribers_over_two_hops() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &[]));
    let b = node(&network, &clock, settings("b", &[]));
    let c = node(&network, &clock, settings("c", &[]));
    link(&a, &b);
    link(&b, &c);

    let hits = Arc::new(AtomicUsize::new(0));
    for collective in [&a, &b, &c] {
        let counter = hits.clone();
        collective.subscribe(
            "deploys",
            Arc::new(move |message: &Message| {
                assert_eq!(message.body["service"], "billing");
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }

    a.publish(&Message::new("deploys", json!({"service": "billing"})))
        .unwrap()
        .settled()
        .await;
    b.beacon().process_events().settled().await;
    c.beacon().process_events().settled().await;

    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_relay_survives_dedup_cache_pressure() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let mut conf = settings("b", &[]);
    conf.event_cache_capacity = 3;
    let b = node(&network, &clock, conf);
    let c = node(&network, &clock, settings("c", &[]));
    link(&b, &c);

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    c.subscribe(
        "deploys",
        Arc::new(move |_message: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    // More broadcasts arrive between two drains than b's cache can hold
    for n in 0..10 {
        let bytes = JsonCodec
            .encode(&Message::new("deploys", json!({"build": n})))
            .unwrap();
        b.on_event(
            Event::broadcast("acme", CollectiveKind::Cluster, bytes, 3)
                .with_visited([MemberId::from("a")]),
        );
    }
    assert_eq!(b.beacon().pending_events(), 10);

    b.beacon().process_events().settled().await;
    assert_eq!(b.beacon().pending_events(), 0);
    assert_eq!(network.events_delivered(&address("c")), 10);
    assert_eq!(hits.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_nested_collectives_forward_and_echo() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));

    let x_cluster = node(&network, &clock, settings("x-node", &[]));
    let mut fed = CollectiveSettings::federation("acme-fed", address("x-node"))
        .with_member(HostedMember::new("x-gw", "X gateway"));
    fed.cycle = 3;
    let x_federation = node(&network, &clock, fed);
    Collective::nest(&x_cluster, &x_federation).unwrap();

    let y_federation = node(
        &network,
        &clock,
        CollectiveSettings::federation("acme-fed", address("y"))
            .with_member(HostedMember::new("y-gw", "Y gateway")),
    );
    link(&x_federation, &y_federation);

    // A federation event arriving at the cluster endpoint is delivered to
    // the federation collective without being relayed
    let remote = Member::new("z-gw", "Z gateway", address("z")).with_lease(clock.now_millis() + 60_000);
    x_cluster.on_event(Event::announce(
        "acme-fed",
        CollectiveKind::Federation,
        vec![remote],
        3,
    ));
    assert!(knows(&x_federation, "z-gw"));
    assert!(!knows(&x_cluster, "z-gw"));
    assert_eq!(x_federation.beacon().pending_events(), 0);

    // A cluster announce is echoed into the federation and relayed there
    x_cluster.beacon().announce().settled().await;
    assert!(knows(&x_federation, "x-node"));
    assert!(knows(&y_federation, "x-node"));
}

#[tokio::test]
async fn test_start_and_shutdown_loops() {
    let network = LocalNetwork::new();
    let clock = Arc::new(ManualClock::new(START));
    let a = node(&network, &clock, settings("a", &["a"]));

    a.start().unwrap();
    assert!(a.start().is_err());
    a.shutdown().settled().await;
    tokio::time::timeout(Duration::from_secs(5), a.stopped())
        .await
        .unwrap();
}
