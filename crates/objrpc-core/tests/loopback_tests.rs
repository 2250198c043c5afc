//! End-to-end tests: proxies talking to an in-process server over the
//! loopback transport.

use objrpc::demo::{Counter, Database, DemoApi};
use objrpc::{
    Arg, ClientCache, ClientError, Loopback, Member, Peek, Proxy, ProxyBuilder, Registry, Reply,
    RpcErrorKind, Server, Transport, TransportError, NO_ARGS,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const BASE: &str = "mem://objrpc/api";

/// Loopback that counts the requests it carries and can be taken offline.
struct CountingTransport {
    inner: Loopback,
    posts: AtomicUsize,
    offline: AtomicBool,
}

impl CountingTransport {
    fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl Transport for CountingTransport {
    fn post(&self, endpoint: &str, body: &str) -> Result<String, TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::NoRoute(endpoint.to_string()));
        }
        self.posts.fetch_add(1, Ordering::SeqCst);
        self.inner.post(endpoint, body)
    }
}

struct Fixture {
    server: Arc<Server>,
    transport: Arc<CountingTransport>,
    root: Proxy,
}

impl Fixture {
    fn new() -> Self {
        Self::with_sqlrefs(false)
    }

    fn with_sqlrefs(enable: bool) -> Self {
        let registry = Arc::new(Registry::new());
        let api = DemoApi::new(&registry).unwrap();
        let server = Arc::new(Server::with_registry(registry, api).unwrap());
        let transport = Arc::new(CountingTransport {
            inner: Loopback::new(BASE, server.clone()),
            posts: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        });
        let root = ProxyBuilder::new(BASE)
            .transport(transport.clone())
            .cache(Arc::new(ClientCache::new()))
            .resolve_sqlrefs(enable)
            .connect()
            .unwrap();
        Self {
            server,
            transport,
            root,
        }
    }

    fn demo(&self) -> &DemoApi {
        self.server.api().downcast_ref::<DemoApi>().unwrap()
    }

    fn database(&self) -> &Database {
        self.demo().database().downcast_ref::<Database>().unwrap()
    }

    fn proxy(&self, name: &str) -> Proxy {
        self.root.get(name).unwrap().into_proxy().unwrap()
    }

    fn raw(&self, endpoint: &str, body: Value) -> Value {
        let text = self.transport.post(endpoint, &body.to_string()).unwrap();
        serde_json::from_str(&text).unwrap()
    }
}

#[test]
fn test_connect_fetches_root_interface() {
    let fx = Fixture::new();
    let interface = fx.root.interface().unwrap();
    assert_eq!(interface.name, "API");
    assert_eq!(fx.root.self_ref(), fx.server.root().token());
    assert_eq!(fx.root.member_names().unwrap(), vec!["api", "globals"]);
    assert_eq!(fx.transport.posts(), 1);
}

#[test]
fn test_connect_to_sub_path() {
    let fx = Fixture::new();
    let counter_id = fx.demo().counter().id();
    let counter = ProxyBuilder::new(BASE)
        .object(counter_id)
        .transport(fx.transport.clone())
        .cache(Arc::new(ClientCache::new()))
        .connect()
        .unwrap();
    assert_eq!(counter.id(), counter_id);
    assert_eq!(counter.endpoint(), format!("{}/{}", BASE, counter_id));
    assert_eq!(counter.call("increment", [3]).unwrap().as_i64(), Some(3));
}

#[test]
fn test_interface_never_lists_reserved_names() {
    let fx = Fixture::new();
    for name in ["api", "globals"] {
        let proxy = fx.proxy(name);
        let interface = proxy.interface().unwrap();
        for reserved in objrpc::interface::RESERVED_MEMBERS {
            assert!(!interface.has_func(reserved));
            assert!(!interface.has_attr(reserved));
        }
    }
}

#[test]
fn test_globals_echo_through_proxy() {
    let fx = Fixture::new();
    let globals = fx.proxy("globals");
    let echoed = globals.call("echo", ["x"]).unwrap();
    assert_eq!(echoed, Reply::Value(json!("x")));
}

#[test]
fn test_echo_envelope_on_the_wire() {
    let fx = Fixture::new();
    let resp = fx.raw(
        BASE,
        json!({"jsonrpc": "2.0", "id": 1, "method": "globals.echo", "params": ["x"]}),
    );
    assert_eq!(resp, json!({"jsonrpc": "2.0", "id": 1, "result": "x"}));
}

#[test]
fn test_unknown_member_fails_locally() {
    let fx = Fixture::new();
    let before = fx.transport.posts();
    let err = fx.root.call("noSuchThing", NO_ARGS).unwrap_err();
    assert!(matches!(err, ClientError::NoSuchMember { .. }));
    assert_eq!(fx.transport.posts(), before);

    let resp = fx.raw(
        BASE,
        json!({"jsonrpc": "2.0", "id": 1, "method": "noSuchThing", "params": []}),
    );
    assert_eq!(resp["error"]["code"], RpcErrorKind::MethodNotFound.code());
}

#[test]
fn test_batch_response_omits_notifications() {
    let fx = Fixture::new();
    let resp = fx.raw(
        BASE,
        json!([
            {"jsonrpc": "2.0", "id": 1, "method": "globals.echo", "params": [1]},
            {"jsonrpc": "2.0", "method": "globals.echo", "params": [2]},
            {"jsonrpc": "2.0", "id": 2, "method": "globals.echo", "params": [3]}
        ]),
    );
    let ids: Vec<&Value> = resp.as_array().unwrap().iter().map(|r| &r["id"]).collect();
    assert_eq!(ids, vec![&json!(1), &json!(2)]);
}

#[test]
fn test_returned_object_round_trips_to_proxy() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let counter = api.call("make_counter", [Arg::from("made"), Arg::from(7)]).unwrap();
    let counter = counter.into_proxy().unwrap();

    let registered = fx.server.registry().lookup(counter.id()).unwrap();
    assert_eq!(counter.self_ref(), registered.token());
    assert_eq!(registered.downcast_ref::<Counter>().unwrap().value(), 7);

    // described lazily, on first use
    assert_eq!(counter.get("value").unwrap().as_i64(), Some(7));
    assert_eq!(counter.interface().unwrap().name, "Counter");
}

#[test]
fn test_proxy_arguments_travel_as_references() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let counter = api.get("counter").unwrap().into_proxy().unwrap();
    assert_eq!(counter.self_ref(), fx.demo().counter().token());

    let class = api.call("class_of", [&counter]).unwrap();
    assert_eq!(class.as_str(), Some("Counter"));
}

#[test]
fn test_named_arguments() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let sum = api.call_named("add", [("b", 2), ("a", 40)]).unwrap();
    assert_eq!(sum.as_i64(), Some(42));

    let add = api.method("add").unwrap();
    assert_eq!(add.name(), "add");
    assert_eq!(add.call([1.5, 1.0]).unwrap(), Reply::Value(json!(2.5)));
}

#[test]
fn test_member_lookup() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    assert!(matches!(api.member("add").unwrap(), Member::Method(_)));
    match api.member("title").unwrap() {
        Member::Value(reply) => assert_eq!(reply.as_str(), Some("objrpc demo")),
        Member::Method(_) => panic!("title is an attribute"),
    }
    assert!(matches!(
        api.get("add").unwrap_err(),
        ClientError::MemberKind { .. }
    ));
    assert!(matches!(
        api.call("title", NO_ARGS).unwrap_err(),
        ClientError::MemberKind { .. }
    ));
}

#[test]
fn test_remote_exception_carries_original_type() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    let err = counter.call("fail", ["boom"]).unwrap_err();
    let ClientError::Remote(exc) = err else {
        panic!("expected a remote exception");
    };
    assert_eq!(exc.kind(), Some(RpcErrorKind::ApplicationError));
    assert_eq!(exc.exception, "ValueError");
    assert_eq!(exc.detail, "boom");
    assert_eq!(exc.to_string(), "ValueError: boom");
}

#[test]
fn test_attribute_fault_inside_method_reports_method_not_found() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    let err = counter.call("inspect", ["missing"]).unwrap_err();
    let ClientError::Remote(exc) = err else {
        panic!("expected a remote exception");
    };
    assert_eq!(exc.kind(), Some(RpcErrorKind::MethodNotFound));
    assert_eq!(exc.exception, "AttributeError");
}

#[test]
fn test_set_then_read_back() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    counter.set("label", "renamed").unwrap();
    assert_eq!(counter.get("label").unwrap().as_str(), Some("renamed"));

    let globals = fx.proxy("globals");
    let read = globals
        .call("getattr", [counter.self_ref(), "label".to_string()])
        .unwrap();
    assert_eq!(read.as_str(), Some("renamed"));
}

#[test]
fn test_dotted_set_through_parent() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    api.set("counter.value", 12).unwrap();
    assert_eq!(fx.demo().counter().downcast_ref::<Counter>().unwrap().value(), 12);
}

#[test]
fn test_assigning_a_method_is_refused_locally() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    counter.interface().unwrap();
    let before = fx.transport.posts();
    assert!(matches!(
        counter.set("increment", 1).unwrap_err(),
        ClientError::ImmutableMember { .. }
    ));
    assert!(matches!(
        counter.set("nonexistent", 1).unwrap_err(),
        ClientError::NoSuchMember { .. }
    ));
    assert_eq!(fx.transport.posts(), before);
}

#[test]
fn test_read_only_attribute_is_a_remote_error() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let err = api.set("database", 1).unwrap_err();
    let ClientError::Remote(exc) = err else {
        panic!("expected a remote exception");
    };
    assert_eq!(exc.exception, "AttributeError");
}

#[test]
fn test_object_attributes_are_cached_and_invalidated_on_set() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let counter = api.get("counter").unwrap().into_proxy().unwrap();
    let first = api.call("make_counter", ["first"]).unwrap().into_proxy().unwrap();
    let second = api.call("make_counter", ["second"]).unwrap().into_proxy().unwrap();

    counter.set("peer", &first).unwrap();
    assert_eq!(counter.get("peer").unwrap().into_proxy().unwrap(), first);

    let before = fx.transport.posts();
    assert_eq!(counter.get("peer").unwrap().into_proxy().unwrap(), first);
    assert_eq!(fx.transport.posts(), before, "cached proxy is served locally");

    counter.set("peer", &second).unwrap();
    assert_eq!(counter.get("peer").unwrap().into_proxy().unwrap(), second);
}

#[test]
fn test_dotted_set_invalidates_the_owning_object() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let counter = api.get("counter").unwrap().into_proxy().unwrap();
    let first = api.call("make_counter", ["first"]).unwrap().into_proxy().unwrap();
    let second = api.call("make_counter", ["second"]).unwrap().into_proxy().unwrap();

    counter.set("peer", &first).unwrap();
    assert_eq!(counter.get("peer").unwrap().into_proxy().unwrap(), first);

    api.set("counter.peer", &second).unwrap();
    let read_back = counter.get("peer").unwrap().into_proxy().unwrap();
    assert_eq!(read_back.self_ref(), second.self_ref());
}

#[test]
fn test_plain_attributes_are_not_cached() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    assert_eq!(counter.get("value").unwrap().as_i64(), Some(0));
    counter.call("increment", [5]).unwrap();
    assert_eq!(counter.get("value").unwrap().as_i64(), Some(5));
}

#[test]
fn test_flush_cache() {
    let fx = Fixture::new();
    fx.proxy("api");
    fx.proxy("globals");
    assert_eq!(fx.root.cache().attr_len(), 2);
    assert_eq!(fx.root.flush_cache(), 2);
    assert_eq!(fx.root.cache().attr_len(), 0);
}

#[test]
fn test_timestamps_are_iso_strings() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let now = api.call("now", NO_ARGS).unwrap();
    assert!(now.as_timestamp().is_some());

    let counter = api.get("counter").unwrap().into_proxy().unwrap();
    assert!(counter.get("created").unwrap().as_timestamp().is_some());
}

#[test]
fn test_batch_dependency_is_sent_once() {
    let fx = Fixture::new();
    let globals = fx.proxy("globals");
    globals.interface().unwrap();
    let before = fx.transport.posts();

    let mut batch = globals.batch();
    let first = batch.call("echo", [5]).unwrap();
    assert!(matches!(batch.peek(&first).unwrap(), Peek::Pending(_)));

    let second = batch.call("echo", [&first]).unwrap();
    let third = batch.call("echo", [&first]).unwrap();
    assert_eq!(fx.transport.posts() - before, 1, "dependency forced once");
    assert_eq!(batch.issued().count(), 1);
    assert_eq!(batch.pending().count(), 3);

    batch.commit().unwrap();
    assert_eq!(fx.transport.posts() - before, 2, "remainder sent as one batch");

    let expected = Reply::Value(json!(5));
    assert_eq!(batch.force(&first).unwrap(), expected);
    assert_eq!(batch.result(&second).unwrap(), expected);
    assert_eq!(batch.result(&third).unwrap(), expected);
    assert_eq!(fx.transport.posts() - before, 2);
}

#[test]
fn test_batch_dependencies_run_before_dependents() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    let mut batch = counter.batch();
    let bumped = batch.call("increment", [10]).unwrap();
    let again = batch.call("increment", [&bumped]).unwrap();
    batch.commit().unwrap();
    assert_eq!(batch.result(&bumped).unwrap().as_i64(), Some(10));
    assert_eq!(batch.result(&again).unwrap().as_i64(), Some(20));
}

#[test]
fn test_batch_outcomes_are_per_call() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    let mut batch = counter.batch();
    let failing = batch.call("fail", ["nope"]).unwrap();
    let fine = batch.call("increment", [1]).unwrap();
    batch.commit().unwrap();

    assert!(matches!(batch.result(&failing), Err(ClientError::Remote(_))));
    assert_eq!(batch.result(&fine).unwrap().as_i64(), Some(1));
    assert!(matches!(batch.peek(&fine).unwrap(), Peek::Done(Ok(_))));
}

#[test]
fn test_batch_results_decode_references() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let mut batch = api.batch();
    let made = batch.call("make_counter", ["batched"]).unwrap();
    batch.commit().unwrap();
    let proxy = batch.result(&made).unwrap().into_proxy().unwrap();
    assert_eq!(proxy.get("label").unwrap().as_str(), Some("batched"));
}

#[test]
fn test_dropped_batch_sends_nothing() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    counter.interface().unwrap();
    let before = fx.transport.posts();
    {
        let mut batch = counter.batch();
        batch.call("increment", [1]).unwrap();
        batch.call("increment", [1]).unwrap();
    }
    assert_eq!(fx.transport.posts(), before);
    assert_eq!(fx.demo().counter().downcast_ref::<Counter>().unwrap().value(), 0);
}

#[test]
fn test_with_batch_commits_only_on_success() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();

    let (thunk, batch) = counter
        .with_batch(|batch| batch.call("increment", [2]))
        .unwrap();
    assert_eq!(batch.result(&thunk).unwrap().as_i64(), Some(2));

    let failed = counter.with_batch(|batch| {
        batch.call("increment", [100])?;
        Err::<(), _>(ClientError::Protocol("abandon".to_string()))
    });
    assert!(failed.is_err());
    assert_eq!(fx.demo().counter().downcast_ref::<Counter>().unwrap().value(), 2);
}

#[test]
fn test_partial_effects_survive_abandoned_batch() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    let failed = counter.with_batch(|batch| {
        let dependency = batch.call("increment", [1])?;
        batch.call("increment", [&dependency])?;
        Err::<(), _>(ClientError::Protocol("abandon".to_string()))
    });
    assert!(failed.is_err());
    assert_eq!(fx.demo().counter().downcast_ref::<Counter>().unwrap().value(), 1);
}

#[test]
fn test_thunks_do_not_cross_batches() {
    let fx = Fixture::new();
    let globals = fx.proxy("globals");
    let mut one = globals.batch();
    let mut two = globals.batch();
    let thunk = one.call("echo", [1]).unwrap();
    assert!(matches!(
        two.call("echo", [&thunk]).unwrap_err(),
        ClientError::ForeignThunk
    ));
    assert!(matches!(
        globals.call("echo", [&thunk]).unwrap_err(),
        ClientError::ForeignThunk
    ));
}

#[test]
fn test_committed_batch_is_closed() {
    let fx = Fixture::new();
    let globals = fx.proxy("globals");
    let mut batch = globals.batch();
    batch.commit().unwrap();
    assert!(batch.is_committed());
    assert!(matches!(
        batch.call("echo", [1]).unwrap_err(),
        ClientError::Protocol(_)
    ));
}

#[test]
fn test_batch_stays_open_when_transport_fails() {
    let fx = Fixture::new();
    let counter = fx.proxy("api").get("counter").unwrap().into_proxy().unwrap();
    counter.interface().unwrap();
    let mut batch = counter.batch();
    let bumped = batch.call("increment", [4]).unwrap();

    fx.transport.set_offline(true);
    assert!(matches!(
        batch.commit().unwrap_err(),
        ClientError::Transport(TransportError::NoRoute(_))
    ));
    assert!(!batch.is_committed());
    assert!(matches!(batch.peek(&bumped).unwrap(), Peek::Pending(_)));

    fx.transport.set_offline(false);
    batch.commit().unwrap();
    assert!(batch.is_committed());
    assert_eq!(batch.result(&bumped).unwrap().as_i64(), Some(4));
    assert_eq!(fx.demo().counter().downcast_ref::<Counter>().unwrap().value(), 4);
}

#[test]
fn test_sqlref_lookup_happens_once_per_key() {
    let fx = Fixture::with_sqlrefs(true);
    let api = fx.proxy("api");
    let first = api.call("order", [10]).unwrap();
    let second = api.call("order", [10]).unwrap();
    let (first, second) = (first.as_record().unwrap(), second.as_record().unwrap());

    let before = fx.database().lookups();
    let a = first.get("customer").unwrap().unwrap();
    let b = second.get("customer").unwrap().unwrap();
    assert_eq!(fx.database().lookups() - before, 1);
    assert_eq!(a, b);
    assert_eq!(a.to_json()["name"], "Ada Lovelace");
    assert_eq!(first.get("item").unwrap().unwrap().as_str(), Some("lamp"));
    assert!(first.get("absent").unwrap().is_none());
}

#[test]
fn test_sqlref_multi_element_lookup_stays_a_list() {
    let fx = Fixture::with_sqlrefs(true);
    let api = fx.proxy("api");
    let order = api.call("order", [10]).unwrap();
    let watchers = order.as_record().unwrap().get("watchers").unwrap().unwrap();
    assert_eq!(watchers.as_list().map(<[Reply]>::len), Some(2));

    let order = api.call("order", [11]).unwrap();
    let watchers = order.as_record().unwrap().get("watchers").unwrap().unwrap();
    assert_eq!(watchers.as_list().map(<[Reply]>::len), Some(0));
}

#[test]
fn test_plain_proxies_leave_sqlrefs_alone() {
    let fx = Fixture::new();
    let api = fx.proxy("api");
    let order = api.call("order", [10]).unwrap();
    let raw = order.as_value().unwrap();
    assert_eq!(raw["customer"]["sqlref"]["name"], "customers");
}

#[test]
fn test_records_are_sent_back_by_reference() {
    let fx = Fixture::with_sqlrefs(true);
    let api = fx.proxy("api");
    let order = api.call("order", [11]).unwrap();
    let customer = order.as_record().unwrap().get("customer").unwrap().unwrap();
    assert_eq!(customer.to_json()["__meta__"]["name"], "customers");

    let resolved = api.call("dereference", [&customer]).unwrap();
    assert_eq!(resolved.to_json()["name"], "Grace Hopper");
}

#[test]
fn test_unparseable_body_is_a_parse_error_envelope() {
    let fx = Fixture::new();
    let text = fx.transport.post(BASE, "{not json").unwrap();
    let resp: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(resp["error"]["code"], RpcErrorKind::ParseError.code());
    assert_eq!(resp["id"], Value::Null);
}

#[test]
fn test_unknown_endpoint_is_a_transport_error() {
    let fx = Fixture::new();
    let err = ProxyBuilder::new("mem://elsewhere")
        .transport(fx.transport.clone())
        .cache(Arc::new(ClientCache::new()))
        .connect()
        .unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::NoRoute(_))));
}
