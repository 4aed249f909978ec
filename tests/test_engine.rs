use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use junction::config::{BreakerConfig, EngineConfig};
use junction::dispatch::{Bundle, HookMode, Inbound, Protocol, ResponseSink, Stage};
use junction::server::{Adapter, ListenOptions};
use junction::{Context, DispatchError, Engine};
use parking_lot::Mutex;

#[derive(Default)]
struct Capture {
    responses: Mutex<Vec<(u16, String)>>,
}

impl Capture {
    fn take(&self) -> Vec<(u16, String)> {
        std::mem::take(&mut *self.responses.lock())
    }
}

#[async_trait]
impl ResponseSink for Capture {
    async fn send(&self, ctx: &Context) -> anyhow::Result<()> {
        let body = String::from_utf8_lossy(ctx.response_body.as_bytes()).into_owned();
        self.responses.lock().push((ctx.status, body));
        Ok(())
    }
}

fn request(method: &str, path: &str) -> Inbound {
    Inbound {
        method: Some(method.to_string()),
        path: Some(path.to_string()),
        ..Inbound::default()
    }
}

fn engine_with(hook_mode: HookMode) -> Arc<Engine> {
    let config = EngineConfig {
        hook_mode,
        ..EngineConfig::default()
    };
    let engine = Arc::new(Engine::new(&config));
    engine.install_write_back();
    engine
}

async fn send(engine: &Engine, sink: &Arc<Capture>, inbound: Inbound) -> Result<(), DispatchError> {
    let sink: Arc<dyn ResponseSink> = Arc::clone(sink) as Arc<dyn ResponseSink>;
    engine.handle_request(Protocol::Http1, inbound, Some(sink), None).await
}

#[tokio::test]
async fn test_routes_request_and_writes_back() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    engine.route_fn("GET", "/users/:id", |ctx| {
        let id = ctx.params[0].clone();
        ctx.set_status(201).set_body(format!("user {id}"));
        Ok(())
    });

    send(&engine, &sink, request("GET", "/users/42")).await.unwrap();

    assert_eq!(sink.take(), vec![(201, "user 42".to_string())]);
}

#[tokio::test]
async fn test_route_miss_is_404_with_empty_body() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());

    send(&engine, &sink, request("GET", "/missing")).await.unwrap();

    assert_eq!(sink.take(), vec![(404, String::new())]);
}

#[tokio::test]
async fn test_query_is_parsed_and_stripped() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    engine.route_fn("GET", "/search", |ctx| {
        let q = ctx.query.get("q").cloned().unwrap_or_default();
        let page = ctx.query.get("page").cloned().unwrap_or_default();
        ctx.set_body(format!("{q}:{page}"));
        Ok(())
    });

    send(&engine, &sink, request("GET", "/search?q=hello%20world&page=2"))
        .await
        .unwrap();

    assert_eq!(sink.take(), vec![(200, "hello world:2".to_string())]);
}

#[tokio::test]
async fn test_handler_fault_goes_to_fault_stage_not_breaker() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    let faults = Arc::new(Mutex::new(Vec::new()));

    engine.route_fn("GET", "/boom", |_ctx| anyhow::bail!("handler exploded"));
    let seen = Arc::clone(&faults);
    engine.hook_fn(Stage::FaultRaised, move |ctx| {
        if let Some(fault) = &ctx.fault {
            seen.lock().push(fault.to_string());
        }
        ctx.set_status(500);
        Ok(())
    });

    for _ in 0..10 {
        send(&engine, &sink, request("GET", "/boom")).await.unwrap();
    }

    assert_eq!(faults.lock().len(), 10);
    assert_eq!(faults.lock()[0], "handler exploded");
    assert_eq!(sink.take()[0], (500, String::new()));
    assert_eq!(engine.breaker().failures(), 0);
}

#[tokio::test]
async fn test_handler_panic_is_a_handler_fault() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    let faults = Arc::new(AtomicUsize::new(0));

    engine.route_fn("GET", "/panic", |_ctx| panic!("handler panicked on purpose"));
    let count = Arc::clone(&faults);
    engine.hook_fn(Stage::FaultRaised, move |_ctx| {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    send(&engine, &sink, request("GET", "/panic")).await.unwrap();

    assert_eq!(faults.load(Ordering::SeqCst), 1);
    assert_eq!(engine.breaker().failures(), 0);
    assert_eq!(sink.take().len(), 1);
}

#[tokio::test]
async fn test_hook_panic_is_a_pipeline_fault() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    engine.hook_fn(Stage::RequestReceived, |_ctx| panic!("hook panicked on purpose"));

    let idle = engine.pool().idle();
    let err = send(&engine, &sink, request("GET", "/")).await.unwrap_err();

    assert!(matches!(err, DispatchError::Pipeline(_)));
    assert_eq!(engine.breaker().failures(), 1);
    // The abandoned context is not returned to the pool
    assert_eq!(engine.pool().idle(), idle - 1);
    assert!(sink.take().is_empty());
}

#[tokio::test]
async fn test_completed_context_returns_to_pool() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());

    let idle = engine.pool().idle();
    send(&engine, &sink, request("GET", "/")).await.unwrap();

    assert_eq!(engine.pool().idle(), idle);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_threshold_and_resets_after_cooldown() {
    let engine = engine_with(HookMode::Inline);
    let sink = Arc::new(Capture::default());
    let reached = Arc::new(AtomicUsize::new(0));
    let failing = Arc::new(AtomicBool::new(true));

    let count = Arc::clone(&reached);
    engine.hook_fn(Stage::RequestReceived, move |_ctx| {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let fail = Arc::clone(&failing);
    engine.hook_fn(Stage::RequestReceived, move |_ctx| {
        if fail.load(Ordering::SeqCst) {
            anyhow::bail!("downstream unavailable");
        }
        Ok(())
    });

    for _ in 0..5 {
        let err = send(&engine, &sink, request("GET", "/")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Pipeline(_)));
    }
    assert_eq!(engine.breaker().failures(), 5);
    assert!(engine.breaker().is_open());

    // Sixth request never reaches the hooks
    let err = send(&engine, &sink, request("GET", "/")).await.unwrap_err();
    assert!(matches!(err, DispatchError::CircuitOpen));
    assert_eq!(reached.load(Ordering::SeqCst), 5);

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(matches!(
        send(&engine, &sink, request("GET", "/")).await,
        Err(DispatchError::CircuitOpen)
    ));

    tokio::time::advance(Duration::from_secs(2)).await;
    failing.store(false, Ordering::SeqCst);
    send(&engine, &sink, request("GET", "/")).await.unwrap();

    assert_eq!(reached.load(Ordering::SeqCst), 6);
    assert_eq!(engine.breaker().failures(), 0);
    assert!(!engine.breaker().is_open());
}

#[test]
fn test_breaker_settings_come_from_config() {
    let config = EngineConfig {
        breaker: BreakerConfig {
            threshold: 2,
            cooldown_ms: 250,
        },
        ..EngineConfig::default()
    };
    let engine = Engine::new(&config);

    assert_eq!(engine.breaker().threshold(), 2);
    assert_eq!(engine.breaker().cooldown(), Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn test_first_request_after_cooldown_is_not_specially_evaluated() {
    let engine = engine_with(HookMode::Inline);
    let sink = Arc::new(Capture::default());
    engine.hook_fn(Stage::RequestReceived, |_ctx| anyhow::bail!("always failing"));

    for _ in 0..5 {
        let _ = send(&engine, &sink, request("GET", "/")).await;
    }
    tokio::time::advance(Duration::from_secs(11)).await;

    // Lets the request through and resets; its own failure counts from zero
    let err = send(&engine, &sink, request("GET", "/")).await.unwrap_err();
    assert!(matches!(err, DispatchError::Pipeline(_)));
    assert_eq!(engine.breaker().failures(), 1);
    assert!(!engine.breaker().is_open());
}

#[tokio::test]
async fn test_isolated_hook_failure_does_not_trip_breaker() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    engine.hook_fn(Stage::RequestReceived, |_ctx| anyhow::bail!("non-fatal"));
    engine.route_fn("GET", "/", |ctx| {
        ctx.set_body("still served");
        Ok(())
    });

    send(&engine, &sink, request("GET", "/")).await.unwrap();

    assert_eq!(sink.take(), vec![(200, "still served".to_string())]);
    assert_eq!(engine.breaker().failures(), 0);
}

#[tokio::test]
async fn test_payload_protocols_skip_routing_unless_a_hook_routes() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    let hits = Arc::new(AtomicUsize::new(0));

    let count = Arc::clone(&hits);
    engine.route_fn("MSG", "/echo", move |ctx| {
        count.fetch_add(1, Ordering::SeqCst);
        let body = ctx.body.clone();
        ctx.set_body(body);
        Ok(())
    });

    // Method and path are not copied for TCP
    let sink_dyn: Arc<dyn ResponseSink> = Arc::clone(&sink) as Arc<dyn ResponseSink>;
    engine
        .handle_request(Protocol::Tcp, request("MSG", "/echo"), Some(Arc::clone(&sink_dyn)), None)
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(sink.take(), vec![(200, String::new())]);

    engine.hook_fn(Stage::RequestReceived, |ctx| {
        if ctx.protocol == Some(Protocol::Tcp) {
            ctx.method = Some("MSG".to_string());
            ctx.path = Some("/echo".to_string());
        }
        Ok(())
    });
    engine
        .handle_request(Protocol::Tcp, Inbound::payload("ping"), Some(sink_dyn), None)
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(sink.take(), vec![(200, "ping".to_string())]);
}

#[tokio::test]
async fn test_completion_notifications() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    let mut completions = engine.subscribe();
    engine.route_fn("GET", "/boom", |_ctx| anyhow::bail!("nope"));

    send(&engine, &sink, request("GET", "/missing")).await.unwrap();
    send(&engine, &sink, request("GET", "/boom")).await.unwrap();

    let first = completions.recv().await.unwrap();
    assert_eq!(first.protocol, Protocol::Http1);
    assert_eq!(first.path.as_deref(), Some("/missing"));
    assert_eq!(first.status, 404);
    assert!(!first.faulted);

    let second = completions.recv().await.unwrap();
    assert!(second.faulted);
}

#[tokio::test]
async fn test_services_are_typed_and_last_registration_wins() {
    let engine = Engine::default();
    engine.register_service("greeting", "hello".to_string());
    engine.register_service("greeting", "hi".to_string());
    engine.register_service("answer", 42u64);

    assert_eq!(engine.service::<String>("greeting").as_deref().map(String::as_str), Some("hi"));
    assert_eq!(engine.service::<u64>("answer").as_deref(), Some(&42));
    assert!(engine.service::<u32>("answer").is_none());
    assert!(engine.service::<String>("missing").is_none());
}

#[tokio::test]
async fn test_bundle_plugin_registers_services_and_hooks() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());

    let plugin = Bundle::new("powered-by")
        .service("server-name", "junction".to_string())
        .hook(
            Stage::RequestReceived,
            junction::dispatch::hook_fn(|ctx| {
                ctx.set_header("X-Powered-By", "junction");
                ctx.set_body("from plugin");
                Ok(())
            }),
        );
    engine.register_plugin(&plugin);

    send(&engine, &sink, request("GET", "/missing")).await.unwrap();

    assert_eq!(engine.service::<String>("server-name").as_deref().map(String::as_str), Some("junction"));
    assert_eq!(sink.take(), vec![(404, "from plugin".to_string())]);
}

#[tokio::test]
async fn test_named_hook_registration() {
    let engine = Engine::default();

    assert!(engine.hook_named("onResponse", junction::dispatch::hook_fn(|_ctx| Ok(()))));
    assert!(!engine.hook_named("beforeEverything", junction::dispatch::hook_fn(|_ctx| Ok(()))));
    assert_eq!(engine.hooks().len(Stage::ResponseReady), 1);
}

#[derive(Default)]
struct FakeAdapter {
    closed: AtomicUsize,
}

#[async_trait]
impl Adapter for FakeAdapter {
    async fn listen(&self, _engine: Arc<Engine>, port: u16, _options: &ListenOptions) -> anyhow::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_listen_requires_registered_protocol() {
    let engine = Arc::new(Engine::default());

    let err = engine.listen("quic", 0, &ListenOptions::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "Protocol quic not registered");

    engine.register_protocol("fake", Arc::new(FakeAdapter::default()));
    let addr = engine.listen("fake", 7000, &ListenOptions::default()).await.unwrap();
    assert_eq!(addr.port(), 7000);
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_drops_requests() {
    let engine = engine_with(HookMode::Isolated);
    let sink = Arc::new(Capture::default());
    let adapter = Arc::new(FakeAdapter::default());
    engine.register_protocol("fake", Arc::clone(&adapter) as Arc<dyn Adapter>);

    let hits = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&hits);
    engine.route_fn("GET", "/", move |_ctx| {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    engine.shutdown();
    engine.shutdown();

    assert!(engine.is_shutting_down());
    assert_eq!(adapter.closed.load(Ordering::SeqCst), 1);
    assert!(engine.pool().is_closed());

    send(&engine, &sink, request("GET", "/")).await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(sink.take().is_empty());
}
