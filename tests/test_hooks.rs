use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use junction::Context;
use junction::dispatch::{Hook, HookPipeline, Stage, hook_fn};
use parking_lot::Mutex;

/// Appends its name to a shared log when called.
struct Record {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl Hook for Record {
    async fn call(&self, _ctx: &mut Context) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        self.log.lock().push(self.name.to_string());
        if self.fail {
            anyhow::bail!("{} failed", self.name);
        }
        Ok(())
    }
}

fn record(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn Hook> {
    Arc::new(Record {
        name,
        log: Arc::clone(log),
        fail,
    })
}

fn fault_counter(count: &Arc<AtomicUsize>, seen: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Hook> {
    let count = Arc::clone(count);
    let seen = Arc::clone(seen);
    Arc::new(hook_fn(move |ctx: &mut Context| {
        count.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = &ctx.fault {
            seen.lock().push(fault.to_string());
        }
        Ok(())
    }))
}

#[tokio::test]
async fn test_hooks_run_in_registration_order() {
    let pipeline = HookPipeline::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    pipeline.register(Stage::RequestReceived, record("a", &log, false));
    pipeline.register(Stage::RequestReceived, record("b", &log, false));
    pipeline.register(Stage::RequestReceived, record("c", &log, false));

    let mut ctx = Context::new();
    pipeline.execute(Stage::RequestReceived, &mut ctx).await;

    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_failing_hook_does_not_stop_the_stage() {
    let pipeline = HookPipeline::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let faults = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    pipeline.register(Stage::RequestReceived, record("first", &log, true));
    pipeline.register(Stage::RequestReceived, record("second", &log, false));
    pipeline.register(Stage::FaultRaised, fault_counter(&faults, &seen));

    let mut ctx = Context::new();
    pipeline.execute(Stage::RequestReceived, &mut ctx).await;

    assert_eq!(*log.lock(), vec!["first", "second"]);
    assert_eq!(faults.load(Ordering::SeqCst), 1);
    assert_eq!(*seen.lock(), vec!["first failed"]);
    // The fault is only visible during the fault pass
    assert!(ctx.fault.is_none());
}

#[tokio::test]
async fn test_fault_stage_failures_are_not_redirected() {
    let pipeline = HookPipeline::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    pipeline.register(Stage::FaultRaised, record("fault-a", &log, true));
    pipeline.register(Stage::FaultRaised, record("fault-b", &log, false));

    let mut ctx = Context::new();
    pipeline.execute(Stage::FaultRaised, &mut ctx).await;

    // Each fault hook ran exactly once, no recursive passes
    assert_eq!(*log.lock(), vec!["fault-a", "fault-b"]);
}

#[tokio::test]
async fn test_inline_mode_stops_at_first_failure() {
    let pipeline = HookPipeline::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    pipeline.register(Stage::ResponseReady, record("a", &log, false));
    pipeline.register(Stage::ResponseReady, record("b", &log, true));
    pipeline.register(Stage::ResponseReady, record("c", &log, false));

    let mut ctx = Context::new();
    let err = pipeline
        .execute_inline(Stage::ResponseReady, &mut ctx)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "b failed");
    assert_eq!(*log.lock(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_hooks_see_each_others_changes() {
    let pipeline = HookPipeline::new();
    pipeline.register(
        Stage::ResponseReady,
        Arc::new(hook_fn(|ctx: &mut Context| {
            ctx.set_header("X-Step", "1");
            Ok(())
        })),
    );
    pipeline.register(
        Stage::ResponseReady,
        Arc::new(hook_fn(|ctx: &mut Context| {
            let step = ctx.response_headers.get("X-Step").cloned().unwrap_or_default();
            ctx.set_header("X-Step", format!("{step}2"));
            Ok(())
        })),
    );

    let mut ctx = Context::new();
    pipeline.execute(Stage::ResponseReady, &mut ctx).await;

    assert_eq!(ctx.response_headers.get("X-Step").unwrap(), "12");
}

#[test]
fn test_stage_names() {
    assert_eq!(Stage::from_name("request-received"), Some(Stage::RequestReceived));
    assert_eq!(Stage::from_name("onRequest"), Some(Stage::RequestReceived));
    assert_eq!(Stage::from_name("onResponse"), Some(Stage::ResponseReady));
    assert_eq!(Stage::from_name("fault-raised"), Some(Stage::FaultRaised));
    assert_eq!(Stage::from_name("onError"), Some(Stage::FaultRaised));
    assert_eq!(Stage::from_name("onShutdown"), None);

    for stage in Stage::ALL {
        assert_eq!(Stage::from_name(stage.as_str()), Some(stage));
    }
}

#[test]
fn test_unknown_stage_name_is_ignored() {
    let pipeline = HookPipeline::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    assert!(!pipeline.register_named("onShutdown", record("x", &log, false)));
    assert!(pipeline.is_empty());

    assert!(pipeline.register_named("onRequest", record("y", &log, false)));
    assert_eq!(pipeline.len(Stage::RequestReceived), 1);
}
