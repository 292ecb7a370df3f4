//! End-to-end scenarios driving the real runner binary
//!
//! Each test builds a `ScriptEngine` pointed at the compiled
//! `hooklet-worker` executable and runs scripts through the full pipeline:
//! transform, wrap, pooled worker process, invoke round-trips, merge.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use hooklet_config::EngineConfig;
use hooklet_engine::{
    ContextObject, ContextValue, EngineError, HostFunction, ModuleCatalog, ScriptContext,
    ScriptEngine, ScriptRequest, StaticModuleCatalog,
};

fn engine_config(max: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.pool.min = 1;
    config.pool.max = max;
    config.pool.acquire_timeout = Duration::from_secs(5);
    config.pool.runner.path = Some(env!("CARGO_BIN_EXE_hooklet-worker").into());
    config
}

fn engine(max: usize) -> ScriptEngine {
    engine_with_modules(max, StaticModuleCatalog::empty())
}

fn engine_with_modules(max: usize, modules: impl ModuleCatalog + 'static) -> ScriptEngine {
    ScriptEngine::new(engine_config(max), Arc::new(modules))
}

#[tokio::test]
async fn test_plain_arithmetic() {
    let engine = engine(2);
    let outcome = engine
        .execute(ScriptRequest::new("return 1 + 1;", ScriptContext::new()))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!(2));
    assert!(outcome.duration_ms >= 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_macro_shorthand_reads_context() {
    let engine = engine(2);
    let context = ScriptContext::new().with_json("$body", json!({"name": "Ann"}));
    let outcome = engine
        .execute(ScriptRequest::new("return @BODY.name;", context))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!("Ann"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_repository_shorthand_round_trips_through_host() {
    let users = ContextObject::new();
    users.set(
        "find",
        ContextValue::Function(HostFunction::from_sync(|args| {
            let id = args.first().and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(json!({"id": id, "name": "Ann"}))
        })),
    );
    let repos = ContextObject::new();
    repos.set("users", ContextValue::Object(Arc::new(users)));
    let context = ScriptContext::new().with("$repos", ContextValue::Object(Arc::new(repos)));

    let engine = engine(2);
    let outcome = engine
        .execute(ScriptRequest::new(
            "var user = #users.find(7);\nreturn user.id + \":\" + user.name;",
            context,
        ))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!("7:Ann"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_failing_callback_becomes_script_error() {
    let cache = ContextObject::new();
    cache.set(
        "get",
        ContextValue::Function(HostFunction::from_sync(|_| Err("backend down".to_string()))),
    );
    let context = ScriptContext::new().with("$cache", ContextValue::Object(Arc::new(cache)));

    let engine = engine(2);
    let err = engine
        .execute(ScriptRequest::new("return @CACHE.get(\"k\");", context))
        .await
        .unwrap_err();
    match err {
        EngineError::Script { message } => {
            assert!(message.contains("backend down"), "got: {}", message)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_timeout_kills_worker_and_pool_recovers() {
    let engine = engine(2);

    let err = engine
        .execute(
            ScriptRequest::new("while (true) {}", ScriptContext::new())
                .with_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { budget_ms: 200 }));

    // The runaway process is gone; the next request gets a fresh worker
    let outcome = engine
        .execute(ScriptRequest::new("return 42;", ScriptContext::new()))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!(42));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_timeout_enforced_during_host_callback() {
    let cache = ContextObject::new();
    cache.set(
        "get",
        ContextValue::Function(HostFunction::new(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(json!(null))
            })
        })),
    );
    let context = ScriptContext::new().with("$cache", ContextValue::Object(Arc::new(cache)));

    let engine = engine(2);
    let started = std::time::Instant::now();
    let err = engine
        .execute(
            ScriptRequest::new("return @CACHE.get(\"k\");", context)
                .with_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { budget_ms: 200 }));

    // The budget keeps running while the script waits on the host; the
    // error must not wait for the slow callback to finish
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "timeout surfaced only after {:?}",
        started.elapsed()
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_triggers_inside_literals_survive() {
    let engine = engine(2);
    let outcome = engine
        .execute(ScriptRequest::new(
            "// @BODY in a comment stays put\nreturn \"@BODY\" + '#users' + \"%moment\";",
            ScriptContext::new(),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!("@BODY#users%moment"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_mutations_merge_into_live_context() {
    let engine = engine(2);
    let context = ScriptContext::new()
        .with_json("$share", json!({"kept": 1}))
        .with_json("$statusCode", json!(200));

    engine
        .execute(ScriptRequest::new(
            "$share.seen = true; $statusCode = 404; return null;",
            context.clone(),
        ))
        .await
        .unwrap();

    let share = context.get("$share").map(|v| v.to_json_lossy());
    assert_eq!(share, Some(json!({"kept": 1, "seen": true})));
    let status = context.get("$statusCode").map(|v| v.to_json_lossy());
    assert_eq!(status, Some(json!(404)));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_module_shorthand_invokes_host_module() {
    let slugify = ContextObject::new();
    slugify.set(
        "slugify",
        ContextValue::Function(HostFunction::from_sync(|args| {
            let text = args.first().and_then(|v| v.as_str()).unwrap_or("");
            Ok(json!(text.to_lowercase().replace(' ', "-")))
        })),
    );
    let context =
        ScriptContext::new().with("$modules", ContextValue::Object(Arc::new(slugify)));

    let engine = engine_with_modules(2, StaticModuleCatalog::new(["slugify"]));
    let outcome = engine
        .execute(ScriptRequest::new(
            "return %slugify(\"Hello World\");",
            context,
        ))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!("hello-world"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_pool_bound_exhausts_under_pressure() {
    let mut config = engine_config(1);
    config.pool.acquire_timeout = Duration::from_millis(150);
    let engine = Arc::new(ScriptEngine::new(
        config,
        Arc::new(StaticModuleCatalog::empty()),
    ));

    // The only worker blocks inside a slow host callback
    let cache = ContextObject::new();
    cache.set(
        "get",
        ContextValue::Function(HostFunction::new(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(600)).await;
                Ok(json!(null))
            })
        })),
    );
    let slow_context = ScriptContext::new().with("$cache", ContextValue::Object(Arc::new(cache)));

    let busy = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute(ScriptRequest::new("return $cache.get(\"k\");", slow_context))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    let err = engine
        .execute(ScriptRequest::new("return 1;", ScriptContext::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PoolExhausted { .. }));

    busy.await.unwrap().unwrap();
    engine.shutdown().await;
}

#[tokio::test]
async fn test_timed_out_waiters_do_not_leak_capacity() {
    let mut config = engine_config(1);
    config.pool.acquire_timeout = Duration::from_millis(150);
    let engine = Arc::new(ScriptEngine::new(
        config,
        Arc::new(StaticModuleCatalog::empty()),
    ));

    let cache = ContextObject::new();
    cache.set(
        "get",
        ContextValue::Function(HostFunction::new(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(json!(null))
            })
        })),
    );
    let slow_context = ScriptContext::new().with("$cache", ContextValue::Object(Arc::new(cache)));

    let busy = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute(ScriptRequest::new("return $cache.get(\"k\");", slow_context))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Several waiters queue up and time out while the one worker is busy
    let mut waiters = Vec::new();
    for _ in 0..3 {
        let engine = engine.clone();
        waiters.push(tokio::spawn(async move {
            engine
                .execute(ScriptRequest::new("return 1;", ScriptContext::new()))
                .await
        }));
    }
    for waiter in waiters {
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::PoolExhausted { .. }));
    }
    busy.await.unwrap().unwrap();

    // The worker released by the busy request is still accounted for and
    // usable; no slot was lost with a dead waiter channel
    let stats = engine.pool_stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.idle, 1);
    let outcome = engine
        .execute(ScriptRequest::new("return 7;", ScriptContext::new()))
        .await
        .unwrap();
    assert_eq!(outcome.value, json!(7));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_requests_see_their_own_body() {
    let engine = Arc::new(engine(2));

    let mut handles = Vec::new();
    for name in ["Ann", "Bob", "Cid", "Dee"] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let context = ScriptContext::new().with_json("$body", json!({"name": name}));
            let outcome = engine
                .execute(ScriptRequest::new("return @BODY.name;", context))
                .await
                .unwrap();
            (name, outcome.value)
        }));
    }

    for handle in handles {
        let (name, value) = handle.await.unwrap();
        assert_eq!(value, json!(name));
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_start_prespawns_min_workers() {
    let engine = engine(3);
    engine.start().await.unwrap();
    let stats = engine.pool_stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.idle, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_execute_after_shutdown_is_rejected() {
    let engine = engine(2);
    engine.start().await.unwrap();
    engine.shutdown().await;
    let err = engine
        .execute(ScriptRequest::new("return 1;", ScriptContext::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PoolClosed));
}

#[tokio::test]
async fn test_worker_is_reused_across_executions() {
    let mut config = engine_config(1);
    config.pool.max = 1;
    let engine = ScriptEngine::new(config, Arc::new(StaticModuleCatalog::empty()));

    for i in 0..3 {
        let outcome = engine
            .execute(ScriptRequest::new(format!("return {};", i), ScriptContext::new()))
            .await
            .unwrap();
        assert_eq!(outcome.value, json!(i));
    }
    let stats = engine.pool_stats().await;
    assert_eq!(stats.total, 1);
    engine.shutdown().await;
}
