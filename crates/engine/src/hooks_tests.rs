// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::EventBus;
use sloth_adapters::{FakeBehavior, FakeInterpreter};
use sloth_core::test_support::hook_def;
use sloth_core::OutputTable;

fn setup(
    config: HookRunnerConfig,
) -> (EventBus, Arc<RegistryStore>, FakeInterpreter) {
    let store = Arc::new(RegistryStore::open_in_memory().unwrap());
    let interpreter = FakeInterpreter::new();
    let runner = HookRunner::new(Arc::clone(&store), interpreter.clone(), config);
    let (tx, _handle) = runner.spawn();
    let bus = EventBus::new(Arc::clone(&store)).with_hook_runner(tx);
    (bus, store, interpreter)
}

/// Poll until the predicate holds or a couple of seconds elapse.
async fn wait_until(mut pred: impl FnMut() -> bool) {
    for _ in 0..200 {
        if pred() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn fired_event() -> Event {
    Event::SystemStartup {
        version: "0.1.0".into(),
    }
}

#[tokio::test]
async fn matching_hook_runs_and_is_recorded() {
    let (bus, store, interpreter) = setup(HookRunnerConfig::default());
    store.put_hook(&hook_def("h", "system.*")).unwrap();

    bus.dispatch(&fired_event());

    wait_until(|| !store.list_hook_runs("h", 10).unwrap().is_empty()).await;
    let runs = store.list_hook_runs("h", 10).unwrap();
    assert_eq!(runs[0].status, HookRunStatus::Ok);
    assert_eq!(interpreter.call_count("return true"), 1);

    // The event payload was bound as params.
    let call = &interpreter.calls()[0];
    assert_eq!(call.params["tag"], "system.startup");
    assert_eq!(call.params["data"]["version"], "0.1.0");
}

#[tokio::test]
async fn burst_of_events_records_one_invocation_each() {
    // The wake channel is depth 1; the cursor over the log must still
    // deliver exactly one invocation attempt per dispatched event.
    let (bus, store, interpreter) = setup(HookRunnerConfig::default());
    store.put_hook(&hook_def("h", "*")).unwrap();

    for _ in 0..20 {
        bus.dispatch(&fired_event());
    }

    wait_until(|| store.list_hook_runs("h", 100).unwrap().len() == 20).await;
    assert_eq!(interpreter.call_count("return true"), 20);
}

#[tokio::test]
async fn non_matching_and_disabled_hooks_are_skipped() {
    let (bus, store, interpreter) = setup(HookRunnerConfig::default());
    store.put_hook(&hook_def("other", "task.*")).unwrap();
    let mut disabled = hook_def("disabled", "system.*");
    disabled.enabled = false;
    store.put_hook(&disabled).unwrap();

    bus.dispatch(&fired_event());

    // Give fanout a moment; nothing should run.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(interpreter.calls().is_empty());
    assert!(store.list_hook_runs("other", 10).unwrap().is_empty());
    assert!(store.list_hook_runs("disabled", 10).unwrap().is_empty());
}

#[tokio::test]
async fn failing_hook_is_auto_disabled_after_threshold() {
    let config = HookRunnerConfig {
        auto_disable_after: 2,
        ..Default::default()
    };
    let (bus, store, interpreter) = setup(config);
    store.put_hook(&hook_def("flaky", "system.*")).unwrap();
    interpreter.fail("return true", "boom");

    bus.dispatch(&fired_event());
    bus.dispatch(&fired_event());

    wait_until(|| !store.get_hook("flaky").unwrap().enabled).await;

    let runs = store.list_hook_runs("flaky", 10).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == HookRunStatus::Failed));

    // The disable itself is on the event log.
    wait_until(|| {
        store
            .list_events(Some("hook.disabled"), 10)
            .unwrap()
            .len()
            == 1
    })
    .await;
}

#[tokio::test]
async fn success_resets_the_failure_streak() {
    let config = HookRunnerConfig {
        auto_disable_after: 2,
        ..Default::default()
    };
    let (bus, store, interpreter) = setup(config);
    store.put_hook(&hook_def("h", "system.*")).unwrap();

    interpreter.fail("return true", "boom");
    bus.dispatch(&fired_event());
    wait_until(|| store.list_hook_runs("h", 10).unwrap().len() == 1).await;

    interpreter.succeed_with("return true", OutputTable::new());
    bus.dispatch(&fired_event());
    wait_until(|| store.list_hook_runs("h", 10).unwrap().len() == 2).await;

    interpreter.fail("return true", "boom again");
    bus.dispatch(&fired_event());
    wait_until(|| store.list_hook_runs("h", 10).unwrap().len() == 3).await;

    // One failure, one success, one failure: streak never reached 2.
    assert!(store.get_hook("h").unwrap().enabled);
}

#[tokio::test]
async fn hung_hook_times_out() {
    let config = HookRunnerConfig {
        hook_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let (bus, store, interpreter) = setup(config);
    store.put_hook(&hook_def("slow", "system.*")).unwrap();
    interpreter.hang("return true");

    bus.dispatch(&fired_event());

    wait_until(|| !store.list_hook_runs("slow", 10).unwrap().is_empty()).await;
    let runs = store.list_hook_runs("slow", 10).unwrap();
    assert_eq!(runs[0].status, HookRunStatus::Timeout);
}

#[tokio::test]
async fn invocations_of_one_hook_are_serialized() {
    let (bus, store, interpreter) = setup(HookRunnerConfig::default());
    store.put_hook(&hook_def("h", "system.*")).unwrap();
    interpreter.behave(
        "return true",
        FakeBehavior::Slow(Duration::from_millis(50)),
    );

    bus.dispatch(&fired_event());
    bus.dispatch(&fired_event());
    bus.dispatch(&fired_event());

    wait_until(|| store.list_hook_runs("h", 10).unwrap().len() == 3).await;
    let runs = store.list_hook_runs("h", 10).unwrap();
    // Most-recent-first; each run must start after the previous finished
    // (small slack for millisecond rounding).
    for pair in runs.windows(2) {
        let later = &pair[0];
        let earlier = &pair[1];
        assert!(
            later.started_at_ms + 5 >= earlier.started_at_ms + earlier.duration_ms,
            "overlapping runs: {:?}",
            runs
        );
    }
}

#[tokio::test]
async fn file_sourced_hook_loads_from_disk() {
    let (bus, store, interpreter) = setup(HookRunnerConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("hook.script");
    std::fs::write(&script_path, "notify()").unwrap();

    let mut def = hook_def("fs", "system.*");
    def.source = HookSource::File(script_path);
    store.put_hook(&def).unwrap();

    bus.dispatch(&fired_event());

    wait_until(|| !store.list_hook_runs("fs", 10).unwrap().is_empty()).await;
    assert_eq!(interpreter.call_count("notify()"), 1);
}

#[tokio::test]
async fn missing_script_file_records_failure() {
    let (bus, store, _interpreter) = setup(HookRunnerConfig::default());
    let mut def = hook_def("lost", "system.*");
    def.source = HookSource::File("/nonexistent/hook.script".into());
    store.put_hook(&def).unwrap();

    bus.dispatch(&fired_event());

    wait_until(|| !store.list_hook_runs("lost", 10).unwrap().is_empty()).await;
    let runs = store.list_hook_runs("lost", 10).unwrap();
    assert_eq!(runs[0].status, HookRunStatus::Failed);
    assert!(runs[0].error.as_deref().unwrap().contains("cannot load"));
}
