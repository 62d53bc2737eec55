#![cfg(unix)]

mod support;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fb_core::ErrorKind;
use fb_deploy::{ConfigValue, JournalDef};
use fb_server::{EvalConfig, EvalProgressEvent, EvalRequest, EvalStage, ModelServer};
use support::{DOUBLING, ECHO_END_TIME, FAILING, Fixture, eventually, read_pid};

fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
}

#[tokio::test]
async fn doubling_stub_returns_doubled_input() {
    let fx = Fixture::new("double");
    let server = fx.server(vec![fx.model("forward", DOUBLING)], 1, None);

    let response = server.evaluate(EvalRequest::new("forward", vec![34.6])).await.unwrap();

    assert_eq!(response.outputs.len(), 1);
    assert_close(response.outputs[0], 69.2);
    assert!(!response.partial);
    assert!(!response.reused);
    assert!(response.timing.total_s >= response.timing.solve_s);
    assert_eq!(server.workspaces().live_count(), 0);
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test]
async fn nonzero_exit_reports_the_solver_log() {
    let fx = Fixture::new("nonzero");
    let server = fx.server(vec![fx.model("forward", FAILING)], 1, None);

    let err = server.evaluate(EvalRequest::new("forward", vec![1.0])).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NonZeroExit);
    assert!(err.log().unwrap().contains("FOAM FATAL ERROR"));
    assert_eq!(server.workspaces().live_count(), 0);
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test]
async fn partial_results_are_opt_in() {
    let fx = Fixture::new("partial");
    let script = format!("{DOUBLING}\nexit 2");
    let mut model = fx.model("forward", &script);
    model.accept_partial_results = true;
    let server = fx.server(vec![model], 1, None);

    let response = server.evaluate(EvalRequest::new("forward", vec![2.0])).await.unwrap();

    assert!(response.partial);
    assert_close(response.outputs[0], 4.0);
}

#[tokio::test]
async fn sleeping_stub_times_out_without_orphans() {
    let fx = Fixture::new("timeout");
    let pid_file = fx.root.join("solver.pid");
    let mut model = fx.model("forward", "echo $$ > \"$PID_FILE\"; sleep 30 & sleep 30");
    model.solver.timeout_s = 0.5;
    model
        .solver
        .env
        .insert("PID_FILE".into(), pid_file.display().to_string());
    let server = fx.server(vec![model], 1, None);

    let started = Instant::now();
    let err = server.evaluate(EvalRequest::new("forward", vec![1.0])).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10));
    let pgid = read_pid(&pid_file).expect("solver wrote its pid");
    assert!(
        eventually(Duration::from_secs(3), || {
            !fb_runner::process::group_has_live_members(pgid)
        })
        .await
    );
    assert_eq!(server.workspaces().live_count(), 0);
}

#[tokio::test]
async fn request_timeout_only_shortens_the_deadline() {
    let fx = Fixture::new("clamp");
    let server = fx.server(vec![fx.model("forward", "sleep 30")], 1, None);

    let mut request = EvalRequest::new("forward", vec![1.0]);
    request.config = EvalConfig::with_timeout(Some(0.3));
    let started = Instant::now();
    let err = server.evaluate(request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn invalid_requests_touch_no_files() {
    let fx = Fixture::new("schema");
    let server = fx.server(vec![fx.model("forward", DOUBLING)], 1, None);

    let err = server.evaluate(EvalRequest::new("forward", vec![])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

    let err = server
        .evaluate(EvalRequest::new("forward", vec![1.0, 2.0]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

    let err = server.evaluate(EvalRequest::new("forward", vec![-5.0])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

    let err = server.evaluate(EvalRequest::new("backward", vec![1.0])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownModel);

    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_evaluations_stay_isolated() {
    let fx = Fixture::new("isolation");
    let script = format!("sleep 0.2\n{DOUBLING}");
    let server = Arc::new(fx.server(vec![fx.model("forward", &script)], 4, None));

    let inputs = [1.5, 2.5, 3.5, 4.5, 5.5, 6.5];
    let handles: Vec<_> = inputs
        .iter()
        .map(|&v| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { (v, server.evaluate(EvalRequest::new("forward", vec![v])).await) })
        })
        .collect();

    for handle in handles {
        let (input, result) = handle.await.unwrap();
        let response = result.unwrap();
        assert_close(response.outputs[0], input * 2.0);
    }
    assert_eq!(server.workspaces().live_count(), 0);
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_requests_complete_in_submission_order() {
    let fx = Fixture::new("fifo");
    let script = format!("sleep 0.2\n{DOUBLING}");
    let server = Arc::new(fx.server(vec![fx.model("forward", &script)], 1, None));
    let finished = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..4 {
        let server = Arc::clone(&server);
        let finished = Arc::clone(&finished);
        handles.push(tokio::spawn(async move {
            let result = server.evaluate(EvalRequest::new("forward", vec![i as f64])).await;
            finished.lock().unwrap().push(i);
            result
        }));
        // Space submissions so their queue order is unambiguous.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(*finished.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(server.workspaces().live_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_queue_wait_rejects_when_full() {
    let fx = Fixture::new("overload");
    let server = Arc::new(fx.server(
        vec![fx.model("slow", "sleep 1"), fx.model("forward", DOUBLING)],
        1,
        Some(0.0),
    ));

    let busy = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.evaluate(EvalRequest::new("slow", vec![1.0])).await })
    };
    assert!(eventually(Duration::from_secs(5), || server.workspaces().live_count() == 1).await);

    let err = server.evaluate(EvalRequest::new("forward", vec![1.0])).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Overloaded);

    // The slow model extracts nothing, so it fails once it finishes.
    let _ = busy.await.unwrap();
    assert_eq!(server.workspaces().live_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_in_flight_runs() {
    let fx = Fixture::new("shutdown");
    let server = Arc::new(fx.server(vec![fx.model("forward", "sleep 30")], 1, None));

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.evaluate(EvalRequest::new("forward", vec![1.0])).await })
    };
    assert!(eventually(Duration::from_secs(5), || server.workspaces().live_count() == 1).await);
    // Give the step a moment to be spawned.
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown();

    let err = tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("cancelled run returns promptly")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(server.workspaces().live_count(), 0);
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_request_releases_its_workspace() {
    let fx = Fixture::new("abandon");
    let pid_file = fx.root.join("solver.pid");
    let mut model = fx.model("forward", "echo $$ > \"$PID_FILE\"; sleep 30");
    model
        .solver
        .env
        .insert("PID_FILE".into(), pid_file.display().to_string());
    let server = Arc::new(fx.server(vec![model], 1, None));

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.evaluate(EvalRequest::new("forward", vec![1.0])).await })
    };
    assert!(eventually(Duration::from_secs(5), || read_pid(&pid_file).is_some()).await);
    let pgid = read_pid(&pid_file).unwrap();

    // What a client disconnect does to the handler future.
    running.abort();
    let _ = running.await;

    assert!(eventually(Duration::from_secs(5), || server.workspaces().live_count() == 0).await);
    assert!(
        eventually(Duration::from_secs(3), || {
            !fb_runner::process::group_has_live_members(pgid)
        })
        .await
    );
    assert!(eventually(Duration::from_secs(3), || fx.workspace_dirs().is_empty()).await);
}

/// Sample the pool until it drains, checking that no permit is returned
/// while a workspace directory is still on disk.
async fn drains_with_clean_disk(fx: &Fixture, server: &ModelServer) {
    let clean = eventually(Duration::from_secs(10), || {
        let live = server.workspaces().live_count();
        let dirs = fx.workspace_dirs();
        assert!(live > 0 || dirs.is_empty(), "pool drained with {dirs:?} still on disk");
        live == 0
    })
    .await;
    assert!(clean, "workspace never released");
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_dropped_mid_copy_leaves_no_workspace() {
    let fx = Fixture::new("abort_copy");
    fx.bulk_up_template(4000);
    let server = Arc::new(fx.server(vec![fx.model("forward", "sleep 30")], 1, None));

    let running = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.evaluate(EvalRequest::new("forward", vec![1.0])).await })
    };
    let give_up = Instant::now() + Duration::from_secs(10);
    while fx.live_case_dir().is_none() {
        assert!(Instant::now() < give_up, "case copy never started");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());

    drains_with_clean_disk(&fx, &server).await;

    // The permit came back with the directory.
    let workspace = tokio::time::timeout(
        Duration::from_secs(5),
        server.workspaces().acquire(fb_core::EvalId::new()),
    )
    .await
    .expect("slot is free again")
    .unwrap();
    workspace.release().await;
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_dropped_while_queued_holds_nothing() {
    let fx = Fixture::new("abort_queue");
    let server = Arc::new(fx.server(
        vec![fx.model("slow", "sleep 1"), fx.model("forward", DOUBLING)],
        1,
        None,
    ));

    let busy = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.evaluate(EvalRequest::new("slow", vec![1.0])).await })
    };
    assert!(eventually(Duration::from_secs(5), || server.workspaces().live_count() == 1).await);

    let queued = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.evaluate(EvalRequest::new("forward", vec![1.0])).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    queued.abort();
    assert!(queued.await.unwrap_err().is_cancelled());

    // Only the running request owns anything.
    assert_eq!(server.workspaces().live_count(), 1);
    assert_eq!(fx.workspace_dirs().len(), 1);

    let _ = busy.await.unwrap();
    drains_with_clean_disk(&fx, &server).await;

    // The abandoned place in the queue does not block later requests.
    let response = tokio::time::timeout(
        Duration::from_secs(10),
        server.evaluate(EvalRequest::new("forward", vec![2.0])),
    )
    .await
    .expect("queue moves on")
    .unwrap();
    assert_close(response.outputs[0], 4.0);
}

#[tokio::test]
async fn progress_follows_the_request_lifecycle() {
    let fx = Fixture::new("progress");
    let server = fx.server(vec![fx.model("forward", DOUBLING)], 1, None);

    let mut stages = Vec::new();
    server
        .evaluate_with_progress(
            EvalRequest::new("forward", vec![3.0]),
            Some(&mut |event: EvalProgressEvent| stages.push(event.stage)),
        )
        .await
        .unwrap();
    assert_eq!(
        stages,
        vec![
            EvalStage::Received,
            EvalStage::Instantiated,
            EvalStage::Executing,
            EvalStage::Succeeded,
            EvalStage::Released,
        ]
    );

    let mut stages = Vec::new();
    let _ = server
        .evaluate_with_progress(
            EvalRequest::new("forward", vec![]),
            Some(&mut |event: EvalProgressEvent| stages.push(event.stage)),
        )
        .await;
    assert_eq!(stages, vec![EvalStage::Received, EvalStage::Failed, EvalStage::Released]);
    assert!(stages.last().unwrap().is_terminal());
}

#[tokio::test]
async fn journal_records_and_reuses_results() {
    let fx = Fixture::new("journal");
    let counter = fx.root.join("runs.count");
    let script = format!("echo run >> \"{}\"\n{DOUBLING}", counter.display());
    let mut deployment = fx.deployment(vec![fx.model("forward", &script)], 1, None);
    deployment.journal = Some(JournalDef {
        dir: fx.journal_dir(),
        reuse_results: true,
    });
    let server = ModelServer::from_deployment(deployment).unwrap();

    let first = server.evaluate(EvalRequest::new("forward", vec![10.0])).await.unwrap();
    let second = server.evaluate(EvalRequest::new("forward", vec![10.0])).await.unwrap();
    let other = server.evaluate(EvalRequest::new("forward", vec![11.0])).await.unwrap();

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(second.timing.solve_s, 0.0);
    assert!(!other.reused);
    assert_eq!(first.outputs, second.outputs);
    assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 2);

    let records = server.journal().unwrap().list("forward").unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.outputs().is_some()));
}

#[tokio::test]
async fn journal_keeps_failures_without_reusing_them() {
    let fx = Fixture::new("journal_fail");
    let mut deployment = fx.deployment(vec![fx.model("forward", FAILING)], 1, None);
    deployment.journal = Some(JournalDef {
        dir: fx.journal_dir(),
        reuse_results: true,
    });
    let server = ModelServer::from_deployment(deployment).unwrap();

    for _ in 0..2 {
        let err = server.evaluate(EvalRequest::new("forward", vec![1.0])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonZeroExit);
    }
    let records = server.journal().unwrap().list("forward").unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].outputs().is_none());
}

#[test]
fn startup_checks_reject_broken_deployments() {
    let fx = Fixture::new("startup");

    let mut missing_template = fx.model("forward", DOUBLING);
    missing_template.template = fx.root.join("no-such-case");
    let err = ModelServer::from_deployment(fx.deployment(vec![missing_template], 1, None))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DeploymentInvalid);

    let mut missing_program = fx.model("forward", DOUBLING);
    missing_program.solver.steps[0].program = "definitely-not-a-solver-binary".into();
    let err = ModelServer::from_deployment(fx.deployment(vec![missing_program], 1, None))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DeploymentInvalid);

    let mut missing_key = fx.model("forward", DOUBLING);
    missing_key.substitutions[0].locator = fb_deploy::LocatorDef::KeyPath {
        path: "viscosity".into(),
    };
    let err = ModelServer::from_deployment(fx.deployment(vec![missing_key], 1, None))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DeploymentInvalid);

    let err = ModelServer::from_deployment(fx.deployment(vec![fx.model("forward", DOUBLING)], 0, None))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::DeploymentInvalid);
}

#[test]
fn startup_removes_stale_workspaces() {
    let fx = Fixture::new("stale");
    std::fs::create_dir_all(fx.workspace_root().join("eval-deadbeef/case")).unwrap();

    let server = fx.server(vec![fx.model("forward", DOUBLING)], 1, None);

    assert!(fx.workspace_dirs().is_empty());
    assert_eq!(server.describe("forward").unwrap().input_size, 1);
}

#[tokio::test]
async fn reused_results_report_their_own_stage() {
    let fx = Fixture::new("journal_stage");
    let mut deployment = fx.deployment(vec![fx.model("forward", DOUBLING)], 1, None);
    deployment.journal = Some(JournalDef {
        dir: fx.journal_dir(),
        reuse_results: true,
    });
    let server = ModelServer::from_deployment(deployment).unwrap();
    server.evaluate(EvalRequest::new("forward", vec![5.0])).await.unwrap();

    let mut stages = Vec::new();
    let response = server
        .evaluate_with_progress(
            EvalRequest::new("forward", vec![5.0]),
            Some(&mut |event: EvalProgressEvent| stages.push(event.stage)),
        )
        .await
        .unwrap();

    assert!(response.reused);
    assert_eq!(
        stages,
        vec![
            EvalStage::Received,
            EvalStage::Reused,
            EvalStage::Succeeded,
            EvalStage::Released,
        ]
    );
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test]
async fn config_options_reach_the_case() {
    let fx = Fixture::new("config");
    let model = fx.with_end_time_option(fx.model("forward", ECHO_END_TIME));
    let server = fx.server(vec![model], 1, None);

    let defaulted = server.evaluate(EvalRequest::new("forward", vec![1.0])).await.unwrap();
    assert_close(defaulted.outputs[0], 100.0);

    let mut request = EvalRequest::new("forward", vec![1.0]);
    request.config = EvalConfig::default().set("end_time", ConfigValue::Integer(250));
    let overridden = server.evaluate(request).await.unwrap();
    assert_close(overridden.outputs[0], 250.0);

    let description = server.describe("forward").unwrap();
    assert_eq!(description.config.len(), 1);
    assert_eq!(description.config[0].name, "end_time");
}

#[tokio::test]
async fn bad_config_options_touch_no_files() {
    let fx = Fixture::new("config_bad");
    let model = fx.with_end_time_option(fx.model("forward", ECHO_END_TIME));
    let server = fx.server(vec![model, fx.model("plain", DOUBLING)], 1, None);

    let cases = [
        ("forward", "end_time", ConfigValue::Integer(0)),
        ("forward", "end_time", ConfigValue::Word("late".into())),
        ("forward", "mesh", ConfigValue::Word("fine".into())),
        ("plain", "end_time", ConfigValue::Integer(10)),
    ];
    for (model, name, value) in cases {
        let mut request = EvalRequest::new(model, vec![1.0]);
        request.config = EvalConfig::default().set(name, value);
        let err = server.evaluate(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch, "{model}.{name}");
    }
    assert!(fx.workspace_dirs().is_empty());
}

#[tokio::test]
async fn journal_keys_follow_the_effective_config() {
    let fx = Fixture::new("config_journal");
    let counter = fx.root.join("runs.count");
    let script = format!("echo run >> \"{}\"\n{ECHO_END_TIME}", counter.display());
    let model = fx.with_end_time_option(fx.model("forward", &script));
    let mut deployment = fx.deployment(vec![model], 1, None);
    deployment.journal = Some(JournalDef {
        dir: fx.journal_dir(),
        reuse_results: true,
    });
    let server = ModelServer::from_deployment(deployment).unwrap();
    let with_end_time = |end_time: i64| {
        let mut request = EvalRequest::new("forward", vec![1.0]);
        request.config = EvalConfig::default().set("end_time", ConfigValue::Integer(end_time));
        request
    };

    let implicit = server.evaluate(EvalRequest::new("forward", vec![1.0])).await.unwrap();
    let explicit = server.evaluate(with_end_time(100)).await.unwrap();
    let longer = server.evaluate(with_end_time(300)).await.unwrap();

    assert!(!implicit.reused);
    assert!(explicit.reused, "spelling out the default is the same case");
    assert!(!longer.reused);
    assert_close(longer.outputs[0], 300.0);
    assert_eq!(std::fs::read_to_string(&counter).unwrap().lines().count(), 2);

    let records = server.journal().unwrap().list("forward").unwrap();
    assert_eq!(records.len(), 2);
    let mut end_times: Vec<_> = records.iter().map(|r| r.config["end_time"].clone()).collect();
    end_times.sort_by_key(|v| v.as_i64());
    assert_eq!(end_times, vec![serde_json::json!(100), serde_json::json!(300)]);
}
