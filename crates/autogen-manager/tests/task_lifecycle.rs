use autogen_core::model::{QueueStatus, TaskStatus};
use autogen_core::reconcile::{Fields, ReconcileMode};
use autogen_manager::dependency::{ArtifactSource, DependencyHandle, Export, NoUpstream};
use autogen_manager::error::Result;
use autogen_manager::manager::{Reconciled, TaskConfig, TaskManager, TaskPlan};
use autogen_manager::program::{Collected, FailureKind};
use autogen_manager::recovery::{RecoveryPolicy, RecoveryStep, Reseed};
use autogen_test_utils::fakes::{FakeBackend, ScriptedReader, TouchWriter};
use autogen_test_utils::harness::TestContext;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn config(value: serde_json::Value) -> TaskConfig {
    match value {
        serde_json::Value::Object(map) => TaskConfig::new(map),
        _ => panic!("expected an object"),
    }
}

fn task(
    ctx: &TestContext,
    name: &str,
    plan: TaskPlan,
    reader: &ScriptedReader,
    backend: &Arc<FakeBackend>,
) -> TaskManager {
    TaskManager::new(
        name,
        &ctx.job_dir("h2"),
        plan,
        Box::new(TouchWriter),
        Box::new(reader.clone()),
        ctx.environment(),
        backend.clone(),
    )
}

fn history(manager: &TaskManager) -> Vec<TaskStatus> {
    manager
        .load_record()
        .unwrap()
        .unwrap()
        .history
        .iter()
        .map(|t| t.status)
        .collect()
}

#[test]
fn test_tick_in_running_state_is_idempotent() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::new());
    backend.set_status(QueueStatus::Running);
    let reader = ScriptedReader::succeeding();
    let scf = task(&ctx, "scf", TaskPlan::default(), &reader, &backend);

    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    let first = std::fs::read(scf.record_path()).unwrap();
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    let second = std::fs::read(scf.record_path()).unwrap();
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    let third = std::fs::read(scf.record_path()).unwrap();

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(backend.submissions().len(), 1);
    assert_eq!(reader.calls(), 0);
}

#[test]
fn test_retries_are_bounded() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::executing());
    let reader = ScriptedReader::failing(FailureKind::Killed);
    let plan = TaskPlan {
        recovery: RecoveryPolicy {
            max_restarts: 3,
            steps: Vec::new(),
        },
        ..Default::default()
    };
    let scf = task(&ctx, "scf", plan, &reader, &backend);

    let mut status = TaskStatus::Unstaged;
    for _ in 0..20 {
        status = scf.nextstep(&NoUpstream, false).unwrap();
        if status == TaskStatus::Failed {
            break;
        }
    }

    assert_eq!(status, TaskStatus::Failed);
    assert_eq!(backend.submissions().len(), 4);
    assert_eq!(reader.calls(), 4);
    let record = scf.load_record().unwrap().unwrap();
    assert_eq!(record.retry_count, 3);

    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Failed);
    assert_eq!(backend.submissions().len(), 4);
}

#[test]
fn test_fail_fail_succeed_trace() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::executing());
    let reader = ScriptedReader::new(vec![
        Collected::failure(FailureKind::Diverged, "too many cycles"),
        Collected::failure(FailureKind::Killed, "walltime"),
        Collected::success(json!({"energy": -1.125})).with_artifact("log", "scf.out"),
    ]);
    let plan = TaskPlan {
        config: config(json!({"basis": "cc-pvdz"})),
        recovery: RecoveryPolicy {
            max_restarts: 2,
            steps: vec![RecoveryStep {
                label: Some("restart from checkpoint".into()),
                set: match json!({"restart": true}) {
                    serde_json::Value::Object(map) => map,
                    _ => Fields::new(),
                },
                reseed: Some(Reseed {
                    from: "fort.79".into(),
                    to: "fort.20".into(),
                }),
                temporary: false,
            }],
        },
        ..Default::default()
    };
    let scf = task(&ctx, "scf", plan, &reader, &backend);
    let dir = ctx.job_dir("h2");

    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    backend.push_statuses(&[QueueStatus::Running]);
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);

    std::fs::write(dir.join("fort.79"), "checkpoint").unwrap();
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    assert_eq!(std::fs::read_to_string(dir.join("fort.20")).unwrap(), "checkpoint");
    assert!(dir.join("0.fort.79").exists());
    let retried: serde_json::Value =
        serde_json::from_str(&ctx.read(&dir.join("scf.in"))).unwrap();
    assert_eq!(retried["config"]["restart"], json!(true));
    assert_eq!(retried["config"]["basis"], json!("cc-pvdz"));

    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Done);

    assert_eq!(
        history(&scf),
        vec![
            TaskStatus::Staged,
            TaskStatus::NotStarted,
            TaskStatus::Running,
            TaskStatus::ReadyForAnalysis,
            TaskStatus::Retrying,
            TaskStatus::Running,
            TaskStatus::ReadyForAnalysis,
            TaskStatus::Retrying,
            TaskStatus::Running,
            TaskStatus::ReadyForAnalysis,
            TaskStatus::Done,
        ]
    );
    for attempt in ["0", "1"] {
        assert!(dir.join(format!("{}.scf.in", attempt)).exists());
        assert!(dir.join(format!("{}.scf.out", attempt)).exists());
    }
    assert!(!dir.join("2.scf.out").exists());

    let record = scf.load_record().unwrap().unwrap();
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.reader.output["energy"], json!(-1.125));
    assert_eq!(record.external_job_ids(), vec!["1000", "1001", "1002"]);
    assert_eq!(reader.calls(), 3);
    // Recovery overrides are not part of the reconciled configuration.
    assert!(!record.config.contains_key("restart"));
}

#[test]
fn test_temporary_overrides_trigger_verification_run() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::executing());
    let reader = ScriptedReader::new(vec![
        Collected::failure(FailureKind::Diverged, "oscillating"),
        Collected::success(json!({"energy": -1.0})),
        Collected::success(json!({"energy": -1.1})),
    ]);
    let plan = TaskPlan {
        recovery: RecoveryPolicy {
            max_restarts: 5,
            steps: vec![RecoveryStep {
                label: Some("level shift".into()),
                set: match json!({"levshift": [10, 1]}) {
                    serde_json::Value::Object(map) => map,
                    _ => Fields::new(),
                },
                reseed: None,
                temporary: true,
            }],
        },
        ..Default::default()
    };
    let scf = task(&ctx, "scf", plan, &reader, &backend);
    let dir = ctx.job_dir("h2");

    scf.nextstep(&NoUpstream, false).unwrap();
    scf.nextstep(&NoUpstream, false).unwrap();
    let shifted: serde_json::Value = serde_json::from_str(&ctx.read(&dir.join("scf.in"))).unwrap();
    assert_eq!(shifted["config"]["levshift"], json!([10, 1]));

    // Success with the shift on reopens the task for a clean rerun.
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    let clean: serde_json::Value = serde_json::from_str(&ctx.read(&dir.join("scf.in"))).unwrap();
    assert!(clean["config"].get("levshift").is_none());

    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Done);
    let record = scf.load_record().unwrap().unwrap();
    assert_eq!(record.retry_count, 2);
    assert!(!record.diagnosis.needs_verification());
    assert_eq!(record.reader.output["energy"], json!(-1.1));
    assert!(history(&scf).contains(&TaskStatus::Done));
}

#[test]
fn test_refused_submission_is_retried_next_tick() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::new());
    backend.refuse_next(1);
    backend.set_status(QueueStatus::Running);
    let reader = ScriptedReader::succeeding();
    let scf = task(&ctx, "scf", TaskPlan::default(), &reader, &backend);

    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::NotStarted);
    let record = scf.load_record().unwrap().unwrap();
    assert_eq!(record.runner.pending.len(), 1);
    assert!(record.runner.job_ids.is_empty());

    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    let record = scf.load_record().unwrap().unwrap();
    assert!(record.runner.pending.is_empty());
    assert_eq!(backend.submissions().len(), 1);
}

struct Single<'a>(&'a TaskManager);

impl ArtifactSource for Single<'_> {
    fn export(&self, handle: &DependencyHandle) -> Result<Export> {
        assert_eq!(handle.upstream, self.0.name());
        self.0.export(&NoUpstream, &handle.artifact)
    }
}

#[test]
fn test_staging_waits_for_upstream_artifact() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::executing());
    backend.set_status(QueueStatus::Running);
    let upstream_reader = ScriptedReader::new(vec![
        Collected::success(json!({})).with_artifact("wavefunction", "scf.out")
    ]);
    let scf = task(&ctx, "scf", TaskPlan::default(), &upstream_reader, &backend);
    let opt_plan = TaskPlan {
        inputs: BTreeMap::from([(
            "guess".to_string(),
            DependencyHandle::new("scf", "wavefunction"),
        )]),
        ..Default::default()
    };
    let opt = task(&ctx, "opt", opt_plan, &ScriptedReader::succeeding(), &backend);

    assert_eq!(opt.nextstep(&Single(&scf), false).unwrap(), TaskStatus::Unstaged);
    assert_eq!(scf.status().unwrap(), TaskStatus::Running);
    assert_eq!(opt.nextstep(&Single(&scf), false).unwrap(), TaskStatus::Unstaged);
    assert!(!ctx.job_dir("h2").join("opt.in").exists());

    backend.set_status(QueueStatus::Finished);
    assert_eq!(opt.nextstep(&Single(&scf), false).unwrap(), TaskStatus::Running);
    assert_eq!(scf.status().unwrap(), TaskStatus::Done);

    let record = opt.load_record().unwrap().unwrap();
    assert_eq!(record.inputs["guess"], ctx.job_dir("h2").join("scf.out"));
}

fn wired_to(artifact: &str) -> TaskPlan {
    TaskPlan {
        inputs: BTreeMap::from([(
            "guess".to_string(),
            DependencyHandle::new("scf", artifact),
        )]),
        ..Default::default()
    }
}

#[test]
fn test_rewired_input_is_drift_once_staged() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::executing());
    backend.set_status(QueueStatus::Running);
    let upstream_reader = ScriptedReader::new(vec![Collected::success(json!({}))
        .with_artifact("wavefunction", "scf.out")
        .with_artifact("density", "scf.out")]);
    let scf = task(&ctx, "scf", TaskPlan::default(), &upstream_reader, &backend);
    let reader = ScriptedReader::succeeding();

    let opt = task(&ctx, "opt", wired_to("wavefunction"), &reader, &backend);
    assert_eq!(opt.nextstep(&Single(&scf), false).unwrap(), TaskStatus::Unstaged);

    // Nothing consumed the input yet, so the new wiring is adopted.
    let opt = task(&ctx, "opt", wired_to("density"), &reader, &backend);
    assert_eq!(opt.nextstep(&Single(&scf), false).unwrap(), TaskStatus::Unstaged);
    let record = opt.load_record().unwrap().unwrap();
    assert_eq!(record.wiring["input.guess"], json!("scf:density"));

    backend.set_status(QueueStatus::Finished);
    assert_eq!(opt.nextstep(&Single(&scf), false).unwrap(), TaskStatus::Running);
    assert_eq!(opt.nextstep(&Single(&scf), false).unwrap(), TaskStatus::Done);
    let record_path = ctx.job_dir("h2").join("opt.record.json");
    let before = ctx.read(&record_path);

    let rewired = task(&ctx, "opt", wired_to("wavefunction"), &reader, &backend);
    let err = rewired.nextstep(&Single(&scf), false).unwrap_err();
    assert!(err.is_drift());
    assert!(err.to_string().contains("input.guess"));
    assert_eq!(ctx.read(&record_path), before);

    assert_eq!(rewired.verify(true).unwrap(), Reconciled::Reset);
    let record = rewired.load_record().unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Unstaged);
    assert_eq!(record.wiring["input.guess"], json!("scf:wavefunction"));
}

#[test]
fn test_lenient_mode_keeps_recorded_value() {
    let ctx = TestContext::new();
    let backend = Arc::new(FakeBackend::executing());
    let reader = ScriptedReader::succeeding();
    let plan = |basis: &str| TaskPlan {
        config: config(json!({"basis": basis})),
        ..Default::default()
    };

    let scf = task(&ctx, "scf", plan("sto-3g"), &reader, &backend).with_mode(ReconcileMode::Lenient);
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Running);
    assert_eq!(scf.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Done);
    let record_path = ctx.job_dir("h2").join("scf.record.json");
    let before = ctx.read(&record_path);

    let edited =
        task(&ctx, "scf", plan("cc-pvtz"), &reader, &backend).with_mode(ReconcileMode::Lenient);
    assert_eq!(edited.nextstep(&NoUpstream, false).unwrap(), TaskStatus::Done);
    assert_eq!(ctx.read(&record_path), before);
    let record = edited.load_record().unwrap().unwrap();
    assert_eq!(record.config["basis"], json!("sto-3g"));
    assert_eq!(backend.submissions().len(), 1);

    let strict = task(&ctx, "scf", plan("cc-pvtz"), &reader, &backend);
    assert!(strict.nextstep(&NoUpstream, false).unwrap_err().is_drift());
}
