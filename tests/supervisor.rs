use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use macro_runner::controller::{Commander, Controller, RunnerEvent};
use macro_runner::error::SupervisorError;
use macro_runner::page::{MemoryElement, MemoryPage};
use macro_runner::storage::{MemoryStorage, RUN_STATE_KEY, Storage};
use macro_runner::supervisor::Supervisor;
use macro_runner::types::{Macro, RunOptions, RunState, Step};

fn page() -> Arc<MemoryPage> {
    let page = Arc::new(MemoryPage::new());
    page.insert("#add", MemoryElement::new("BUTTON"));
    page.insert("#q", MemoryElement::new("INPUT"));
    page
}

fn factory(
    page: &Arc<MemoryPage>,
    storage: &Arc<MemoryStorage>,
    opened: &Arc<AtomicUsize>,
) -> impl FnMut() -> (Commander, mpsc::Receiver<RunnerEvent>) + use<> {
    let page = page.clone();
    let storage = storage.clone();
    let opened = opened.clone();
    move || {
        opened.fetch_add(1, Ordering::SeqCst);
        Controller::new(page.clone(), storage.clone()).spawn()
    }
}

fn macro_of(steps: Vec<Step>, options: RunOptions) -> Macro {
    Macro {
        name: "nightly".into(),
        steps,
        options,
    }
}

fn click(selector: &str) -> Step {
    Step::Click {
        selector: selector.into(),
        timeout: Some(200),
    }
}

#[tokio::test(start_paused = true)]
async fn repeats_the_macro_with_a_pause_between_runs() {
    let page = page();
    let storage = Arc::new(MemoryStorage::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened));
    let options = RunOptions {
        repeat: 3,
        ..Default::default()
    };

    let mut done_runs = Vec::new();
    let started = Instant::now();
    let report = supervisor
        .run(macro_of(vec![click("#add")], options), |run, event| {
            if matches!(event, RunnerEvent::Done { .. }) {
                done_runs.push(run);
            }
        })
        .await
        .unwrap();

    assert_eq!(report.runs_completed, 3);
    assert_eq!(report.resumes, 0);
    assert_eq!(done_runs, vec![1, 2, 3]);
    assert!(started.elapsed() >= Duration::from_millis(600));
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn reconnects_and_resumes_after_navigation() {
    let page = page();
    page.destroy_context_on_navigate(true);
    let storage = Arc::new(MemoryStorage::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened));
    let m = macro_of(
        vec![
            click("#add"),
            Step::Navigate {
                url: "https://shop.test/checkout".into(),
            },
            Step::Type {
                selector: "#q".into(),
                text: "Via Roma 1".into(),
                random_preset: None,
                fake: None,
                timeout: None,
            },
        ],
        RunOptions::default(),
    );

    let mut states = Vec::new();
    let report = supervisor
        .run(m, |_, event| {
            if let RunnerEvent::State { step, .. } = event {
                states.push(*step);
            }
        })
        .await
        .unwrap();

    assert_eq!(report.runs_completed, 1);
    assert_eq!(report.resumes, 1);
    assert_eq!(states, vec![0, 2]);
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    assert_eq!(page.navigations().len(), 1);
    assert_eq!(page.value_of("#q").as_deref(), Some("Via Roma 1"));
    assert!(storage.snapshot(RUN_STATE_KEY).is_none());
}

#[tokio::test(start_paused = true)]
async fn reconnects_are_bounded() {
    let page = page();
    page.destroy_context_on_navigate(true);
    let storage = Arc::new(MemoryStorage::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened)).with_max_resumes(0);
    let m = macro_of(
        vec![Step::Navigate {
            url: "https://shop.test".into(),
        }],
        RunOptions::default(),
    );

    let err = supervisor.run(m, |_, _| {}).await.unwrap_err();
    assert!(matches!(err, SupervisorError::TooManyResumes(0)));
}

#[tokio::test(start_paused = true)]
async fn fail_fast_error_ends_the_sequence() {
    let page = page();
    let storage = Arc::new(MemoryStorage::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened));
    let options = RunOptions {
        repeat: 5,
        ..Default::default()
    };

    let err = supervisor
        .run(macro_of(vec![click("#gone")], options), |_, _| {})
        .await
        .unwrap_err();

    match err {
        SupervisorError::RunFailed { run, error } => {
            assert_eq!(run, 1);
            assert!(error.contains("#gone"), "{error}");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn skipped_errors_are_collected_when_not_fail_fast() {
    let page = page();
    let storage = Arc::new(MemoryStorage::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened));
    let options = RunOptions {
        fail_fast: false,
        repeat: 2,
        ..Default::default()
    };

    let report = supervisor
        .run(
            macro_of(vec![click("#gone"), click("#add")], options),
            |_, _| {},
        )
        .await
        .unwrap();

    assert_eq!(report.runs_completed, 2);
    assert_eq!(report.skipped_errors.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn a_skipped_error_before_a_reload_does_not_fail_the_run() {
    let page = page();
    page.destroy_context_on_navigate(true);
    let storage = Arc::new(MemoryStorage::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened));
    let options = RunOptions {
        fail_fast: false,
        ..Default::default()
    };
    let m = macro_of(
        vec![
            click("#gone"),
            Step::Navigate {
                url: "https://shop.test/checkout".into(),
            },
            Step::Type {
                selector: "#q".into(),
                text: "Via Roma 1".into(),
                random_preset: None,
                fake: None,
                timeout: None,
            },
        ],
        options,
    );

    let report = supervisor.run(m, |_, _| {}).await.unwrap();

    assert_eq!(report.runs_completed, 1);
    assert_eq!(report.resumes, 1);
    assert_eq!(report.skipped_errors.len(), 1);
    assert!(report.skipped_errors[0].contains("#gone"));
    assert_eq!(page.value_of("#q").as_deref(), Some("Via Roma 1"));
}

#[tokio::test(start_paused = true)]
async fn resume_picks_up_a_persisted_run() {
    let page = page();
    let storage = Arc::new(MemoryStorage::new());
    let state = RunState::new(
        macro_of(vec![click("#add"), click("#add")], RunOptions::default()),
        1,
    );
    storage
        .set(RUN_STATE_KEY, serde_json::to_value(&state).unwrap())
        .await
        .unwrap();
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened));

    let mut progress = 0;
    let report = supervisor
        .resume(|_, event| {
            if matches!(event, RunnerEvent::Progress { .. }) {
                progress += 1;
            }
        })
        .await
        .unwrap();

    assert_eq!(report.runs_completed, 1);
    assert_eq!(progress, 1);
}

#[tokio::test(start_paused = true)]
async fn resume_with_nothing_saved_fails() {
    let page = page();
    let storage = Arc::new(MemoryStorage::new());
    let opened = Arc::new(AtomicUsize::new(0));
    let mut supervisor = Supervisor::new(factory(&page, &storage, &opened));

    let err = supervisor.resume(|_, _| {}).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::RunFailed { ref error, .. } if error == "nothing to resume"
    ));
}
