//! The resumable execution engine.
//!
//! A [`Controller`] is one execution context: it owns a command queue, an
//! event queue, the run checkpoint store and the sequence cache. Runs execute
//! one at a time on their own task; the command loop stays responsive so
//! `STOP` and `TEST_STEP` are handled while a run is in flight.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checkpoint::Phase;
use crate::error::RunnerError;
use crate::executor::StepExecutor;
use crate::page::Page;
use crate::placeholder::PlaceholderResolver;
use crate::run_state::RunStateStore;
use crate::sequence::SequenceCache;
use crate::storage::Storage;
use crate::types::{Macro, RunOptions, RunState, Step};

pub const COMMAND_BUFFER: usize = 16;
pub const EVENT_BUFFER: usize = 64;

/// Progress reported to whoever invoked the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerEvent {
    State { step: usize, total: usize },
    Progress { step: usize, total: usize, label: String },
    /// `fatal` is set when the run ended on this error.
    Error {
        error: String,
        #[serde(default)]
        fatal: bool,
    },
    Done { total: usize },
}

/// Reply to a single previewed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestReport {
    TestSuccess { label: String },
    TestError { error: String },
}

#[derive(Debug)]
pub enum Command {
    Run(Macro),
    Resume,
    Stop,
    TestStep {
        step: Step,
        reply: oneshot::Sender<TestReport>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Done,
    Aborted,
    /// The context went away mid-run; a new context can `RESUME`.
    Suspended,
}

pub struct Controller {
    shared: Arc<Shared>,
}

struct Shared {
    executor: StepExecutor,
    run_state: RunStateStore,
    sequences: SequenceCache,
    phase: watch::Sender<RunPhase>,
    teardown: watch::Sender<bool>,
}

struct ActiveRun {
    interrupt: watch::Sender<Option<Interrupt>>,
    task: JoinHandle<()>,
}

/// Why a run was cut short from outside its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// `STOP`: the checkpoint is discarded.
    Stop,
    /// The context is closing: the checkpoint is kept for `RESUME`.
    Suspend,
}

impl Controller {
    pub fn new(page: Arc<dyn Page>, storage: Arc<dyn Storage>) -> Self {
        let sequences = SequenceCache::new(storage.clone());
        let executor = StepExecutor::new(page, PlaceholderResolver::new(sequences.clone()));
        let (phase, _) = watch::channel(RunPhase::Idle);
        let (teardown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                executor,
                run_state: RunStateStore::new(storage),
                sequences,
                phase,
                teardown,
            }),
        }
    }

    /// Starts the context. The event receiver yields `None` once the context
    /// is torn down.
    pub fn spawn(self) -> (Commander, mpsc::Receiver<RunnerEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let commander = Commander {
            commands: command_tx,
            phase: self.shared.phase.subscribe(),
        };
        tokio::spawn(self.command_loop(command_rx, event_tx));
        (commander, event_rx)
    }

    async fn command_loop(
        self,
        mut commands: mpsc::Receiver<Command>,
        events: mpsc::Sender<RunnerEvent>,
    ) {
        let mut teardown = self.shared.teardown.subscribe();
        let mut active: Option<ActiveRun> = None;
        let mut draining: Option<JoinHandle<()>> = None;

        loop {
            let command = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = teardown.changed() => break,
            };

            match command {
                Command::Run(m) => {
                    if self.is_busy() {
                        emit(&events, error_event(RunnerError::AlreadyRunning, false)).await;
                        continue;
                    }
                    drain(&mut draining).await;
                    info!(name = %m.name, steps = m.steps.len(), "starting macro");
                    active = Some(self.start(RunState::new(m, 0), events.clone()));
                }
                Command::Resume => {
                    if self.is_busy() {
                        emit(&events, error_event(RunnerError::AlreadyRunning, false)).await;
                        continue;
                    }
                    drain(&mut draining).await;
                    match self.shared.run_state.load().await {
                        Some(state) => {
                            info!(
                                name = %state.r#macro.name,
                                step_index = state.step_index,
                                "resuming macro"
                            );
                            active = Some(self.start(state, events.clone()));
                        }
                        None => {
                            self.shared.phase.send_replace(RunPhase::Idle);
                            emit(&events, error_event(RunnerError::NothingToResume, true)).await;
                        }
                    }
                }
                Command::Stop => {
                    if let Some(run) = active.take() {
                        run.interrupt.send_replace(Some(Interrupt::Stop));
                        draining = Some(run.task);
                    }
                    if self.is_busy() {
                        self.shared.phase.send_replace(RunPhase::Aborted);
                    }
                    self.shared.run_state.clear().await;
                    self.shared.sequences.flush().await;
                    info!("runner stopped");
                }
                Command::TestStep { step, reply } => {
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        let report = match shared.executor.perform(&step, &RunOptions::default()).await
                        {
                            Ok(outcome) => TestReport::TestSuccess {
                                label: outcome.label,
                            },
                            Err(e) => TestReport::TestError {
                                error: e.to_string(),
                            },
                        };
                        let _ = reply.send(report);
                    });
                }
            }
        }

        if let Some(run) = active.take() {
            run.interrupt.send_replace(Some(Interrupt::Suspend));
            draining = Some(run.task);
        }
        if self.is_busy() {
            self.shared.phase.send_replace(RunPhase::Suspended);
        }
        drain(&mut draining).await;
        self.shared.sequences.flush().await;
        debug!("execution context closed");
    }

    /// Single-flight guard: a run holds `Running` until it publishes its end.
    fn is_busy(&self) -> bool {
        *self.shared.phase.borrow() == RunPhase::Running
    }

    fn start(&self, state: RunState, events: mpsc::Sender<RunnerEvent>) -> ActiveRun {
        let (interrupt, interrupted) = watch::channel(None);
        self.shared.phase.send_replace(RunPhase::Running);
        let shared = self.shared.clone();
        let task = tokio::spawn(async move { shared.drive(state, interrupted, events).await });
        ActiveRun { interrupt, task }
    }
}

impl Shared {
    async fn drive(
        &self,
        start: RunState,
        interrupted: watch::Receiver<Option<Interrupt>>,
        events: mpsc::Sender<RunnerEvent>,
    ) {
        let total = start.total();
        let options = start.r#macro.options.clone();
        let first = start.step_index.min(total);
        let mut state = RunState {
            step_index: first,
            ..start
        };

        self.run_state.save(&state).await;
        emit(&events, RunnerEvent::State { step: first, total }).await;

        if first >= total {
            self.finish(&events, total).await;
            return;
        }

        for i in first..total {
            let step = state.r#macro.steps[i].clone();
            state = state.checkpointed(i, &step, Phase::Enter);
            self.run_state.save(&state).await;
            if step.is_navigation() {
                state = state.checkpointed(i, &step, Phase::Perform);
                self.run_state.save(&state).await;
            }
            if self.interrupted(&interrupted, i).await {
                return;
            }

            debug!(step = i, kind = step.kind(), "performing step");
            let result = self.executor.perform(&step, &options).await;
            if self.interrupted(&interrupted, i).await {
                return;
            }

            match result {
                Ok(outcome) => {
                    if !step.is_navigation() {
                        state = state.checkpointed(i, &step, Phase::Succeeded);
                        self.run_state.save(&state).await;
                        if self.interrupted(&interrupted, i).await {
                            return;
                        }
                    }
                    emit(
                        &events,
                        RunnerEvent::Progress {
                            step: i + 1,
                            total,
                            label: outcome.label,
                        },
                    )
                    .await;
                }
                Err(e) if e.is_context_loss() => {
                    info!(step = i, "execution context destroyed, suspending run");
                    self.phase.send_replace(RunPhase::Suspended);
                    self.teardown.send_replace(true);
                    return;
                }
                Err(e) => {
                    warn!(step = i, kind = step.kind(), "step failed: {e}");
                    let fail_fast = options.fail_fast;
                    state = state.checkpointed(i, &step, Phase::Failed { fail_fast });
                    self.run_state.save(&state).await;
                    if self.interrupted(&interrupted, i).await {
                        return;
                    }
                    let error = e.to_string();
                    if fail_fast {
                        self.sequences.flush().await;
                        self.phase.send_replace(RunPhase::Aborted);
                        emit(&events, RunnerEvent::Error { error, fatal: true }).await;
                        info!(step = i, "run aborted");
                        return;
                    }
                    emit(&events, RunnerEvent::Error { error, fatal: false }).await;
                }
            }
        }

        self.finish(&events, total).await;
    }

    /// A save can land after `STOP` cleared the checkpoint, so a stopped
    /// run clears it again on its way out.
    async fn interrupted(
        &self,
        interrupted: &watch::Receiver<Option<Interrupt>>,
        step: usize,
    ) -> bool {
        let Some(interrupt) = *interrupted.borrow() else {
            return false;
        };
        debug!(step, ?interrupt, "run interrupted");
        if interrupt == Interrupt::Stop {
            self.run_state.clear().await;
        }
        true
    }

    async fn finish(&self, events: &mpsc::Sender<RunnerEvent>, total: usize) {
        self.sequences.flush().await;
        self.run_state.clear().await;
        self.phase.send_replace(RunPhase::Done);
        emit(events, RunnerEvent::Done { total }).await;
        info!(total, "macro complete");
    }
}

/// Cloneable sending half of an execution context.
#[derive(Clone)]
pub struct Commander {
    commands: mpsc::Sender<Command>,
    phase: watch::Receiver<RunPhase>,
}

impl Commander {
    pub async fn run(&self, m: Macro) -> Result<(), RunnerError> {
        self.send(Command::Run(m)).await
    }

    pub async fn resume(&self) -> Result<(), RunnerError> {
        self.send(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<(), RunnerError> {
        self.send(Command::Stop).await
    }

    pub async fn test_step(&self, step: Step) -> Result<TestReport, RunnerError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::TestStep { step, reply }).await?;
        response.await.map_err(|_| RunnerError::Disconnected)
    }

    pub async fn send(&self, command: Command) -> Result<(), RunnerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RunnerError::Disconnected)
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Waits until the context publishes `wanted` (or closes).
    pub async fn wait_for_phase(&mut self, wanted: RunPhase) -> RunPhase {
        let seen = self.phase.wait_for(|p| *p == wanted).await.map(|p| *p);
        seen.unwrap_or_else(|_| *self.phase.borrow())
    }
}

async fn drain(draining: &mut Option<JoinHandle<()>>) {
    if let Some(task) = draining.take() {
        if let Err(e) = task.await {
            warn!("stopped run ended abnormally: {e}");
        }
    }
}

fn error_event(error: RunnerError, fatal: bool) -> RunnerEvent {
    RunnerEvent::Error {
        error: error.to_string(),
        fatal,
    }
}

async fn emit(events: &mpsc::Sender<RunnerEvent>, event: RunnerEvent) {
    if events.send(event).await.is_err() {
        debug!("event receiver dropped");
    }
}
