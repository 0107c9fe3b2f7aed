use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::controller::{Commander, RunnerEvent};
use crate::error::{RunnerError, SupervisorError};
use crate::types::Macro;

/// Pause between consecutive repetitions of a macro.
pub const REPEAT_PAUSE: Duration = Duration::from_millis(300);
pub const MAX_RESUMES_PER_RUN: u32 = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub runs_completed: u32,
    pub resumes: u32,
    /// Step errors that were skipped because the macro is not fail-fast.
    pub skipped_errors: Vec<String>,
}

struct Context {
    commander: Commander,
    events: mpsc::Receiver<RunnerEvent>,
}

/// The invoking side of the runner: repeats a macro and, when the execution
/// context is torn down mid-run, opens a new one and resumes.
pub struct Supervisor<F> {
    spawn_context: F,
    context: Option<Context>,
    max_resumes: u32,
}

impl<F> Supervisor<F>
where
    F: FnMut() -> (Commander, mpsc::Receiver<RunnerEvent>),
{
    pub fn new(spawn_context: F) -> Self {
        Self {
            spawn_context,
            context: None,
            max_resumes: MAX_RESUMES_PER_RUN,
        }
    }

    pub fn with_max_resumes(mut self, max_resumes: u32) -> Self {
        self.max_resumes = max_resumes;
        self
    }

    /// Runs `m` `options.repeat` times. The first failing run ends the sequence.
    pub async fn run<O>(&mut self, m: Macro, mut observer: O) -> Result<RunReport, SupervisorError>
    where
        O: FnMut(u32, &RunnerEvent),
    {
        let repeat = m.options.repeat_count();
        let mut report = RunReport::default();

        for run in 1..=repeat {
            info!(run, repeat, name = %m.name, "starting run");
            let sent = self.connect().commander.run(m.clone()).await;
            match sent {
                Err(RunnerError::Disconnected) => {
                    self.context = None;
                    self.connect().commander.run(m.clone()).await?;
                }
                other => other?,
            }
            self.follow(run, &mut report, &mut observer).await?;
            report.runs_completed += 1;

            if run < repeat {
                tokio::time::sleep(REPEAT_PAUSE).await;
            }
        }

        info!(name = %m.name, runs = report.runs_completed, "macro sequence complete");
        Ok(report)
    }

    /// Picks up a persisted run without starting a new one.
    pub async fn resume<O>(&mut self, mut observer: O) -> Result<RunReport, SupervisorError>
    where
        O: FnMut(u32, &RunnerEvent),
    {
        let mut report = RunReport::default();
        self.connect().commander.resume().await?;
        self.follow(1, &mut report, &mut observer).await?;
        report.runs_completed = 1;
        Ok(report)
    }

    /// Clears any persisted run and releases the runner.
    pub async fn stop(&mut self) -> Result<(), SupervisorError> {
        self.connect().commander.stop().await?;
        Ok(())
    }

    fn connect(&mut self) -> &mut Context {
        self.context.get_or_insert_with(|| {
            let (commander, events) = (self.spawn_context)();
            Context { commander, events }
        })
    }

    async fn follow<O>(
        &mut self,
        run: u32,
        report: &mut RunReport,
        observer: &mut O,
    ) -> Result<(), SupervisorError>
    where
        O: FnMut(u32, &RunnerEvent),
    {
        let mut resumes = 0;
        loop {
            let next = self.connect().events.recv().await;
            let Some(event) = next else {
                self.context = None;
                if resumes >= self.max_resumes {
                    return Err(SupervisorError::TooManyResumes(resumes));
                }
                resumes += 1;
                report.resumes += 1;
                info!(run, attempt = resumes, "execution context lost, resuming");
                self.connect().commander.resume().await?;
                continue;
            };

            observer(run, &event);
            match event {
                RunnerEvent::Done { .. } => return Ok(()),
                RunnerEvent::Error { error, fatal } => {
                    if fatal {
                        return Err(SupervisorError::RunFailed { run, error });
                    }
                    warn!(run, "step failed, continuing: {error}");
                    report.skipped_errors.push(error);
                }
                RunnerEvent::State { .. } | RunnerEvent::Progress { .. } => {}
            }
        }
    }
}
