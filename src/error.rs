use thiserror::Error;

/// Failures reported by a [`crate::page::Page`] implementation.
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// The document hosting the run went away (reload, navigation, closed tab).
    #[error("execution context destroyed")]
    ContextDestroyed,
    #[error("element reference {0} is no longer attached")]
    StaleElement(u64),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("random data provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Failures of a single step. These become `ERROR` events, never crashes.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("timed out after {timeout_ms} ms waiting for selector: {selector}")]
    ElementNotFound { selector: String, timeout_ms: u64 },
    #[error("option not found ({0})")]
    OptionNotFound(String),
    #[error("unknown step type: {0}")]
    UnknownStepType(String),
    #[error(transparent)]
    Page(#[from] PageError),
}

impl StepError {
    pub fn is_context_loss(&self) -> bool {
        matches!(self, StepError::Page(PageError::ContextDestroyed))
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed stored record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("a macro is already running")]
    AlreadyRunning,
    #[error("nothing to resume")]
    NothingToResume,
    #[error(transparent)]
    StorageUnavailable(#[from] StorageError),
    #[error("execution context is gone")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("run {run} failed: {error}")]
    RunFailed { run: u32, error: String },
    #[error("gave up after {0} reconnect attempts")]
    TooManyResumes(u32),
    #[error(transparent)]
    Runner(#[from] RunnerError),
}
