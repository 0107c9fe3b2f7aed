//! Resumable browser macro runner.
//!
//! A macro is an ordered list of UI steps replayed against a live page. Runs
//! checkpoint their position after every step so that a run interrupted by
//! a page reload or navigation picks up where it left off.

pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod dom;
pub mod error;
pub mod executor;
pub mod face;
pub mod page;
pub mod placeholder;
pub mod random;
pub mod run_state;
pub mod sequence;
pub mod storage;
pub mod supervisor;
pub mod types;

pub use config::Config;
pub use controller::{Commander, Controller, RunPhase, RunnerEvent, TestReport};
pub use error::{PageError, RunnerError, StepError, StorageError, SupervisorError};
pub use page::{MemoryPage, Page};
pub use storage::{JsonFileStorage, MemoryStorage, Storage};
pub use supervisor::{RunReport, Supervisor};
pub use types::{Macro, RunOptions, RunState, Step};
