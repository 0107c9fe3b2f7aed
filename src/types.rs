use serde::{Deserialize, Deserializer, Serialize};

use crate::random::RandomPreset;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_HIGHLIGHT_MS: u64 = 800;
pub const DEFAULT_KEY: &str = "Enter";

/// A named, ordered list of steps plus the options they run with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Macro {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub options: RunOptions,
}

/// A single UI action replayed against the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Step {
    Wait {
        #[serde(default)]
        ms: u64,
    },
    WaitFor {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Click {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    Type {
        selector: String,
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        random_preset: Option<RandomPreset>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fake: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    SelectOption {
        selector: String,
        #[serde(
            default,
            deserialize_with = "loose_string",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
    PressKey {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    Navigate {
        url: String,
    },
    #[serde(other)]
    Unknown,
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Wait { .. } => "wait",
            Step::WaitFor { .. } => "waitFor",
            Step::Click { .. } => "click",
            Step::Type { .. } => "type",
            Step::SelectOption { .. } => "selectOption",
            Step::PressKey { .. } => "pressKey",
            Step::Navigate { .. } => "navigate",
            Step::Unknown => "unknown",
        }
    }

    /// Navigation tears down the page context, so its checkpoint is taken early.
    pub fn is_navigation(&self) -> bool {
        matches!(self, Step::Navigate { .. })
    }

    /// Per-step timeout, falling back to the run default.
    pub fn timeout_ms(&self, options: &RunOptions) -> u64 {
        let own = match self {
            Step::WaitFor { timeout, .. }
            | Step::Click { timeout, .. }
            | Step::Type { timeout, .. }
            | Step::SelectOption { timeout, .. } => *timeout,
            _ => None,
        };
        own.unwrap_or(options.default_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    pub default_timeout: u64,
    pub highlight_ms: u64,
    pub fail_fast: bool,
    pub repeat: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT_MS,
            highlight_ms: DEFAULT_HIGHLIGHT_MS,
            fail_fast: true,
            repeat: 1,
        }
    }
}

impl RunOptions {
    pub fn repeat_count(&self) -> u32 {
        self.repeat.max(1)
    }
}

/// The persisted checkpoint: which macro, and the index of the next step to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub r#macro: Macro,
    #[serde(rename = "stepIndex", default, deserialize_with = "lenient_index")]
    pub step_index: usize,
}

impl RunState {
    pub fn new(r#macro: Macro, step_index: usize) -> Self {
        Self {
            r#macro,
            step_index,
        }
    }

    pub fn total(&self) -> usize {
        self.r#macro.steps.len()
    }
}

fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_index<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let index = value
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n as usize)
        .unwrap_or(0);
    Ok(index)
}
