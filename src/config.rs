use std::env;
use std::path::PathBuf;

pub const DEFAULT_CHROME_URL: &str = "http://127.0.0.1:9222";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where run state and sequence counters are kept.
    pub state_dir: PathBuf,
    pub chrome_url: String,
    pub headless: bool,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            chrome_url: DEFAULT_CHROME_URL.to_string(),
            headless: false,
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads `MACRO_RUNNER_*` variables.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let state_dir = lookup("MACRO_RUNNER_STATE_DIR")
            .filter(|raw| !raw.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);
        let chrome_url = lookup("MACRO_RUNNER_CHROME_URL")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .unwrap_or(defaults.chrome_url);
        let headless = lookup("MACRO_RUNNER_HEADLESS")
            .and_then(|raw| parse_flag(&raw))
            .unwrap_or(defaults.headless);
        let port = lookup("MACRO_RUNNER_PORT")
            .and_then(|raw| raw.trim().parse::<u16>().ok())
            .filter(|port| *port > 0)
            .unwrap_or(defaults.port);

        Self {
            state_dir,
            chrome_url,
            headless,
            port,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(env::temp_dir)
        .join("macro-runner")
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
