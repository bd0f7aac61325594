use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{DEFAULT_API_BASE, DEFAULT_MODEL};

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";
pub const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:8787/api/process-image";

const DEFAULT_UPSTREAM_TIMEOUT_S: f64 = 90.0;
const MIN_UPSTREAM_TIMEOUT_S: f64 = 15.0;
const MAX_UPSTREAM_TIMEOUT_S: f64 = 300.0;

/// Process environment with a `.env` file merged underneath it.
///
/// Real environment variables always win over the file.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    dotenv: HashMap<String, String>,
}

impl Environment {
    pub fn load(dotenv_path: Option<&Path>) -> Self {
        let dotenv = dotenv_path
            .and_then(|path| std::fs::read_to_string(path).ok())
            .map(|content| parse_dotenv(&content))
            .unwrap_or_default();
        Self { dotenv }
    }

    pub fn from_map(dotenv: HashMap<String, String>) -> Self {
        Self { dotenv }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        non_empty_env(key).or_else(|| {
            self.dotenv
                .get(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
    }
}

/// Everything the processing server needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub upstream_timeout: Duration,
    pub events_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env(env: &Environment) -> Self {
        Self {
            bind: env
                .get("ANIMASK_BIND")
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            api_key: env
                .get("GEMINI_API_KEY")
                .or_else(|| env.get("GOOGLE_API_KEY")),
            api_base: env
                .get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: env
                .get("ANIMASK_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            upstream_timeout: upstream_timeout(env.get("ANIMASK_UPSTREAM_TIMEOUT").as_deref()),
            events_path: env.get("ANIMASK_EVENTS").map(PathBuf::from),
        }
    }
}

pub fn upstream_timeout(raw: Option<&str>) -> Duration {
    let seconds = raw
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_S)
        .clamp(MIN_UPSTREAM_TIMEOUT_S, MAX_UPSTREAM_TIMEOUT_S);
    Duration::from_secs_f64(seconds)
}

pub fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let mut value = value.trim().to_string();
        if value.len() >= 2 {
            let bytes = value.as_bytes();
            if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
                || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
            {
                value = value[1..value.len() - 1].to_string();
            }
        }
        vars.insert(key.to_string(), value);
    }
    vars
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
