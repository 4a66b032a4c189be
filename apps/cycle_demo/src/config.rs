use std::{fs, io, path::Path};

use anyhow::{bail, Context};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "CYCLE_DEMO__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub debounce_ms: u64,
    pub lookup_latency_ms: u64,
    /// Lookups for exactly this query fail.
    pub failing_query: Option<String>,
    pub drain_feedback: bool,
    pub log_level: String,
    /// Comma separated `millis:text` keystrokes; an empty text clears the
    /// query.
    pub script: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            lookup_latency_ms: 800,
            failing_query: Some("boom".into()),
            drain_feedback: false,
            log_level: "info".into(),
            script: "0:r,120:ru,240:rus,1500:rust,3000:boom,4500:,5000:tok,5100:tokio,7000:".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    debounce_ms: Option<u64>,
    lookup_latency_ms: Option<u64>,
    failing_query: Option<String>,
    drain_feedback: Option<bool>,
    log_level: Option<String>,
    script: Option<String>,
}

impl FileSettings {
    fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.debounce_ms {
            settings.debounce_ms = v;
        }
        if let Some(v) = self.lookup_latency_ms {
            settings.lookup_latency_ms = v;
        }
        if let Some(v) = self.failing_query {
            settings.failing_query = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = self.drain_feedback {
            settings.drain_feedback = v;
        }
        if let Some(v) = self.log_level {
            settings.log_level = v;
        }
        if let Some(v) = self.script {
            settings.script = v;
        }
    }
}

/// Defaults, then the TOML file at `path` (a missing file is fine), then
/// `CYCLE_DEMO__*` environment variables.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            file_cfg.apply(&mut settings);
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, std::env::vars())?;
    Ok(settings)
}

pub fn apply_env(
    settings: &mut Settings,
    vars: impl IntoIterator<Item = (String, String)>,
) -> anyhow::Result<()> {
    for (key, value) in vars {
        let Some(field) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match field.to_ascii_lowercase().as_str() {
            "debounce_ms" => settings.debounce_ms = parse_millis(&key, &value)?,
            "lookup_latency_ms" => settings.lookup_latency_ms = parse_millis(&key, &value)?,
            "failing_query" => settings.failing_query = (!value.is_empty()).then_some(value),
            "drain_feedback" => settings.drain_feedback = parse_flag(&key, &value)?,
            "log_level" => settings.log_level = value,
            "script" => settings.script = value,
            _ => {}
        }
    }
    Ok(())
}

fn parse_millis(key: &str, value: &str) -> anyhow::Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of milliseconds, got '{value}'"))
}

fn parse_flag(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{key} must be true or false, got '{value}'"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
