use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod search;

use config::{load_settings, Settings};
use search::{keystrokes, parse_script, search_engine, SearchContext};

/// Replays a scripted typing session through the search loop and prints
/// every state as a JSON line.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "cycle_demo.toml")]
    config: PathBuf,
    #[arg(long)]
    debounce_ms: Option<u64>,
    #[arg(long)]
    lookup_latency_ms: Option<u64>,
    /// Lookups for this query fail; pass an empty value to disable.
    #[arg(long)]
    failing_query: Option<String>,
    /// Keep running until pending lookups finish after the script ends.
    #[arg(long)]
    drain_feedback: bool,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    script: Option<String>,
}

impl Args {
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
        if self.drain_feedback {
            settings.drain_feedback = true;
        }
        if let Some(v) = self.log_level {
            settings.log_level = v;
        }
        if let Some(v) = self.script {
            settings.script = v;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(&args.config)?;
    args.apply(&mut settings);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .with_context(|| format!("invalid log level '{}'", settings.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let steps = parse_script(&settings.script).context("failed to parse keystroke script")?;
    info!(
        steps = steps.len(),
        debounce_ms = settings.debounce_ms,
        lookup_latency_ms = settings.lookup_latency_ms,
        drain_feedback = settings.drain_feedback,
        "demo: starting"
    );

    let context = SearchContext::new();
    let mut activity = context.activity.is_active();
    tokio::spawn(async move {
        while let Some(active) = activity.next().await {
            info!(active, "demo: lookup activity");
        }
    });
    let mut errors = context.errors.error();
    tokio::spawn(async move {
        while let Some(error) = errors.next().await {
            warn!(%error, "demo: lookup failed");
        }
    });

    let engine = search_engine(&settings, &context);
    let mut states = engine.run([keystrokes(steps, Duration::from_millis(settings.debounce_ms))]);
    while let Some(state) = states.next().await {
        let state = state.context("search loop failed")?;
        println!("{}", serde_json::to_string(&state)?);
    }

    info!(
        still_tracked = context.registry.tracked_ids(),
        "demo: finished"
    );
    Ok(())
}
