//! `statehive exec`: Run a script file against the demo workspace.

use anyhow::{Context, bail};
use std::path::Path;
use tracing::info;

use statehive_config::AppConfig;

use crate::demo;

pub async fn run(config: &AppConfig, file: &Path, json: bool) -> anyhow::Result<()> {
    let script = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script {}", file.display()))?;
    let demo = demo::workspace(config)?;

    info!(file = %file.display(), bytes = script.len(), "Executing script");
    let result = demo.workspace.execute_script(&script).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !json {
        println!();
        println!("{}", demo.workspace.render());
        for line in demo.changes() {
            println!("changed: {line}");
        }
    }

    if !result.success {
        bail!(
            "{}: {}",
            result.message,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
