//! `statehive config`: Configuration management commands.

use std::path::Path;

use statehive_config::AppConfig;

pub fn show(config: &AppConfig) -> anyhow::Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(explicit: Option<&Path>) {
    match explicit {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", default_path().display()),
    }
}

pub fn validate(explicit: Option<&Path>) -> anyhow::Result<()> {
    let path = explicit.map(Path::to_path_buf).unwrap_or_else(default_path);
    println!("Validating {}", path.display());

    let mut config = AppConfig::load_from(&path)?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;

    println!("  Config parsed successfully");
    println!();
    println!("  Retries:          {}", config.agent.max_retry_attempts);
    println!("  Mistake limit:    {}", config.agent.consecutive_mistake_limit);
    println!("  Request timeout:  {}ms", config.agent.request_timeout_ms);
    println!("  Max turns:        {}", config.agent.max_turns);
    println!("  Script timeout:   {}ms", config.script.timeout_ms);
    println!("  Max iterations:   {}", config.script.max_iterations);
    println!("  Denied names:     {}", config.script.denied_identifiers.join(", "));
    Ok(())
}

fn default_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}
