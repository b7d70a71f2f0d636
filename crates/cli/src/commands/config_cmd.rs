//! `conclave config`: configuration management commands.

use conclave_config::OrchestratorConfig;

pub fn validate() -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = match OrchestratorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set CONCLAVE_API_KEY or OPENAI_API_KEY)");
    }
    if config.limits.max_auto_retries > 5 {
        warnings.push("limits.max_auto_retries above 5 multiplies LLM cost per request");
    }
    if config.daemon.remote_tool_timeout_secs == 0 {
        warnings.push("daemon.remote_tool_timeout_secs = 0 fails every remote tool call");
    }

    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Endpoint:  {}", config.base_url);
    println!("   Model:     {}", config.default_model);
    println!("   Daemons:   {} per user", config.limits.max_daemons_per_user);
    Ok(())
}

pub fn show() -> anyhow::Result<()> {
    let mut config = OrchestratorConfig::load()?;
    if config.api_key.is_some() {
        config.api_key = Some("****".into());
    }
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", config_path().display());
}

/// Write the default config unless one already exists.
pub fn init() -> anyhow::Result<()> {
    let path = config_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, OrchestratorConfig::default_toml())?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    OrchestratorConfig::config_dir().join("config.toml")
}
