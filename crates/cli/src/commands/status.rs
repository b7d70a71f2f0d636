//! `conclave status`: show the effective configuration.

use conclave_config::OrchestratorConfig;

pub fn run() -> anyhow::Result<()> {
    let config = OrchestratorConfig::load()?;

    println!("Conclave Status");
    println!("===============");
    println!("  Config dir:       {}", OrchestratorConfig::config_dir().display());
    println!("  Endpoint:         {}", config.base_url);
    println!("  Model:            {}", config.default_model);
    println!("  API key:          {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Daemons per user: {}", config.limits.max_daemons_per_user);
    println!(
        "  Retries:          {} automatic, {} manual",
        config.limits.max_auto_retries, config.limits.max_manual_retries
    );
    println!("  Request ceiling:  {}s", config.limits.request_ceiling_secs);
    println!(
        "  Daemon budget:    {} iterations, {} error retries, {} token window",
        config.daemon.max_iterations, config.daemon.max_retries, config.daemon.context_window
    );

    if OrchestratorConfig::config_dir().join("config.toml").exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file, using defaults (run `conclave config init`)");
    }
    Ok(())
}
