//! Snowgate - admission gateway for a ServiceNow MCP server

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use snowgate::{
    cli::{Cli, Command},
    config::{AuthzConfig, Config},
    policy,
    server::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Validate configuration and policy, then exit.
fn run_check(cli: &Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration invalid: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration invalid: {e}");
        return ExitCode::FAILURE;
    }

    if let AuthzConfig::Embedded { policy_file } = &config.authorization {
        match policy::load_policy(Path::new(policy_file)) {
            Ok(policy) => println!("Policy {policy_file}: {} rule(s)", policy.rules.len()),
            Err(e) => {
                eprintln!("Policy invalid: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    println!("Configuration OK");
    println!("  strategy:      {}", config.auth.strategy_name());
    println!("  authorization: {}", config.authorization.mode_name());
    println!(
        "  rate limit:    {}",
        if config.rate_limit.enabled {
            format!(
                "{}/s, burst {}",
                config.rate_limit.requests_per_second, config.rate_limit.burst_size
            )
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  delegation:    {}",
        if config.delegation.enabled { "enabled" } else { "disabled" }
    );
    println!("  downstream:    {}", config.downstream.base_url);
    ExitCode::SUCCESS
}

/// Load configuration and serve.
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        strategy = config.auth.strategy_name(),
        "Starting snowgate"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
