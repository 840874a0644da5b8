//! Dashboard SSO - single-sign-on gate for the administrative dashboard

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use dashboard_sso::{
    auth::{build_provider, discovery::DiscoveryResolver, oidc::http_client},
    cli::{Cli, Command},
    config::{Config, ProviderKind},
    server::DashboardServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    // CLI overrides
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckConfig) => run_check_config(&config),
        Some(Command::Discover) => run_discover(&config).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Print the validated configuration with literal secrets redacted
fn run_check_config(config: &Config) -> ExitCode {
    match serde_json::to_string_pretty(&config.redacted()) {
        Ok(json) => {
            println!("{json}");
            println!("\nConfiguration is valid.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Resolve and print the identity provider's discovery document
async fn run_discover(config: &Config) -> ExitCode {
    if config.auth.provider != Some(ProviderKind::Oidc) {
        eprintln!("discover requires auth.provider: oidc");
        return ExitCode::FAILURE;
    }

    let oidc = &config.auth.oidc;
    let http = match http_client(oidc.http_timeout) {
        Ok(http) => http,
        Err(e) => {
            eprintln!("Failed to build HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let resolver = DiscoveryResolver::new(http, oidc.issuer.clone(), oidc.overrides());
    let document = match resolver.resolve().await {
        Ok(document) => document,
        Err(e) => {
            eprintln!("Discovery failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(document) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to render discovery document: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the dashboard server
async fn run_server(config: Config) -> ExitCode {
    let provider = match build_provider(&config.auth) {
        Ok(provider) => provider,
        Err(e) => {
            error!(error = %e, "Failed to initialise authentication");
            return ExitCode::FAILURE;
        }
    };

    info!(provider = provider.name(), "Starting dashboard");

    match DashboardServer::new(config, provider).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
