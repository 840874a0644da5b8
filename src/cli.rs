//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Single-sign-on gate for the administrative dashboard
#[derive(Parser, Debug)]
#[command(name = "dashboard-sso")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DASHBOARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "DASHBOARD_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "DASHBOARD_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DASHBOARD_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "DASHBOARD_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the dashboard server (default)
    Serve,

    /// Load and validate configuration, then print it with secrets redacted
    CheckConfig,

    /// Fetch the identity provider's discovery document and print it as JSON,
    /// with configured endpoint overrides applied
    Discover,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["dashboard-sso", "--port", "9100"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.port, Some(9100));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["dashboard-sso", "check-config", "--config", "/etc/dashboard.yaml"]).unwrap();
        assert_eq!(cli.command, Some(Command::CheckConfig));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/dashboard.yaml")));
    }

    #[test]
    fn discover_subcommand_parses() {
        let cli = Cli::try_parse_from(["dashboard-sso", "discover"]).unwrap();
        assert_eq!(cli.command, Some(Command::Discover));
    }
}
