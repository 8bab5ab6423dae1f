//! Command-line interface definition for the dispatcher
//!
//! This module defines the CLI structure using clap's derive API.

use clap::Parser;

/// The queue dispatcher. It pops from the Redis buffer then routes each item
/// to the handler for its topic.
#[derive(Parser, Debug, Clone)]
#[command(name = "misp-dispatcher")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Seconds to wait before polling the queue again once it is empty
    #[arg(short, long, env = "MISP_DISPATCHER_SLEEP")]
    pub sleep: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            sleep: None,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert_eq!(cli.sleep, None);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_parse_sleep() {
        let cli = Cli::try_parse_from(["misp-dispatcher", "-s", "3"]).unwrap();
        assert_eq!(cli.sleep, Some(3));
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
    }

    #[test]
    fn test_cli_parse_long_flags() {
        let cli = Cli::try_parse_from([
            "misp-dispatcher",
            "--config",
            "/etc/dispatcher.yaml",
            "--sleep",
            "10",
            "--verbose",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/dispatcher.yaml"));
        assert_eq!(cli.sleep, Some(10));
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_rejects_non_numeric_sleep() {
        assert!(Cli::try_parse_from(["misp-dispatcher", "-s", "soon"]).is_err());
    }
}
