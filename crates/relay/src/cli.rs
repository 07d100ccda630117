//! Command-line argument parsing for the relay binary.

use clap::Parser;
use relay_server::IdentityPolicy;
use std::path::PathBuf;

/// Real-time position relay for multiplayer clients
///
/// Every option overrides the matching setting in the configuration file.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration is written there.
    #[arg(short, long, value_name = "FILE", default_value = "relay.toml")]
    pub config: PathBuf,

    /// Bind address (e.g., 127.0.0.1:8765)
    #[arg(short, long = "bind", value_name = "ADDRESS")]
    pub bind_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Maximum number of concurrent connections (0 for unlimited)
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,

    /// How client-supplied ids are treated (trust, bind-first)
    #[arg(long, value_name = "POLICY")]
    pub identity_policy: Option<IdentityPolicy>,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from("relay.toml"),
            bind_address: None,
            log_level: None,
            json_logs: false,
            max_connections: None,
            identity_policy: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = CliArgs::try_parse_from(["relay"]).unwrap();
        assert_eq!(args.config, PathBuf::from("relay.toml"));
        assert!(args.bind_address.is_none());
        assert!(!args.json_logs);
        assert!(args.identity_policy.is_none());
    }

    #[test]
    fn test_all_overrides() {
        let args = CliArgs::try_parse_from([
            "relay",
            "-c",
            "custom.toml",
            "-b",
            "127.0.0.1:9000",
            "-l",
            "debug",
            "--json-logs",
            "--max-connections",
            "64",
            "--identity-policy",
            "bind-first",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("custom.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert_eq!(args.max_connections, Some(64));
        assert_eq!(args.identity_policy, Some(IdentityPolicy::BindFirst));
    }

    #[test]
    fn test_unknown_identity_policy_rejected() {
        assert!(CliArgs::try_parse_from(["relay", "--identity-policy", "strict"]).is_err());
    }
}
