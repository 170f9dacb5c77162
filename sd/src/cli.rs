//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::cache::DataClass;

/// SyncDeck - client-side data orchestration
#[derive(Parser)]
#[command(
    name = "sd",
    about = "Expiring cache, bounded request queue and resilient push channel behind one coordinator",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the push channel and print every coordinator event until Ctrl-C
    Watch {
        /// Push endpoint (overrides config)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Read one resource through the coordinator with concurrent callers
    Fetch {
        /// Resource path relative to services.base-url
        path: String,

        /// Data class whose TTL applies
        #[arg(long, default_value = "fleet")]
        class: DataClass,

        /// Number of concurrent read-throughs of the same key
        #[arg(short = 'n', long, default_value = "1")]
        concurrency: usize,
    },

    /// Connect and push one message upstream
    Send {
        /// Message type
        #[arg(value_name = "TYPE")]
        kind: String,

        /// JSON payload
        #[arg(value_name = "PAYLOAD_JSON", default_value = "{}")]
        payload: String,

        /// Push endpoint (overrides config)
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("syncdeck")
        .join("logs")
        .join("syncdeck.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Extra help text listing where logs go
pub fn generate_after_help() -> String {
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// Output format for event streams
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fetch() {
        let cli = Cli::try_parse_from(["sd", "fetch", "fleet", "--class", "quotes", "-n", "4"]).unwrap();
        match cli.command {
            Command::Fetch {
                path,
                class,
                concurrency,
            } => {
                assert_eq!(path, "fleet");
                assert_eq!(class, DataClass::Quotes);
                assert_eq!(concurrency, 4);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sd", "watch", "--format", "json", "-l", "debug", "-c", "x.yml"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("x.yml")));
        assert!(matches!(
            cli.command,
            Command::Watch {
                format: OutputFormat::Json,
                endpoint: None
            }
        ));
    }

    #[test]
    fn test_send_payload_defaults_to_empty_object() {
        let cli = Cli::try_parse_from(["sd", "send", "ping"]).unwrap();
        match cli.command {
            Command::Send { kind, payload, .. } => {
                assert_eq!(kind, "ping");
                assert_eq!(payload, "{}");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_class_and_format() {
        assert!(Cli::try_parse_from(["sd", "fetch", "x", "--class", "boats"]).is_err());
        assert!(Cli::try_parse_from(["sd", "watch", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_output_format_round_trip() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::Text.to_string(), "text");
    }
}
