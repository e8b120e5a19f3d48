//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// rq - rate-limit aware API request runner
#[derive(Parser)]
#[command(
    name = "rq",
    about = "Send API requests through a rate-limit aware scheduler",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/ratequeue/logs/ratequeue.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Send one request, or a burst of identical requests
    Request {
        /// HTTP method
        #[arg(value_name = "METHOD")]
        method: String,

        /// Path relative to the configured base URL
        path: String,

        /// Query parameters as key=value
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,

        /// Number of identical requests to schedule concurrently
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Wait in the queue when the rate limit is exhausted
        #[arg(long)]
        queue: bool,
    },

    /// Create a card
    CardAdd {
        /// List to create the card in
        #[arg(long)]
        list: String,

        /// Card name
        #[arg(long)]
        name: String,

        /// Card description
        #[arg(long)]
        desc: Option<String>,

        /// Wait in the queue when the rate limit is exhausted
        #[arg(long)]
        queue: bool,
    },

    /// Print the effective configuration
    Config,
}

/// Parse a `key=value` pair
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid query parameter '{}', expected key=value", s)),
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ratequeue")
        .join("logs")
        .join("ratequeue.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_request() {
        let cli = Cli::parse_from(["rq", "request", "GET", "/members/me", "-q", "fields=id", "-n", "3", "--queue"]);
        match cli.command {
            Command::Request {
                method,
                path,
                query,
                count,
                queue,
            } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/members/me");
                assert_eq!(query, vec![("fields".to_string(), "id".to_string())]);
                assert_eq!(count, 3);
                assert!(queue);
            }
            _ => panic!("Expected Request command"),
        }
    }

    #[test]
    fn test_cli_parse_card_add() {
        let cli = Cli::parse_from(["rq", "-v", "card-add", "--list", "l1", "--name", "Write docs"]);
        assert!(cli.verbose);
        match cli.command {
            Command::CardAdd { list, name, desc, queue } => {
                assert_eq!(list, "l1");
                assert_eq!(name, "Write docs");
                assert_eq!(desc, None);
                assert!(!queue);
            }
            _ => panic!("Expected CardAdd command"),
        }
    }

    #[test]
    fn test_cli_parse_global_config() {
        let cli = Cli::parse_from(["rq", "config", "--config", "/tmp/rq.yml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rq.yml")));
        assert!(matches!(cli.command, Command::Config));
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(parse_key_value("a=b=c"), Ok(("a".to_string(), "b=c".to_string())));
        assert_eq!(parse_key_value("empty="), Ok(("empty".to_string(), String::new())));
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }
}
