//! CLI argument definitions for the placebot binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// placebot - ask questions about the college placement database in plain English.
#[derive(Parser, Debug)]
#[command(name = "placebot", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite placement database.
    #[arg(short = 'd', long = "database", global = true)]
    pub database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API.
    Serve {
        /// API server port.
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Interactive chat on stdin; `exit` or `quit` leaves.
    Chat,
    /// Answer a single question and exit.
    Ask {
        /// The question, in plain English.
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Print the schema description used in prompts.
    Schema,
    /// Create the placement schema, optionally with demo data.
    InitDb {
        /// Create the tables only.
        #[arg(long = "no-seed")]
        no_seed: bool,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PLACEBOT_CONFIG env var > platform default (~/.placebot/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PLACEBOT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > PLACEBOT_PORT env var > config file value > 3030.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Command::Serve { port: Some(p) } = self.command {
            return p;
        }
        if let Ok(val) = std::env::var("PLACEBOT_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        3030
    }

    /// Resolve the database path.
    ///
    /// Priority: --database flag > PLACEBOT_DATABASE env var > config file value.
    /// Returns `None` if neither is overridden.
    pub fn resolve_database(&self) -> Option<String> {
        if let Some(ref p) = self.database {
            return Some(p.to_string_lossy().to_string());
        }
        std::env::var("PLACEBOT_DATABASE")
            .ok()
            .filter(|p| !p.trim().is_empty())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    /// Returns `None` if not overridden.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".placebot").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".placebot").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_with_port() {
        let args = CliArgs::try_parse_from(["placebot", "serve", "--port", "8080"]).unwrap();
        assert_eq!(args.command, Command::Serve { port: Some(8080) });
        assert_eq!(args.resolve_port(3030), 8080);
    }

    #[test]
    fn test_parse_ask_joins_words() {
        let args =
            CliArgs::try_parse_from(["placebot", "ask", "How", "many", "students?"]).unwrap();
        match args.command {
            Command::Ask { question } => assert_eq!(question.join(" "), "How many students?"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ask_requires_question() {
        assert!(CliArgs::try_parse_from(["placebot", "ask"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "placebot",
            "schema",
            "--database",
            "/tmp/p.sqlite",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.command, Command::Schema);
        assert_eq!(args.resolve_database().as_deref(), Some("/tmp/p.sqlite"));
        assert_eq!(args.resolve_log_level().as_deref(), Some("debug"));
    }

    #[test]
    fn test_init_db_no_seed() {
        let args = CliArgs::try_parse_from(["placebot", "init-db", "--no-seed"]).unwrap();
        assert_eq!(args.command, Command::InitDb { no_seed: true });
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let args = CliArgs::try_parse_from(["placebot", "-c", "/etc/placebot.toml", "chat"]).unwrap();
        assert_eq!(
            args.resolve_config_path(),
            PathBuf::from("/etc/placebot.toml")
        );
    }
}
