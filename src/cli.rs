use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "ecomind",
    about = "Count AI provider calls and estimate their energy, water and CO2 footprint"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Output format: table (default), json
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Keep all state in memory for this run only
    #[arg(long, global = true)]
    pub ephemeral: bool,

    /// Extra domain to track as a custom provider (repeatable, `*.` wildcards allowed)
    #[arg(long = "custom-provider", global = true, value_name = "DOMAIN")]
    pub custom_providers: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show today's aggregate (default)
    Today,
    /// Show every recorded day
    History {
        /// First day to show (YYYY-MM-DD)
        #[arg(long)]
        from: Option<chrono::NaiveDate>,
        /// Last day to show (YYYY-MM-DD)
        #[arg(long)]
        to: Option<chrono::NaiveDate>,
    },
    /// Record one observed request
    Record {
        url: String,
        /// Request body (JSON text)
        #[arg(long)]
        body: Option<String>,
    },
    /// Show how a request would be classified, without recording it
    Classify {
        url: String,
        /// Request body (JSON text)
        #[arg(long)]
        body: Option<String>,
    },
    /// Record requests read as JSON lines from stdin: {"url": "...", "body": "..."}
    Ingest,
    /// Like ingest, with the midnight reset running until stdin closes
    Watch,
    /// Clear today's aggregate and counter
    Clear,
    /// List tracked providers and their domains
    Providers {
        /// Print the flat domain list only
        #[arg(long)]
        domains: bool,
    },
    /// Check that the telemetry collector is reachable
    Ping {
        /// Collector URL; defaults to baseUrl from the config file
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Fetch today's summary from the telemetry collector
    Remote {
        /// Collector URL; defaults to baseUrl from the config file
        #[arg(long)]
        base_url: Option<String>,
        /// User id; defaults to userId from the config file
        #[arg(long)]
        user_id: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Cli {
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_today() {
        let cli = Cli::parse_from(["ecomind"]);
        assert!(matches!(cli.effective_command(), Command::Today));
        assert_eq!(cli.format, OutputFormat::Table);
        assert!(!cli.ephemeral);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "ecomind",
            "record",
            "https://api.openai.com/v1/chat",
            "--body",
            r#"{"model":"gpt-4"}"#,
            "--ephemeral",
            "--custom-provider",
            "llm.internal",
            "--custom-provider",
            "*.corp.ai",
            "--format",
            "json",
        ]);
        assert!(cli.ephemeral);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.custom_providers, vec!["llm.internal", "*.corp.ai"]);
        match cli.effective_command() {
            Command::Record { url, body } => {
                assert_eq!(url, "https://api.openai.com/v1/chat");
                assert_eq!(body.as_deref(), Some(r#"{"model":"gpt-4"}"#));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn remote_overrides_are_optional() {
        let cli = Cli::parse_from(["ecomind", "remote", "--user-id", "u1"]);
        match cli.effective_command() {
            Command::Remote { base_url, user_id } => {
                assert_eq!(base_url, None);
                assert_eq!(user_id.as_deref(), Some("u1"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn history_range_parses_dates() {
        let cli = Cli::parse_from(["ecomind", "history", "--from", "2024-01-01"]);
        match cli.effective_command() {
            Command::History { from, to } => {
                assert_eq!(from, chrono::NaiveDate::from_ymd_opt(2024, 1, 1));
                assert_eq!(to, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["ecomind", "history", "--from", "yesterday"]).is_err());
    }
}
