use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "irr-daemon", about = "Routing registry mirror daemon")]
pub struct Cli {
    /// Settings file
    #[arg(long, short, default_value = "irr.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Mirror every source and import ROAs on their timers until interrupted
    Run,
    /// Run one mirror pass
    Mirror {
        /// Only this source
        #[arg(long)]
        source: Option<String>,
    },
    /// Import the configured ROA export and re-validate routes
    ImportRoas,
    /// Recompute route preference status
    UpdatePreference,
    /// Show per-source serials and the last mirror error
    Status,
    /// Print the NRTM response for a serial range of a journaled source
    Nrtm {
        #[arg(long)]
        source: String,
        #[arg(long)]
        start: u64,
        /// Defaults to the newest journaled serial
        #[arg(long)]
        end: Option<u64>,
        #[arg(long, default_value = "3", value_parser = ["1", "3"])]
        version: String,
    },
    /// Make the next mirror pass of a source a full reload
    ForceReload {
        #[arg(long)]
        source: String,
    },
    /// Delete journal entries below a serial
    ExpireJournal {
        #[arg(long)]
        source: String,
        #[arg(long)]
        before: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nrtm() {
        let cli = Cli::try_parse_from([
            "irr-daemon", "--config", "/etc/irr.toml", "nrtm", "--source", "TEST", "--start", "5",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/irr.toml"));
        assert_eq!(
            cli.command,
            Command::Nrtm {
                source: "TEST".into(),
                start: 5,
                end: None,
                version: "3".into()
            }
        );
    }

    #[test]
    fn test_rejects_unsupported_version() {
        let result = Cli::try_parse_from([
            "irr-daemon", "nrtm", "--source", "TEST", "--start", "1", "--version", "2",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_expire_journal() {
        let cli = Cli::try_parse_from(["irr-daemon", "expire-journal", "--source", "TEST", "--before", "10"])
            .unwrap();
        assert_eq!(
            cli.command,
            Command::ExpireJournal {
                source: "TEST".into(),
                before: 10
            }
        );
    }
}
