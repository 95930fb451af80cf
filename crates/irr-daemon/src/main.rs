use anyhow::Context;
use clap::Parser;

use irr_core::Settings;
use irr_daemon::Daemon;
use irr_daemon::cli::{Cli, Command};
use irr_logging::{IrrSubscriberBuilder, LogConfig};
use irr_mirror::MirrorRunOutcome;

fn print_outcome(source: &str, outcome: &MirrorRunOutcome) {
    match outcome {
        MirrorRunOutcome::FullImport(counts) => {
            println!("{source}: full import, {} objects loaded", counts.applied)
        }
        MirrorRunOutcome::UpToDate => println!("{source}: up to date"),
        MirrorRunOutcome::Incremental(counts) => {
            println!("{source}: {} of {} NRTM operations applied", counts.applied, counts.total())
        }
        MirrorRunOutcome::Failed { message, .. } => println!("{source}: failed: {message}"),
    }
}

fn show(serial: Option<u64>) -> String {
    serial.map_or_else(|| "-".to_string(), |s| s.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;

    let _guard = IrrSubscriberBuilder::new()
        .with_config(LogConfig::from_settings(&settings.log))
        .init()?;

    let daemon = Daemon::open(settings)?;

    match cli.command {
        Command::Run => daemon.run().await?,

        Command::Mirror { source } => {
            let outcomes = daemon.mirror_once(source.as_deref()).await?;
            for (source, outcome) in &outcomes {
                print_outcome(source, outcome);
            }
            if outcomes.iter().any(|(_, outcome)| outcome.is_failed()) {
                anyhow::bail!("one or more sources failed to mirror");
            }
        }

        Command::ImportRoas => {
            let summary = daemon.import_roas().await?;
            println!(
                "{} ROAs imported, {} pseudo records, {} route status changes",
                summary.roas, summary.pseudo_records, summary.status_changes
            );
        }

        Command::UpdatePreference => {
            let changed = daemon.update_preference().await?;
            println!("{changed} route preference status changes");
        }

        Command::Status => {
            for status in daemon.status()? {
                println!(
                    "{}: mirror={} journal={}-{} export={} force_reload={} updated={}",
                    status.source,
                    show(status.serial_newest_mirror),
                    show(status.serial_oldest_journal),
                    show(status.serial_newest_journal),
                    show(status.serial_last_export),
                    status.force_reload,
                    status.updated.to_rfc3339(),
                );
                if let (Some(error), Some(at)) = (&status.last_error, status.last_error_timestamp) {
                    println!("    last error at {}: {error}", at.to_rfc3339());
                }
            }
        }

        Command::Nrtm {
            source,
            start,
            end,
            version,
        } => {
            println!("{}", daemon.nrtm(&source, start, end, &version)?);
        }

        Command::ForceReload { source } => {
            daemon.force_reload(&source)?;
            println!("Next mirror pass of {source} will be a full reload");
        }

        Command::ExpireJournal { source, before } => {
            let removed = daemon.expire_journal(&source, before)?;
            println!("Removed {removed} journal entries of {source} below serial {before}");
        }
    }

    Ok(())
}
